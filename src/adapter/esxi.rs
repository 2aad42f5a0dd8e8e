// VMWARE ESXI VIA govc
// govc TAKES ITS CONNECTION AND GUEST LOGIN FROM THE ENVIRONMENT, SO NO
// SECRET EVER LANDS ON ARGV.

use std::process::Command;
use std::sync::Arc;

use super::{guest_exec, lifecycle, AdapterSettings, Backend, HypervisorAdapter};
use crate::error::{GuestExecError, LifecycleAction, LifecycleError, SecretError};
use crate::secrets::{SecretProvider, SecretScope};

pub struct EsxiAdapter {
    settings: AdapterSettings,
    secrets: Arc<dyn SecretProvider>,
}

impl EsxiAdapter {
    pub fn new(settings: AdapterSettings, secrets: Arc<dyn SecretProvider>) -> Self {
        Self { settings, secrets }
    }

    fn govc(&self) -> Result<Command, SecretError> {
        let host = self.secrets.credentials(Backend::Esxi, SecretScope::Host)?;
        let mut cmd = Command::new(&self.settings.tool);
        if let Some(url) = &self.settings.endpoint {
            cmd.env("GOVC_URL", url);
        }
        cmd.env("GOVC_USERNAME", &host.username)
            .env("GOVC_PASSWORD", host.password());
        if self.settings.insecure {
            cmd.env("GOVC_INSECURE", "1");
        }
        Ok(cmd)
    }

    pub(crate) fn start_command(&self, vm: &str) -> Result<Command, SecretError> {
        let mut cmd = self.govc()?;
        cmd.args(["vm.power", "-on", vm]);
        Ok(cmd)
    }

    pub(crate) fn stop_command(&self, vm: &str) -> Result<Command, SecretError> {
        let mut cmd = self.govc()?;
        // -s ASKS VMWARE TOOLS FOR A GUEST SHUTDOWN
        let mode = if self.settings.hard_stop { "-off" } else { "-s" };
        cmd.args(["vm.power", mode, vm]);
        Ok(cmd)
    }

    pub(crate) fn guest_command(&self, vm: &str, program: &str) -> Result<Command, SecretError> {
        let guest = self.secrets.credentials(Backend::Esxi, SecretScope::Guest)?;
        let mut cmd = self.govc()?;
        cmd.env(
            "GOVC_GUEST_LOGIN",
            format!("{}:{}", guest.username, guest.password()),
        );
        cmd.args(["guest.run", "-vm", vm, program]);
        Ok(cmd)
    }
}

impl HypervisorAdapter for EsxiAdapter {
    fn backend(&self) -> Backend {
        Backend::Esxi
    }

    fn start(&self, vm: &str) -> Result<(), LifecycleError> {
        lifecycle(
            LifecycleAction::Start,
            vm,
            self.start_command(vm),
            self.settings.lifecycle_timeout,
        )
    }

    fn stop(&self, vm: &str) -> Result<(), LifecycleError> {
        lifecycle(
            LifecycleAction::Stop,
            vm,
            self.stop_command(vm),
            self.settings.lifecycle_timeout,
        )
    }

    fn run_guest_program(&self, vm: &str, program: &str) -> Result<i32, GuestExecError> {
        guest_exec(
            vm,
            program,
            self.guest_command(vm, program),
            self.settings.guest_timeout,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testutil::{argv, env};
    use crate::secrets::{Credentials, StaticSecrets};

    fn adapter(hard_stop: bool) -> EsxiAdapter {
        let secrets = StaticSecrets::new()
            .with(Backend::Esxi, SecretScope::Host, Credentials::new("root", "hostpw"))
            .with(Backend::Esxi, SecretScope::Guest, Credentials::new("bench", "guestpw"));
        let mut settings = AdapterSettings::defaults(Backend::Esxi);
        settings.endpoint = Some("https://esxi.lab/sdk".into());
        settings.insecure = true;
        settings.hard_stop = hard_stop;
        EsxiAdapter::new(settings, Arc::new(secrets))
    }

    #[test]
    fn start_and_stop_argv() {
        let a = adapter(false);
        let start = a.start_command("Windows11").unwrap();
        assert_eq!(start.get_program(), "govc");
        assert_eq!(argv(&start), ["vm.power", "-on", "Windows11"]);
        assert_eq!(env(&start, "GOVC_URL").as_deref(), Some("https://esxi.lab/sdk"));
        assert_eq!(env(&start, "GOVC_INSECURE").as_deref(), Some("1"));

        assert_eq!(argv(&a.stop_command("Windows11").unwrap()), ["vm.power", "-s", "Windows11"]);
        let hard = adapter(true);
        assert_eq!(argv(&hard.stop_command("Windows11").unwrap()), ["vm.power", "-off", "Windows11"]);
    }

    #[test]
    fn credentials_travel_in_env_only() {
        let cmd = adapter(false).guest_command("Windows11", "C:\\bench\\cpu.exe").unwrap();
        let args = argv(&cmd);
        assert_eq!(args, ["guest.run", "-vm", "Windows11", "C:\\bench\\cpu.exe"]);
        assert!(args.iter().all(|a| !a.contains("pw")));
        assert_eq!(env(&cmd, "GOVC_USERNAME").as_deref(), Some("root"));
        assert_eq!(env(&cmd, "GOVC_PASSWORD").as_deref(), Some("hostpw"));
        assert_eq!(env(&cmd, "GOVC_GUEST_LOGIN").as_deref(), Some("bench:guestpw"));
    }

    #[test]
    fn missing_host_login_fails_start() {
        let a = EsxiAdapter::new(
            AdapterSettings::defaults(Backend::Esxi),
            Arc::new(StaticSecrets::new()),
        );
        let err = a.start("Windows11").unwrap_err();
        assert!(matches!(err, LifecycleError::Credentials { .. }));
    }
}

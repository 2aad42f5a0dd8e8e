// VIRTUALBOX VIA VBoxManage
// THE GUEST PASSWORD NEVER TOUCHES ARGV: IT IS STAGED IN A 0600 TEMP FILE
// FOR --passwordfile AND THE FILE IS REMOVED WHEN THE CALL RETURNS.
// ONLY THE USERNAME IS VISIBLE IN /proc/<pid>/cmdline.

use std::io::{self, Write};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use tempfile::NamedTempFile;

use super::{guest_exec, lifecycle, AdapterSettings, Backend, HypervisorAdapter};
use crate::error::{GuestExecError, LifecycleAction, LifecycleError};
use crate::secrets::{SecretProvider, SecretScope};

// NamedTempFile IS CREATED 0600 ON UNIX AND DELETED ON DROP
fn stage_password(password: &str) -> io::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new().prefix("vmbench-vbox-").tempfile()?;
    file.write_all(password.as_bytes())?;
    file.flush()?;
    Ok(file)
}

pub struct VirtualboxAdapter {
    settings: AdapterSettings,
    secrets: Arc<dyn SecretProvider>,
}

impl VirtualboxAdapter {
    pub fn new(settings: AdapterSettings, secrets: Arc<dyn SecretProvider>) -> Self {
        Self { settings, secrets }
    }

    pub(crate) fn start_command(&self, vm: &str) -> Command {
        let mut cmd = Command::new(&self.settings.tool);
        cmd.args(["startvm", vm, "--type", "headless"]);
        cmd
    }

    pub(crate) fn stop_command(&self, vm: &str) -> Command {
        let mode = if self.settings.hard_stop {
            "poweroff"
        } else {
            "acpipowerbutton"
        };
        let mut cmd = Command::new(&self.settings.tool);
        cmd.args(["controlvm", vm, mode]);
        cmd
    }

    pub(crate) fn guest_command(
        &self,
        vm: &str,
        program: &str,
        username: &str,
        password_file: &Path,
    ) -> Command {
        let mut cmd = Command::new(&self.settings.tool);
        cmd.args(["guestcontrol", vm, "run", "--exe", program])
            .args(["--username", username])
            .arg("--passwordfile")
            .arg(password_file)
            .args(["--wait-stdout", "--wait-stderr"]);
        cmd
    }
}

impl HypervisorAdapter for VirtualboxAdapter {
    fn backend(&self) -> Backend {
        Backend::Virtualbox
    }

    fn start(&self, vm: &str) -> Result<(), LifecycleError> {
        lifecycle(
            LifecycleAction::Start,
            vm,
            Ok(self.start_command(vm)),
            self.settings.lifecycle_timeout,
        )
    }

    fn stop(&self, vm: &str) -> Result<(), LifecycleError> {
        lifecycle(
            LifecycleAction::Stop,
            vm,
            Ok(self.stop_command(vm)),
            self.settings.lifecycle_timeout,
        )
    }

    fn run_guest_program(&self, vm: &str, program: &str) -> Result<i32, GuestExecError> {
        let guest = self
            .secrets
            .credentials(Backend::Virtualbox, SecretScope::Guest)
            .map_err(|source| GuestExecError::Credentials {
                vm: vm.to_string(),
                program: program.to_string(),
                source,
            })?;
        let password_file =
            stage_password(guest.password()).map_err(|source| GuestExecError::PasswordFile {
                vm: vm.to_string(),
                program: program.to_string(),
                source,
            })?;
        let cmd = self.guest_command(vm, program, &guest.username, password_file.path());
        // password_file OUTLIVES THE TOOL: DROPPED ONLY AFTER guest_exec RETURNS
        let result = guest_exec(vm, program, Ok(cmd), self.settings.guest_timeout);
        drop(password_file);
        result
    }
}

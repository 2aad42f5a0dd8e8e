// VMWARE WORKSTATION VIA vmrun -T ws
// VM REF IS THE .vmx PATH. LIKE VBoxManage, vmrun ONLY TAKES THE GUEST
// LOGIN ON ARGV.

use std::process::Command;
use std::sync::Arc;

use super::{guest_exec, lifecycle, AdapterSettings, Backend, HypervisorAdapter};
use crate::error::{GuestExecError, LifecycleAction, LifecycleError, SecretError};
use crate::secrets::{SecretProvider, SecretScope};

pub struct WorkstationAdapter {
    settings: AdapterSettings,
    secrets: Arc<dyn SecretProvider>,
}

impl WorkstationAdapter {
    pub fn new(settings: AdapterSettings, secrets: Arc<dyn SecretProvider>) -> Self {
        Self { settings, secrets }
    }

    fn vmrun(&self) -> Command {
        let mut cmd = Command::new(&self.settings.tool);
        cmd.args(["-T", "ws"]);
        cmd
    }

    pub(crate) fn start_command(&self, vmx: &str) -> Command {
        let mut cmd = self.vmrun();
        cmd.args(["start", vmx, "nogui"]);
        cmd
    }

    pub(crate) fn stop_command(&self, vmx: &str) -> Command {
        let mode = if self.settings.hard_stop { "hard" } else { "soft" };
        let mut cmd = self.vmrun();
        cmd.args(["stop", vmx, mode]);
        cmd
    }

    pub(crate) fn guest_command(&self, vmx: &str, program: &str) -> Result<Command, SecretError> {
        let guest = self
            .secrets
            .credentials(Backend::Workstation, SecretScope::Guest)?;
        let mut cmd = self.vmrun();
        cmd.args(["-gu", guest.username.as_str()])
            .args(["-gp", guest.password()])
            .args(["runProgramInGuest", vmx, program]);
        Ok(cmd)
    }
}

impl HypervisorAdapter for WorkstationAdapter {
    fn backend(&self) -> Backend {
        Backend::Workstation
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
        guest_exec(
            vm,
            program,
            self.guest_command(vm, program),
            self.settings.guest_timeout,
        )
    }
}

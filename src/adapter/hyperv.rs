// MICROSOFT HYPER-V VIA powershell
// THE SCRIPTS ARE FIXED STRINGS. VM NAME, PROGRAM AND GUEST LOGIN ARE PASSED
// THROUGH THE CHILD ENVIRONMENT, SO NOTHING IS INTERPOLATED INTO POWERSHELL
// SOURCE AND NO SECRET LANDS ON ARGV.

use std::process::Command;
use std::sync::Arc;

use super::{guest_exec, lifecycle, AdapterSettings, Backend, HypervisorAdapter};
use crate::error::{GuestExecError, LifecycleAction, LifecycleError, SecretError};
use crate::secrets::{SecretProvider, SecretScope};

const START_SCRIPT: &str = "$ErrorActionPreference = 'Stop'; Start-VM -Name $env:VMBENCH_VM";
const STOP_SCRIPT: &str = "$ErrorActionPreference = 'Stop'; Stop-VM -Name $env:VMBENCH_VM -Force";
const POWEROFF_SCRIPT: &str =
    "$ErrorActionPreference = 'Stop'; Stop-VM -Name $env:VMBENCH_VM -TurnOff -Force";

// PowerShell Direct: RUNS OVER THE VMBUS, NO GUEST NETWORKING NEEDED.
// THE GUEST'S $LASTEXITCODE BECOMES OUR EXIT CODE.
const GUEST_SCRIPT: &str = "$ErrorActionPreference = 'Stop'; \
$pw = ConvertTo-SecureString $env:VMBENCH_GUEST_PASSWORD -AsPlainText -Force; \
$cred = New-Object System.Management.Automation.PSCredential($env:VMBENCH_GUEST_USER, $pw); \
$code = Invoke-Command -VMName $env:VMBENCH_VM -Credential $cred -ArgumentList $env:VMBENCH_PROGRAM \
-ScriptBlock { param($p) & $p | Out-Host; $LASTEXITCODE }; \
exit $code";

pub struct HypervAdapter {
    settings: AdapterSettings,
    secrets: Arc<dyn SecretProvider>,
}

impl HypervAdapter {
    pub fn new(settings: AdapterSettings, secrets: Arc<dyn SecretProvider>) -> Self {
        Self { settings, secrets }
    }

    fn powershell(&self, vm: &str, script: &str) -> Command {
        let mut cmd = Command::new(&self.settings.tool);
        cmd.args(["-NoProfile", "-NonInteractive", "-Command", script])
            .env("VMBENCH_VM", vm);
        cmd
    }

    pub(crate) fn start_command(&self, vm: &str) -> Command {
        self.powershell(vm, START_SCRIPT)
    }

    pub(crate) fn stop_command(&self, vm: &str) -> Command {
        let script = if self.settings.hard_stop {
            POWEROFF_SCRIPT
        } else {
            STOP_SCRIPT
        };
        self.powershell(vm, script)
    }

    pub(crate) fn guest_command(&self, vm: &str, program: &str) -> Result<Command, SecretError> {
        let guest = self.secrets.credentials(Backend::Hyperv, SecretScope::Guest)?;
        let mut cmd = self.powershell(vm, GUEST_SCRIPT);
        cmd.env("VMBENCH_PROGRAM", program)
            .env("VMBENCH_GUEST_USER", &guest.username)
            .env("VMBENCH_GUEST_PASSWORD", guest.password());
        Ok(cmd)
    }
}

impl HypervisorAdapter for HypervAdapter {
    fn backend(&self) -> Backend {
        Backend::Hyperv
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

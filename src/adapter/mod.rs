// VMBENCH HYPERVISOR ADAPTERS
// ONE TRAIT, FOUR CONTROL SURFACES. EACH ADAPTER BUILDS A Command FOR ITS
// TOOL AND HANDS IT TO process::run UNDER A DEADLINE. THE COMMAND BUILDERS
// ARE SEPARATE FROM EXECUTION SO ARGV AND ENV CAN BE CHECKED WITHOUT A
// HYPERVISOR ON THE BOX.

pub mod esxi;
pub mod hyperv;
pub mod virtualbox;
pub mod workstation;

use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GuestExecError, LifecycleAction, LifecycleError, SecretError, ToolError};
use crate::process;
use crate::secrets::SecretProvider;

pub use esxi::EsxiAdapter;
pub use hyperv::HypervAdapter;
pub use virtualbox::VirtualboxAdapter;
pub use workstation::WorkstationAdapter;

pub const DEFAULT_LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_GUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Esxi,
    Virtualbox,
    Workstation,
    Hyperv,
}

impl Backend {
    pub const ALL: [Backend; 4] = [
        Backend::Esxi,
        Backend::Virtualbox,
        Backend::Workstation,
        Backend::Hyperv,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Backend::Esxi => "esxi",
            Backend::Virtualbox => "virtualbox",
            Backend::Workstation => "workstation",
            Backend::Hyperv => "hyperv",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Backend::Esxi => "VMWARE ESXI",
            Backend::Virtualbox => "VIRTUALBOX",
            Backend::Workstation => "VMWARE WORKSTATION",
            Backend::Hyperv => "HYPER-V",
        }
    }

    pub fn default_tool(self) -> &'static str {
        match self {
            Backend::Esxi => "govc",
            Backend::Virtualbox => "VBoxManage",
            Backend::Workstation => "vmrun",
            Backend::Hyperv => "powershell",
        }
    }

    pub fn default_vm(self) -> &'static str {
        match self {
            Backend::Esxi | Backend::Virtualbox => "Windows11",
            Backend::Workstation => "Windows 11 x64/Windows 11 x64.vmx",
            Backend::Hyperv => "TestVM",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub tool: PathBuf,
    pub lifecycle_timeout: Duration,
    pub guest_timeout: Duration,
    // POWER OFF INSTEAD OF ASKING THE GUEST TO SHUT DOWN
    pub hard_stop: bool,
    // esxi ONLY: SDK URL AND CERTIFICATE CHECK
    pub endpoint: Option<String>,
    pub insecure: bool,
}

impl AdapterSettings {
    pub fn defaults(backend: Backend) -> Self {
        Self {
            tool: PathBuf::from(backend.default_tool()),
            lifecycle_timeout: DEFAULT_LIFECYCLE_TIMEOUT,
            guest_timeout: DEFAULT_GUEST_TIMEOUT,
            hard_stop: false,
            endpoint: None,
            insecure: false,
        }
    }
}

pub trait HypervisorAdapter: Send + Sync {
    fn backend(&self) -> Backend;

    fn name(&self) -> &'static str {
        self.backend().label()
    }

    /// Power the VM on. Success does not mean the guest has booted.
    fn start(&self, vm: &str) -> Result<(), LifecycleError>;

    fn stop(&self, vm: &str) -> Result<(), LifecycleError>;

    /// Run `program` inside the guest and block until it exits.
    /// A non-zero guest exit code is `Ok(code)`.
    fn run_guest_program(&self, vm: &str, program: &str) -> Result<i32, GuestExecError>;
}

pub fn build(
    backend: Backend,
    settings: AdapterSettings,
    secrets: Arc<dyn SecretProvider>,
) -> Arc<dyn HypervisorAdapter> {
    match backend {
        Backend::Esxi => Arc::new(EsxiAdapter::new(settings, secrets)),
        Backend::Virtualbox => Arc::new(VirtualboxAdapter::new(settings, secrets)),
        Backend::Workstation => Arc::new(WorkstationAdapter::new(settings, secrets)),
        Backend::Hyperv => Arc::new(HypervAdapter::new(settings, secrets)),
    }
}

// SHARED PLUMBING: TURN A BUILT COMMAND INTO THE ADAPTER ERROR TYPES

fn lifecycle(
    action: LifecycleAction,
    vm: &str,
    cmd: Result<Command, SecretError>,
    timeout: Duration,
) -> Result<(), LifecycleError> {
    let cmd = cmd.map_err(|source| LifecycleError::Credentials {
        action,
        vm: vm.to_string(),
        source,
    })?;
    tracing::debug!(tool = %process::tool_name(&cmd), %action, vm, "control tool");
    process::run_checked(cmd, timeout)
        .map(|_| ())
        .map_err(|cause| LifecycleError::Tool {
            action,
            vm: vm.to_string(),
            cause,
        })
}

fn guest_exec(
    vm: &str,
    program: &str,
    cmd: Result<Command, SecretError>,
    timeout: Duration,
) -> Result<i32, GuestExecError> {
    let cmd = cmd.map_err(|source| GuestExecError::Credentials {
        vm: vm.to_string(),
        program: program.to_string(),
        source,
    })?;
    let tool = process::tool_name(&cmd);
    tracing::debug!(%tool, vm, program, "guest exec");
    let tool_err = |cause: ToolError| GuestExecError::Tool {
        vm: vm.to_string(),
        program: program.to_string(),
        cause,
    };
    let out = process::run(cmd, timeout).map_err(tool_err)?;
    // NO CODE MEANS THE TOOL DIED ON A SIGNAL: THE GUEST RESULT IS UNKNOWN
    match out.status.code() {
        Some(code) => Ok(code),
        None => Err(tool_err(ToolError::Failed {
            tool,
            status: out.status,
            stderr: out.stderr.trim().to_string(),
        })),
    }
}

// VMBENCH ERROR TAXONOMY
// ONE TYPE PER FAILURE CLASS. THE ORCHESTRATOR APPLIES A DIFFERENT POLICY
// TO EACH: ABORT, LOG-AND-CONTINUE, OR LOG-AND-TEARDOWN. NONE ARE RETRIED.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::adapter::Backend;

/// Failure of a single control-tool invocation (`govc`, `VBoxManage`, `vmrun`, `powershell`).
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("failed to launch {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("{tool} did not finish within {timeout:?} and was killed")]
    Timeout { tool: String, timeout: Duration },

    #[error("failed to wait for {tool}: {source}")]
    Wait {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("{tool} failed ({status}): {stderr}")]
    Failed {
        tool: String,
        status: ExitStatus,
        stderr: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Start,
    Stop,
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleAction::Start => f.write_str("start"),
            LifecycleAction::Stop => f.write_str("stop"),
        }
    }
}

/// VM start/stop failed at the control layer.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("failed to {action} VM {vm}: {cause}")]
    Tool {
        action: LifecycleAction,
        vm: String,
        #[source]
        cause: ToolError,
    },

    #[error("failed to {action} VM {vm}: {source}")]
    Credentials {
        action: LifecycleAction,
        vm: String,
        #[source]
        source: SecretError,
    },
}

/// A guest program could not be launched or observed. A non-zero guest
/// exit code is NOT an error; adapters return it as `Ok(code)`.
#[derive(Error, Debug)]
pub enum GuestExecError {
    #[error("guest program {program} on VM {vm}: {cause}")]
    Tool {
        vm: String,
        program: String,
        #[source]
        cause: ToolError,
    },

    #[error("guest program {program} on VM {vm}: {source}")]
    Credentials {
        vm: String,
        program: String,
        #[source]
        source: SecretError,
    },

    #[error("guest program {program} on VM {vm}: failed to stage the password file: {source}")]
    PasswordFile {
        vm: String,
        program: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Error, Debug)]
pub enum SamplingError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed {path:?}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("host counters are not available on {0}")]
    Unsupported(&'static str),

    #[error("{counter} went backwards: {current} < baseline {baseline}")]
    CounterRegressed {
        counter: &'static str,
        baseline: u64,
        current: u64,
    },

    #[error("failed to spawn sampler thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("sampler did not exit within {0:?} of the stop signal")]
    Hung(Duration),

    #[error("sampler thread panicked")]
    Panicked,
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

#[derive(Error, Debug)]
#[error("result file {path:?} not found")]
pub struct NotFoundError {
    pub path: PathBuf,
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to decode {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("no {backend} credentials: environment variable {var} is not set")]
    Missing { backend: Backend, var: String },

    #[error("no {backend} credentials: environment variable {var} is not valid unicode")]
    NotUnicode { backend: Backend, var: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },
}

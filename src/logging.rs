// VMBENCH LOGGING
// ONE PROCESS-WIDE SUBSCRIBER: HUMAN LINES ON STDERR, PLUS AN APPEND-ONLY
// PLAIN-TEXT FILE. EVERY LINE EMITTED DURING A RUN CARRIES run{backend=..}.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::adapter::Backend;

pub const DEFAULT_LOG_FILE: &str = "logs/vmbench.log";

// RUST_LOG WINS OVER --verbose
pub fn init(verbose: bool, log_file: Option<&Path>) -> io::Result<()> {
    let default = if verbose { "vmbench=debug" } else { "vmbench=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

// THE LOG HANDLE FOR ONE ORCHESTRATOR RUN. THE SAMPLER THREAD ENTERS A CLONE.
pub fn run_span(backend: Backend) -> Span {
    tracing::info_span!("run", backend = %backend)
}

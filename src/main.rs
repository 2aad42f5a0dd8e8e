// VMBENCH -- HYPERVISOR BENCHMARK AUTOMATION
// ESXI / VIRTUALBOX / VMWARE WORKSTATION / HYPER-V
//
// run     START VM, SAMPLE HOST WHILE GUEST PROGRAMS RUN, SAVE, STOP VM
// sample  SAMPLE THIS HOST ONLY, UNTIL CTRL+C
// report  COMPARE SAVED RESULTS
// check   VERIFY CONTROL TOOLS, CREDENTIALS, /proc, DATA DIR

mod cli;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use vmbench::adapter::Backend;
use vmbench::clock::StopSignal;
use vmbench::config::{Config, DEFAULT_CONFIG_FILE};
use vmbench::logging;

#[derive(Parser)]
#[command(name = "vmbench")]
#[command(about = "VMBENCH -- HYPERVISOR BENCHMARK AUTOMATION")]
struct Cli {
    // TOML CONFIG (DEFAULT: ./vmbench.toml IF PRESENT)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    // DEBUG-LEVEL LOGGING (RUST_LOG OVERRIDES)
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    #[command(about = "Benchmark one or more backends")]
    Run {
        backends: Vec<Backend>,

        // EVERY BACKEND, ONE AFTER ANOTHER
        #[arg(long, conflicts_with = "backends")]
        all: bool,

        // OVERRIDE THE POST-START SETTLE DELAY
        #[arg(long)]
        settle_secs: Option<f64>,

        // KEEP SAMPLING AT LEAST THIS LONG
        #[arg(long)]
        min_sampling_secs: Option<f64>,
    },

    #[command(about = "Sample this host until Ctrl+C")]
    Sample {
        #[arg(long, default_value = "data/host_samples.csv")]
        output: PathBuf,

        #[arg(long)]
        cadence_secs: Option<f64>,

        // STOP AFTER THIS MANY SECONDS INSTEAD OF WAITING FOR CTRL+C
        #[arg(long)]
        duration_secs: Option<f64>,
    },

    #[command(about = "Compare saved results")]
    Report {
        // DEFAULT: ALL BACKENDS
        backends: Vec<Backend>,

        // ALSO DRAW A CPU/MEMORY TIMELINE PER BACKEND
        #[arg(long)]
        timeline: bool,
    },

    #[command(about = "Check control tools, credentials and host counters")]
    Check,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let explicit = cli.config.is_some();
    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut config = Config::load(&config_path, explicit)?;

    let log_file = Some(config.log_file.as_path()).filter(|p| !p.as_os_str().is_empty());
    logging::init(cli.verbose, log_file)
        .with_context(|| format!("failed to open log file {}", config.log_file.display()))?;

    // CTRL+C NEVER CUTS A RUN SHORT: IT ONLY STOPS FURTHER WORK FROM STARTING
    let interrupt = StopSignal::new();
    let handler_signal = interrupt.clone();
    ctrlc::set_handler(move || handler_signal.raise())?;

    let ok = match cli.command {
        Cmd::Run {
            backends,
            all,
            settle_secs,
            min_sampling_secs,
        } => {
            if let Some(s) = settle_secs {
                config.settle_secs = s;
                for b in Backend::ALL {
                    config.backend_mut(b).settle_secs = None;
                }
            }
            if let Some(s) = min_sampling_secs {
                config.min_sampling_secs = s;
                for b in Backend::ALL {
                    config.backend_mut(b).min_sampling_secs = None;
                }
            }
            config.validate()?;
            let backends = if all || backends.is_empty() {
                Backend::ALL.to_vec()
            } else {
                backends
            };
            cli::run::run_benchmarks(&config, &backends, &interrupt)?
        }
        Cmd::Sample {
            output,
            cadence_secs,
            duration_secs,
        } => {
            if let Some(c) = cadence_secs {
                config.cadence_secs = c;
            }
            config.validate()?;
            cli::sample::run_sample(&config, &output, duration_secs, &interrupt)?
        }
        Cmd::Report { backends, timeline } => {
            let backends = if backends.is_empty() {
                Backend::ALL.to_vec()
            } else {
                backends
            };
            cli::report::run_report(&config, &backends, timeline)?
        }
        Cmd::Check => cli::check::run_check(&config)?,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

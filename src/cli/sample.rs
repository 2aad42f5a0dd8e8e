use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use vmbench::clock::{StopSignal, SystemClock, STOP_POLL};
use vmbench::config::Config;
use vmbench::counters::ProcCounters;
use vmbench::render::{self, summarize};
use vmbench::sampler::Sampler;
use vmbench::store::ResultStore;

// SAMPLER ONLY, NO VM. USEFUL FOR A BARE-HOST BASELINE.
pub fn run_sample(
    config: &Config,
    output: &Path,
    duration_secs: Option<f64>,
    interrupt: &StopSignal,
) -> Result<bool> {
    let cadence = Duration::try_from_secs_f64(config.cadence_secs)
        .context("cadence_secs out of range")?;
    let limit = duration_secs
        .map(Duration::try_from_secs_f64)
        .transpose()
        .context("--duration-secs must be a non-negative number")?;

    let source = ProcCounters::host()?;
    let stop = StopSignal::new();
    let handle = Sampler::new(Box::new(source), Arc::new(SystemClock::new())).spawn(
        "sampler-host".to_string(),
        stop.clone(),
        cadence,
        tracing::info_span!("sample"),
    )?;

    match limit {
        Some(d) => println!("SAMPLING HOST EVERY {:?} FOR {:?} (CTRL+C TO STOP EARLY)", cadence, d),
        None => println!("SAMPLING HOST EVERY {:?} (CTRL+C TO STOP)", cadence),
    }

    let t0 = Instant::now();
    while !interrupt.is_raised() && !handle.is_finished() {
        if limit.map_or(false, |d| t0.elapsed() >= d) {
            break;
        }
        std::thread::sleep(STOP_POLL);
    }
    stop.raise();

    let samples = match handle.join() {
        Ok(r) => r?,
        Err(_) => anyhow::bail!("sampler thread panicked"),
    };

    ResultStore::new(output).save(&samples)?;
    println!("{} SAMPLES SAVED TO {}", samples.len(), output.display());

    if let Some(s) = summarize(&samples) {
        println!("  CPU:     MEAN {:.1}%  PEAK {:.1}%", s.cpu_mean, s.cpu_peak);
        println!("  MEMORY:  MEAN {:.1}%  PEAK {:.1}%", s.memory_mean, s.memory_peak);
        println!(
            "  DISK:    READ {}  WRITE {}",
            render::fmt_bytes(s.disk_read_bytes),
            render::fmt_bytes(s.disk_write_bytes)
        );
        println!(
            "  NET:     SENT {}  RECV {}",
            render::fmt_bytes(s.net_bytes_sent),
            render::fmt_bytes(s.net_bytes_recv)
        );
    }
    Ok(true)
}

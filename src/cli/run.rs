use std::sync::Arc;

use anyhow::Result;

use vmbench::adapter::{self, Backend};
use vmbench::clock::{StopSignal, SystemClock};
use vmbench::config::Config;
use vmbench::counters::{CounterSource, ProcCounters};
use vmbench::error::SamplingError;
use vmbench::orchestrator::{CounterFactory, Orchestrator, RunReport, RunState};
use vmbench::secrets::{EnvSecrets, SecretProvider};

fn host_counters() -> CounterFactory {
    Box::new(|| -> Result<Box<dyn CounterSource>, SamplingError> {
        Ok(Box::new(ProcCounters::host()?))
    })
}

fn history(states: &[RunState]) -> String {
    states
        .iter()
        .map(|s| format!("{:?}", s).to_uppercase())
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn print_report(report: &RunReport) {
    let label = report.backend.label();
    println!();
    println!("{}", "=".repeat(60));
    if report.completed() {
        println!("{} RUN COMPLETE", label);
    } else {
        println!("{} RUN ABORTED", label);
    }
    println!("{}", "=".repeat(60));
    println!("  STATES:          {}", history(&report.history));
    println!(
        "  PROGRAMS:        {} ({} FAILED)",
        report.outcomes.len(),
        report.failed_programs()
    );
    for o in &report.outcomes {
        let status = match (o.exit_status, &o.error) {
            (Some(0), _) => "OK".to_string(),
            (Some(code), _) => format!("EXIT {}", code),
            (None, Some(e)) => format!("FAILED: {}", e),
            (None, None) => "FAILED".to_string(),
        };
        println!("    {:<40} {:>8.1}s  {}", o.program, o.duration.as_secs_f64(), status);
    }
    println!("  SAMPLES:         {}", report.samples);
    if report.persisted {
        println!("  RESULTS:         {}", report.results.display());
    } else {
        println!("  RESULTS:         NOT SAVED");
    }
    for e in &report.errors {
        println!("  ERROR:           {}", e);
    }
}

// RUNS ARE SERIAL. CTRL+C IS CHECKED ONLY BETWEEN BACKENDS.
pub fn run_benchmarks(config: &Config, backends: &[Backend], interrupt: &StopSignal) -> Result<bool> {
    let secrets: Arc<dyn SecretProvider> = Arc::new(EnvSecrets);
    let mut all_ok = true;

    println!("VMBENCH");
    println!("BACKENDS:        {}", backends.iter().map(|b| b.id()).collect::<Vec<_>>().join(", "));
    println!("CADENCE:         {}s", config.cadence_secs);
    println!("LOG FILE:        {}", config.log_file.display());
    println!();

    for (i, &backend) in backends.iter().enumerate() {
        if interrupt.is_raised() {
            println!(
                "INTERRUPTED -- SKIPPING {} REMAINING BACKEND(S)",
                backends.len() - i
            );
            all_ok = false;
            break;
        }

        let plan = config.plan(backend)?;
        let settings = config.adapter_settings(backend)?;

        println!("{} -- VM {}", backend.label(), plan.vm);
        if plan.programs.is_empty() {
            println!("  NO GUEST PROGRAMS CONFIGURED ([{}] programs)", backend.id());
        }
        println!("  SETTLE {:.0}s, THEN SAMPLING (CTRL+C SKIPS LATER BACKENDS)", plan.settle_delay.as_secs_f64());

        let adapter = adapter::build(backend, settings, Arc::clone(&secrets));
        let report = Orchestrator::new(adapter, host_counters(), Arc::new(SystemClock::new()), plan).run();
        print_report(&report);

        if !report.completed() || !report.errors.is_empty() {
            all_ok = false;
        }
    }

    println!();
    println!("VMBENCH OUT.");
    Ok(all_ok)
}

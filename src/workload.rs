// VMBENCH WORKLOAD RUNNER
// RUNS THE GUEST PROGRAMS STRICTLY IN ORDER. A FAILED OR NON-ZERO PROGRAM
// IS RECORDED AND THE NEXT ONE STILL RUNS.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::adapter::HypervisorAdapter;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadOutcome {
    pub program: String,
    // NONE WHEN THE PROGRAM COULD NOT BE LAUNCHED OR OBSERVED
    pub exit_status: Option<i32>,
    pub error: Option<String>,
    pub duration: Duration,
}

impl WorkloadOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_status == Some(0)
    }
}

pub struct WorkloadRunner;

impl WorkloadRunner {
    pub fn run_all(
        adapter: &dyn HypervisorAdapter,
        vm: &str,
        programs: &[String],
    ) -> Vec<WorkloadOutcome> {
        let mut outcomes = Vec::with_capacity(programs.len());

        for (i, program) in programs.iter().enumerate() {
            info!(program = %program, step = i + 1, of = programs.len(), "guest program starting");
            let t0 = Instant::now();
            let result = adapter.run_guest_program(vm, program);
            let duration = t0.elapsed();

            let outcome = match result {
                Ok(code) => {
                    if code == 0 {
                        info!(program = %program, secs = duration.as_secs_f64(), "guest program finished");
                    } else {
                        warn!(program = %program, code, "guest program exited non-zero");
                    }
                    WorkloadOutcome {
                        program: program.clone(),
                        exit_status: Some(code),
                        error: None,
                        duration,
                    }
                }
                Err(e) => {
                    warn!(program = %program, "{}", e);
                    WorkloadOutcome {
                        program: program.clone(),
                        exit_status: None,
                        error: Some(e.to_string()),
                        duration,
                    }
                }
            };
            outcomes.push(outcome);
        }

        outcomes
    }
}

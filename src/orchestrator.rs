// VMBENCH TEST ORCHESTRATOR
// START -> SETTLE -> SAMPLE WHILE THE WORKLOAD RUNS -> STOP SAMPLER ->
// PERSIST -> STOP VM.
//
// ORDERING:
//   THE STOP SIGNAL IS RAISED ONLY AFTER THE WORKLOAD RUNNER RETURNS.
//   THE SAMPLE SEQUENCE IS TOUCHED ONLY AFTER THE SAMPLER IS JOINED.
//   ONCE start() SUCCEEDS, stop() IS CALLED EXACTLY ONCE, WHATEVER FAILS.
// NOTHING IS RETRIED. run() NEVER FAILS: EVERY ERROR LANDS IN THE REPORT.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn, Span};

use crate::adapter::{Backend, HypervisorAdapter};
use crate::clock::{Clock, StopSignal, STOP_POLL};
use crate::counters::CounterSource;
use crate::error::SamplingError;
use crate::logging;
use crate::sample::SampleSequence;
use crate::sampler::{Sampler, SamplerHandle};
use crate::store::ResultStore;
use crate::workload::{WorkloadOutcome, WorkloadRunner};

const JOIN_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Starting,
    Warming,
    SamplingRunning,
    Stopping,
    Persisted,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct RunPlan {
    pub vm: String,
    pub programs: Vec<String>,
    pub settle_delay: Duration,
    pub cadence: Duration,
    // KEEP SAMPLING AT LEAST THIS LONG AFTER THE SAMPLER STARTS
    pub min_sampling: Duration,
    // NONE WAITS FOREVER
    pub sampler_join_timeout: Option<Duration>,
    pub results: PathBuf,
}

#[derive(Debug)]
pub struct RunReport {
    pub backend: Backend,
    pub state: RunState,
    pub history: Vec<RunState>,
    pub outcomes: Vec<WorkloadOutcome>,
    pub samples: usize,
    pub persisted: bool,
    pub results: PathBuf,
    pub errors: Vec<String>,
}

impl RunReport {
    fn new(backend: Backend, results: PathBuf) -> Self {
        Self {
            backend,
            state: RunState::Idle,
            history: vec![RunState::Idle],
            outcomes: Vec::new(),
            samples: 0,
            persisted: false,
            results,
            errors: Vec::new(),
        }
    }

    fn enter(&mut self, state: RunState) {
        info!(from = ?self.state, to = ?state, "state");
        self.state = state;
        self.history.push(state);
    }

    fn record(&mut self, err: impl std::fmt::Display) {
        self.errors.push(err.to_string());
    }

    pub fn completed(&self) -> bool {
        self.state == RunState::Idle && self.history.len() > 1
    }

    pub fn failed_programs(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.succeeded()).count()
    }
}

/// Builds a fresh counter source for each run, on the orchestrator thread,
/// only once the VM is up.
pub type CounterFactory =
    Box<dyn Fn() -> Result<Box<dyn CounterSource>, SamplingError> + Send + Sync>;

pub struct Orchestrator {
    adapter: Arc<dyn HypervisorAdapter>,
    counters: CounterFactory,
    clock: Arc<dyn Clock>,
    plan: RunPlan,
    store: ResultStore,
    span: Span,
}

impl Orchestrator {
    pub fn new(
        adapter: Arc<dyn HypervisorAdapter>,
        counters: CounterFactory,
        clock: Arc<dyn Clock>,
        plan: RunPlan,
    ) -> Self {
        let span = logging::run_span(adapter.backend());
        let store = ResultStore::new(plan.results.clone());
        Self {
            adapter,
            counters,
            clock,
            plan,
            store,
            span,
        }
    }

    pub fn run(self) -> RunReport {
        let span = self.span.clone();
        let _enter = span.enter();
        let backend = self.adapter.backend();
        let vm = self.plan.vm.as_str();
        let mut report = RunReport::new(backend, self.plan.results.clone());

        info!(vm, programs = self.plan.programs.len(), "{} RUN", backend.label());

        report.enter(RunState::Starting);
        if let Err(e) = self.adapter.start(vm) {
            error!("{}", e);
            report.record(e);
            report.enter(RunState::Aborted);
            return report;
        }

        report.enter(RunState::Warming);
        if !self.plan.settle_delay.is_zero() {
            info!(secs = self.plan.settle_delay.as_secs_f64(), "waiting for guest to settle");
            self.clock.sleep(self.plan.settle_delay);
        }

        report.enter(RunState::SamplingRunning);
        let sampled = self.sample_while_running(&mut report);

        // SAMPLER IS GONE (JOINED OR DETACHED) FROM HERE ON
        if report.state != RunState::Stopping {
            report.enter(RunState::Stopping);
        }

        let sampled_ok = match sampled {
            Ok(samples) => {
                report.samples = samples.len();
                match self.store.save(&samples) {
                    Ok(()) => {
                        info!(path = %self.store.path().display(), rows = samples.len(), "results saved");
                        report.persisted = true;
                        report.enter(RunState::Persisted);
                    }
                    Err(e) => {
                        error!("{}; {} samples discarded", e, samples.len());
                        report.record(e);
                    }
                }
                true
            }
            Err(e) => {
                error!("sampling failed, run discarded: {}", e);
                report.record(e);
                false
            }
        };

        if let Err(e) = self.adapter.stop(vm) {
            warn!("{}; VM may still be running", e);
            report.record(e);
        }

        report.enter(if sampled_ok {
            RunState::Idle
        } else {
            RunState::Aborted
        });

        info!(
            samples = report.samples,
            failed_programs = report.failed_programs(),
            errors = report.errors.len(),
            "run finished"
        );
        report
    }

    fn sample_while_running(
        &self,
        report: &mut RunReport,
    ) -> Result<SampleSequence, SamplingError> {
        let source = (self.counters)()?;
        let stop = StopSignal::new();
        let handle = Sampler::new(source, Arc::clone(&self.clock)).spawn(
            format!("sampler-{}", self.adapter.backend()),
            stop.clone(),
            self.plan.cadence,
            self.span.clone(),
        )?;
        let began = self.clock.now();

        report.outcomes = WorkloadRunner::run_all(self.adapter.as_ref(), &self.plan.vm, &self.plan.programs);

        // HOLD THE OBSERVATION WINDOW OPEN UNLESS THE SAMPLER ALREADY DIED
        while !handle.is_finished() {
            let elapsed = self.clock.now().saturating_sub(began);
            if elapsed >= self.plan.min_sampling {
                break;
            }
            self.clock.sleep((self.plan.min_sampling - elapsed).min(STOP_POLL));
        }

        stop.raise();
        report.enter(RunState::Stopping);
        join_sampler(handle, self.plan.sampler_join_timeout)
    }
}

// JOIN WITH A REAL-TIME WATCHDOG. ON EXPIRY THE HANDLE IS DROPPED, WHICH
// DETACHES THE THREAD; IT EXITS ON ITS OWN ONCE ITS READ RETURNS.
fn join_sampler(
    handle: SamplerHandle,
    timeout: Option<Duration>,
) -> Result<SampleSequence, SamplingError> {
    if let Some(limit) = timeout {
        let deadline = Instant::now() + limit;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                return Err(SamplingError::Hung(limit));
            }
            thread::sleep(JOIN_POLL);
        }
    }
    handle.join().map_err(|_| SamplingError::Panicked)?
}

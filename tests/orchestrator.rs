// ORCHESTRATOR INTEGRATION TESTS
// STUB ADAPTER + FAKE COUNTERS. THE GATED CLOCK ONLY LETS VIRTUAL TIME
// ADVANCE AS FAR AS THE STUB WORKLOAD GRANTS, WHICH PINS THE SAMPLE COUNT.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use vmbench::adapter::{Backend, HypervisorAdapter};
use vmbench::clock::{Clock, SystemClock};
use vmbench::counters::{CounterSource, HostReading};
use vmbench::error::{GuestExecError, LifecycleAction, LifecycleError, SamplingError, ToolError};
use vmbench::orchestrator::{CounterFactory, Orchestrator, RunPlan, RunState};
use vmbench::store::ResultStore;

// ---------------------------------------------------------------------------
// GATED CLOCK
// ---------------------------------------------------------------------------

#[derive(Default)]
struct GatedClock {
    // (now, granted)
    state: Mutex<(Duration, Duration)>,
}

impl GatedClock {
    fn grant(&self, d: Duration) {
        self.state.lock().unwrap().1 += d;
    }
}

impl Clock for GatedClock {
    fn now(&self) -> Duration {
        self.state.lock().unwrap().0
    }

    fn sleep(&self, dur: Duration) {
        if dur.is_zero() {
            return;
        }
        let moved = {
            let mut st = self.state.lock().unwrap();
            let next = (st.0 + dur).min(st.1);
            let moved = next > st.0;
            st.0 = next;
            moved
        };
        if !moved {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

// ---------------------------------------------------------------------------
// FAKE COUNTERS
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Shared {
    reads: AtomicUsize,
    factory_calls: AtomicUsize,
}

struct FakeCounters {
    shared: Arc<Shared>,
    fail_at: Option<usize>,
    stall_at: Option<(usize, Duration)>,
}

impl CounterSource for FakeCounters {
    fn read(&mut self) -> Result<HostReading, SamplingError> {
        let n = self.shared.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_at == Some(n) {
            return Err(SamplingError::Read {
                path: "/proc/diskstats".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "gone"),
            });
        }
        if let Some((at, d)) = self.stall_at {
            if n == at {
                thread::sleep(d);
            }
        }
        let b = n as u64 * 4096;
        Ok(HostReading {
            cpu_percent: 25.0,
            memory_percent: 60.0,
            disk_read_bytes: b,
            disk_write_bytes: b,
            net_bytes_sent: b,
            net_bytes_recv: b,
        })
    }
}

fn factory(
    shared: &Arc<Shared>,
    fail_at: Option<usize>,
    stall_at: Option<(usize, Duration)>,
) -> CounterFactory {
    let shared = Arc::clone(shared);
    Box::new(move || -> Result<Box<dyn CounterSource>, SamplingError> {
        shared.factory_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeCounters {
            shared: Arc::clone(&shared),
            fail_at,
            stall_at,
        }))
    })
}

// ---------------------------------------------------------------------------
// STUB ADAPTER
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Stub {
    fail_start: bool,
    fail_stop: bool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    // WHEN SET, PROGRAMS A AND B EACH RELEASE ONE CADENCE OF VIRTUAL TIME
    gate: Option<(Arc<GatedClock>, Arc<Shared>)>,
    ran: Mutex<Vec<String>>,
}

fn wait_for_reads(shared: &Shared, n: usize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while shared.reads.load(Ordering::SeqCst) < n {
        assert!(Instant::now() < deadline, "sampler never reached read {}", n);
        thread::sleep(Duration::from_millis(1));
    }
}

fn timeout(tool: &str) -> ToolError {
    ToolError::Timeout {
        tool: tool.to_string(),
        timeout: Duration::from_secs(120),
    }
}

impl HypervisorAdapter for Stub {
    fn backend(&self) -> Backend {
        Backend::Virtualbox
    }

    fn start(&self, vm: &str) -> Result<(), LifecycleError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(LifecycleError::Tool {
                action: LifecycleAction::Start,
                vm: vm.to_string(),
                cause: timeout("VBoxManage"),
            });
        }
        Ok(())
    }

    fn stop(&self, vm: &str) -> Result<(), LifecycleError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            return Err(LifecycleError::Tool {
                action: LifecycleAction::Stop,
                vm: vm.to_string(),
                cause: timeout("VBoxManage"),
            });
        }
        Ok(())
    }

    fn run_guest_program(&self, _vm: &str, program: &str) -> Result<i32, GuestExecError> {
        self.ran.lock().unwrap().push(program.to_string());
        if let Some((clock, shared)) = &self.gate {
            match program {
                // ONE CADENCE PER PROGRAM; WAIT UNTIL THE SAMPLER HAS USED IT
                "A" => {
                    clock.grant(Duration::from_secs(1));
                    wait_for_reads(shared, 3);
                }
                "B" => {
                    clock.grant(Duration::from_secs(1));
                    wait_for_reads(shared, 4);
                }
                _ => {}
            }
        }
        Ok(0)
    }
}

fn plan(results: PathBuf, programs: &[&str]) -> RunPlan {
    RunPlan {
        vm: "Windows11".to_string(),
        programs: programs.iter().map(|p| p.to_string()).collect(),
        settle_delay: Duration::ZERO,
        cadence: Duration::from_secs(1),
        min_sampling: Duration::ZERO,
        sampler_join_timeout: Some(Duration::from_secs(10)),
        results,
    }
}

// ---------------------------------------------------------------------------
// SCENARIOS
// ---------------------------------------------------------------------------

#[test]
fn full_run_persists_three_samples() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("data/virtualbox_results.csv");
    let clock = Arc::new(GatedClock::default());
    let shared = Arc::new(Shared::default());
    let stub = Arc::new(Stub {
        gate: Some((Arc::clone(&clock), Arc::clone(&shared))),
        ..Stub::default()
    });

    let report = Orchestrator::new(
        stub.clone(),
        factory(&shared, None, None),
        clock,
        plan(results.clone(), &["A", "B", "C"]),
    )
    .run();

    assert_eq!(report.state, RunState::Idle);
    assert!(report.completed());
    assert_eq!(
        report.history,
        vec![
            RunState::Idle,
            RunState::Starting,
            RunState::Warming,
            RunState::SamplingRunning,
            RunState::Stopping,
            RunState::Persisted,
            RunState::Idle,
        ]
    );
    assert_eq!(*stub.ran.lock().unwrap(), vec!["A", "B", "C"]);
    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.failed_programs(), 0);
    assert_eq!(stub.starts.load(Ordering::SeqCst), 1);
    assert_eq!(stub.stops.load(Ordering::SeqCst), 1);
    assert!(report.errors.is_empty());
    assert_eq!(report.samples, 3);

    let text = fs::read_to_string(&results).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(
        lines[0],
        "time,cpu,memory,disk_read_bytes,disk_write_bytes,net_bytes_sent,net_bytes_recv"
    );

    let loaded = ResultStore::new(&results).load().unwrap();
    let times: Vec<f64> = loaded.samples.iter().map(|s| s.elapsed_seconds).collect();
    assert_eq!(times, vec![0.0, 1.0, 2.0]);
    assert!(loaded.samples.is_monotonic());
}

#[test]
fn start_failure_aborts_before_sampling() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("esxi_results.csv");
    let shared = Arc::new(Shared::default());
    let stub = Arc::new(Stub {
        fail_start: true,
        ..Stub::default()
    });

    let report = Orchestrator::new(
        stub.clone(),
        factory(&shared, None, None),
        Arc::new(SystemClock::new()),
        plan(results.clone(), &["A"]),
    )
    .run();

    assert_eq!(report.state, RunState::Aborted);
    assert_eq!(
        report.history,
        vec![RunState::Idle, RunState::Starting, RunState::Aborted]
    );
    assert_eq!(shared.factory_calls.load(Ordering::SeqCst), 0);
    assert_eq!(shared.reads.load(Ordering::SeqCst), 0);
    assert!(stub.ran.lock().unwrap().is_empty());
    assert_eq!(stub.stops.load(Ordering::SeqCst), 0);
    assert!(!results.exists());
    assert_eq!(report.errors.len(), 1);
}

#[test]
fn persistence_failure_still_stops_vm_once() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    fs::write(&blocker, b"x").unwrap();
    let shared = Arc::new(Shared::default());
    let stub = Arc::new(Stub::default());

    let report = Orchestrator::new(
        stub.clone(),
        factory(&shared, None, None),
        Arc::new(SystemClock::new()),
        plan(blocker.join("results.csv"), &[]),
    )
    .run();

    assert_eq!(stub.stops.load(Ordering::SeqCst), 1);
    assert!(!report.persisted);
    assert!(report.samples >= 1);
    assert_eq!(report.errors.len(), 1);
    assert!(!report.history.contains(&RunState::Persisted));
    assert_eq!(report.state, RunState::Idle);
}

#[test]
fn sampler_failure_discards_run_but_tears_down() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("r.csv");
    let shared = Arc::new(Shared::default());
    let stub = Arc::new(Stub::default());

    let report = Orchestrator::new(
        stub.clone(),
        factory(&shared, Some(2), None),
        Arc::new(SystemClock::new()),
        plan(results.clone(), &["A", "B"]),
    )
    .run();

    assert_eq!(report.state, RunState::Aborted);
    assert_eq!(stub.stops.load(Ordering::SeqCst), 1);
    // WORKLOAD STILL RAN TO COMPLETION
    assert_eq!(report.outcomes.len(), 2);
    assert!(!results.exists());
    assert!(report.errors[0].contains("/proc/diskstats"));
    assert_eq!(
        &report.history[report.history.len() - 2..],
        &[RunState::Stopping, RunState::Aborted]
    );
}

#[test]
fn counter_source_unavailable_skips_workload() {
    let dir = tempfile::tempdir().unwrap();
    let stub = Arc::new(Stub::default());
    let unsupported: CounterFactory =
        Box::new(|| -> Result<Box<dyn CounterSource>, SamplingError> {
            Err(SamplingError::Unsupported("plan9"))
        });

    let report = Orchestrator::new(
        stub.clone(),
        unsupported,
        Arc::new(SystemClock::new()),
        plan(dir.path().join("r.csv"), &["A"]),
    )
    .run();

    assert_eq!(report.state, RunState::Aborted);
    assert!(report.outcomes.is_empty());
    assert_eq!(stub.stops.load(Ordering::SeqCst), 1);
}

#[test]
fn hung_sampler_is_detached_after_join_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("r.csv");
    let shared = Arc::new(Shared::default());
    let stub = Arc::new(Stub::default());
    let mut p = plan(results.clone(), &[]);
    p.sampler_join_timeout = Some(Duration::from_millis(100));

    let t0 = Instant::now();
    let report = Orchestrator::new(
        stub.clone(),
        // SECOND READ BLOCKS FAR LONGER THAN THE WATCHDOG
        factory(&shared, None, Some((2, Duration::from_secs(3)))),
        Arc::new(SystemClock::new()),
        p,
    )
    .run();

    assert!(t0.elapsed() < Duration::from_secs(2));
    assert_eq!(report.state, RunState::Aborted);
    assert_eq!(stub.stops.load(Ordering::SeqCst), 1);
    assert!(report.errors[0].contains("did not exit"));
    assert!(!results.exists());
}

#[test]
fn stop_failure_is_reported_but_run_completes() {
    let dir = tempfile::tempdir().unwrap();
    let shared = Arc::new(Shared::default());
    let stub = Arc::new(Stub {
        fail_stop: true,
        ..Stub::default()
    });

    let report = Orchestrator::new(
        stub.clone(),
        factory(&shared, None, None),
        Arc::new(SystemClock::new()),
        plan(dir.path().join("r.csv"), &[]),
    )
    .run();

    assert!(report.completed());
    assert!(report.persisted);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("failed to stop VM Windows11"));
}

#[test]
fn min_sampling_holds_the_window_open() {
    let dir = tempfile::tempdir().unwrap();
    let shared = Arc::new(Shared::default());
    let mut p = plan(dir.path().join("r.csv"), &[]);
    p.cadence = Duration::from_millis(50);
    p.min_sampling = Duration::from_millis(300);

    let t0 = Instant::now();
    let report = Orchestrator::new(
        Arc::new(Stub::default()),
        factory(&shared, None, None),
        Arc::new(SystemClock::new()),
        p,
    )
    .run();

    assert!(t0.elapsed() >= Duration::from_millis(300));
    assert!(report.completed());
    assert!(report.samples >= 3);
}

// VMBENCH SAMPLER
// ONE DEDICATED THREAD PER RUN. CAPTURES A BASELINE, THEN APPENDS ONE
// NORMALIZED SAMPLE PER CADENCE UNTIL THE STOP SIGNAL IS SEEN.
//
// THE FIRST SAMPLE IS TAKEN BEFORE THE FIRST STOP CHECK, SO EVERY RUN
// YIELDS AT LEAST ONE ROW. THE STOP CHECK NEVER INTERRUPTS A CAPTURE.
// A FAILED READ ENDS THE RUN: A GARBLED ROW WOULD BREAK MONOTONICITY.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, Span};

use crate::clock::{wait_or_stop, Clock, StopSignal};
use crate::counters::{CounterSource, HostReading};
use crate::error::SamplingError;
use crate::sample::{Sample, SampleSequence};

pub type SamplerHandle = JoinHandle<Result<SampleSequence, SamplingError>>;

pub struct Sampler {
    source: Box<dyn CounterSource>,
    clock: Arc<dyn Clock>,
}

impl Sampler {
    pub fn new(source: Box<dyn CounterSource>, clock: Arc<dyn Clock>) -> Self {
        Self { source, clock }
    }

    pub fn run(mut self, stop: &StopSignal, cadence: Duration) -> Result<SampleSequence, SamplingError> {
        let baseline = self.source.read()?;
        let start = self.clock.now();
        let mut samples = SampleSequence::new();
        debug!(cadence_ms = cadence.as_millis() as u64, "sampler baseline captured");

        loop {
            let reading = self.source.read()?;
            let elapsed = self.clock.now().saturating_sub(start);
            samples.push(normalize(&baseline, &reading, elapsed)?);

            if wait_or_stop(self.clock.as_ref(), stop, cadence) {
                break;
            }
        }

        info!(samples = samples.len(), "sampler stopped");
        Ok(samples)
    }

    // RUN ON A NAMED THREAD INSIDE THE CALLER'S LOG SPAN
    pub fn spawn(
        self,
        name: String,
        stop: StopSignal,
        cadence: Duration,
        span: Span,
    ) -> Result<SamplerHandle, SamplingError> {
        std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                let _enter = span.enter();
                self.run(&stop, cadence)
            })
            .map_err(SamplingError::Spawn)
    }
}

fn since_baseline(counter: &'static str, baseline: u64, current: u64) -> Result<u64, SamplingError> {
    current
        .checked_sub(baseline)
        .ok_or(SamplingError::CounterRegressed {
            counter,
            baseline,
            current,
        })
}

pub fn normalize(
    baseline: &HostReading,
    current: &HostReading,
    elapsed: Duration,
) -> Result<Sample, SamplingError> {
    Ok(Sample {
        elapsed_seconds: elapsed.as_secs_f64(),
        cpu_percent: current.cpu_percent.clamp(0.0, 100.0),
        memory_percent: current.memory_percent.clamp(0.0, 100.0),
        disk_read_bytes: since_baseline("disk_read_bytes", baseline.disk_read_bytes, current.disk_read_bytes)?,
        disk_write_bytes: since_baseline("disk_write_bytes", baseline.disk_write_bytes, current.disk_write_bytes)?,
        net_bytes_sent: since_baseline("net_bytes_sent", baseline.net_bytes_sent, current.net_bytes_sent)?,
        net_bytes_recv: since_baseline("net_bytes_recv", baseline.net_bytes_recv, current.net_bytes_recv)?,
    })
}

// VMBENCH SAMPLE MODEL
// ONE ROW PER OBSERVATION. CPU/MEMORY ARE POINT-IN-TIME PERCENTAGES,
// DISK/NET ARE BYTES SINCE THE SAMPLER'S BASELINE READING.

use serde::{Deserialize, Serialize};

// COLUMN ORDER OF THE PERSISTED FILE. MATCHES FIELD ORDER OF `Sample`.
pub const CSV_HEADER: [&str; 7] = [
    "time",
    "cpu",
    "memory",
    "disk_read_bytes",
    "disk_write_bytes",
    "net_bytes_sent",
    "net_bytes_recv",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(rename = "time")]
    pub elapsed_seconds: f64,
    #[serde(rename = "cpu")]
    pub cpu_percent: f64,
    #[serde(rename = "memory")]
    pub memory_percent: f64,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
    pub net_bytes_sent: u64,
    pub net_bytes_recv: u64,
}

impl Sample {
    fn counters(&self) -> [u64; 4] {
        [
            self.disk_read_bytes,
            self.disk_write_bytes,
            self.net_bytes_sent,
            self.net_bytes_recv,
        ]
    }
}

/// Append-only sample sequence for one sampler run.
///
/// There is no way to remove or rewrite a sample once pushed. The sampler
/// thread owns the sequence while it runs and hands it over on join.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSequence {
    samples: Vec<Sample>,
}

impl SampleSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    pub fn first(&self) -> Option<&Sample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    // ELAPSED TIME NON-DECREASING AND ALL FOUR CUMULATIVE COUNTERS NON-DECREASING,
    // STEP TO STEP. HOLDS FOR EVERYTHING THE SAMPLER PRODUCES.
    pub fn is_monotonic(&self) -> bool {
        self.samples.windows(2).all(|w| {
            let (a, b) = (&w[0], &w[1]);
            a.elapsed_seconds <= b.elapsed_seconds
                && a.counters().iter().zip(b.counters().iter()).all(|(x, y)| x <= y)
        })
    }
}

impl FromIterator<Sample> for SampleSequence {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        Self {
            samples: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a SampleSequence {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

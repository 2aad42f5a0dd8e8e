// VMBENCH TEXT CHARTS
// SUMMARY TABLE ACROSS BACKENDS, '#' BARS FOR MEAN CPU/MEMORY, AND A
// PER-BACKEND TIMELINE. EVERYTHING RETURNS A String; THE CLI PRINTS IT.

use std::fmt::Write;

use crate::adapter::Backend;
use crate::error::LoadError;
use crate::sample::SampleSequence;
use crate::store::LoadedResults;

const BAR_WIDTH: usize = 40;
const MAX_TIMELINE_ROWS: usize = 60;

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub samples: usize,
    pub duration_secs: f64,
    pub cpu_mean: f64,
    pub cpu_peak: f64,
    pub memory_mean: f64,
    pub memory_peak: f64,
    // CUMULATIVE FIELDS: THE LAST ROW IS THE RUN TOTAL
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
    pub net_bytes_sent: u64,
    pub net_bytes_recv: u64,
}

pub fn summarize(samples: &SampleSequence) -> Option<Summary> {
    let first = samples.first()?;
    let last = samples.last()?;
    let n = samples.len() as f64;

    let mut cpu_sum = 0.0;
    let mut mem_sum = 0.0;
    let mut cpu_peak = 0.0f64;
    let mut mem_peak = 0.0f64;
    for s in samples {
        cpu_sum += s.cpu_percent;
        mem_sum += s.memory_percent;
        cpu_peak = cpu_peak.max(s.cpu_percent);
        mem_peak = mem_peak.max(s.memory_percent);
    }

    Some(Summary {
        samples: samples.len(),
        duration_secs: last.elapsed_seconds - first.elapsed_seconds,
        cpu_mean: cpu_sum / n,
        cpu_peak,
        memory_mean: mem_sum / n,
        memory_peak: mem_peak,
        disk_read_bytes: last.disk_read_bytes,
        disk_write_bytes: last.disk_write_bytes,
        net_bytes_sent: last.net_bytes_sent,
        net_bytes_recv: last.net_bytes_recv,
    })
}

pub fn fmt_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut v = bytes as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", v, UNITS[unit])
    }
}

fn bar(pct: f64) -> String {
    let len = ((pct.clamp(0.0, 100.0) / 100.0) * BAR_WIDTH as f64).round() as usize;
    "#".repeat(len)
}

fn bar_chart(out: &mut String, title: &str, rows: &[(Backend, Summary)], pick: fn(&Summary) -> f64) {
    let _ = writeln!(out, "\n{}", title);
    for (backend, s) in rows {
        let v = pick(s);
        let _ = writeln!(out, "  {:<20} {:>6.1}%  {}", backend.label(), v, bar(v));
    }
}

/// One row per backend: loaded, empty, missing or unreadable.
pub fn render_comparison(entries: &[(Backend, Result<LoadedResults, LoadError>)]) -> String {
    let mut out = String::new();
    let mut summaries: Vec<(Backend, Summary)> = Vec::new();

    let _ = writeln!(out, "{}", "=".repeat(96));
    let _ = writeln!(out, "VMBENCH COMPARISON");
    let _ = writeln!(out, "{}", "=".repeat(96));
    let _ = writeln!(
        out,
        "{:<20} {:>7} {:>8} {:>7} {:>7} {:>7} {:>7} {:>11} {:>11}",
        "BACKEND", "SAMPLES", "SECS", "CPU", "CPU^", "MEM", "MEM^", "DISK R/W", "NET TX/RX"
    );
    let _ = writeln!(out, "{}", "-".repeat(96));

    for (backend, loaded) in entries {
        match loaded {
            Ok(loaded) => {
                match summarize(&loaded.samples) {
                    Some(s) => {
                        let _ = writeln!(
                            out,
                            "{:<20} {:>7} {:>8.1} {:>6.1}% {:>6.1}% {:>6.1}% {:>6.1}% {:>11} {:>11}",
                            backend.label(),
                            s.samples,
                            s.duration_secs,
                            s.cpu_mean,
                            s.cpu_peak,
                            s.memory_mean,
                            s.memory_peak,
                            fmt_bytes(s.disk_read_bytes.saturating_add(s.disk_write_bytes)),
                            fmt_bytes(s.net_bytes_sent.saturating_add(s.net_bytes_recv)),
                        );
                        summaries.push((*backend, s));
                    }
                    None => {
                        let _ = writeln!(out, "{:<20} NO SAMPLES", backend.label());
                    }
                }
                if loaded.skipped > 0 {
                    let _ = writeln!(out, "{:<20} ({} MALFORMED ROWS SKIPPED)", "", loaded.skipped);
                }
            }
            Err(LoadError::NotFound(_)) => {
                let _ = writeln!(out, "{:<20} RESULTS FOR {} NOT FOUND", backend.label(), backend.label());
            }
            Err(e) => {
                let _ = writeln!(out, "{:<20} ERROR: {}", backend.label(), e);
            }
        }
    }
    let _ = writeln!(out, "{}", "-".repeat(96));

    if summaries.is_empty() {
        return out;
    }

    bar_chart(&mut out, "MEAN CPU", &summaries, |s| s.cpu_mean);
    bar_chart(&mut out, "MEAN MEMORY", &summaries, |s| s.memory_mean);
    out
}

/// CPU and memory over time for one backend, thinned to at most
/// `MAX_TIMELINE_ROWS` rows.
pub fn render_timeline(backend: Backend, samples: &SampleSequence) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{} TIMELINE", backend.label());
    if samples.is_empty() {
        let _ = writeln!(out, "NO SAMPLES");
        return out;
    }

    let step = samples.len().div_ceil(MAX_TIMELINE_ROWS).max(1);
    let _ = writeln!(out, "{:>8} {:>6} {:<w$} {:>6}", "TIME_S", "CPU", "", "MEM", w = BAR_WIDTH);
    let _ = writeln!(out, "{}", "-".repeat(BAR_WIDTH + 24));
    for s in samples.iter().step_by(step) {
        let _ = writeln!(
            out,
            "{:>8.1} {:>5.1}% {:<w$} {:>5.1}%",
            s.elapsed_seconds,
            s.cpu_percent,
            bar(s.cpu_percent),
            s.memory_percent,
            w = BAR_WIDTH
        );
    }
    if step > 1 {
        let _ = writeln!(out, "(1 ROW PER {} SAMPLES, {} TOTAL)", step, samples.len());
    }
    out
}

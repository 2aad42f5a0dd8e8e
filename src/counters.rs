// VMBENCH HOST COUNTERS
// RAW HOST-WIDE UTILIZATION, READ STRAIGHT FROM /proc:
//   /proc/stat       AGGREGATE CPU JIFFIES -> CPU % SINCE THE PREVIOUS READ
//   /proc/meminfo    MemTotal / MemAvailable -> MEMORY %
//   /proc/diskstats  SECTORS READ/WRITTEN ON WHOLE DISKS (PARTITIONS SKIPPED)
//   /proc/net/dev    RX/TX BYTES ON EVERY INTERFACE EXCEPT LOOPBACK
//
// DISK AND NET VALUES ARE RAW CUMULATIVE COUNTERS. THE SAMPLER SUBTRACTS
// ITS OWN BASELINE.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::error::SamplingError;

const SECTOR_BYTES: u64 = 512;

// USER_HZ IS 100 ON EVERY MAINSTREAM KERNEL: ONE TICK PER 10MS
const TICK_POLL: Duration = Duration::from_millis(10);
const TICK_WAIT: Duration = Duration::from_millis(250);

// WHOLE BLOCK DEVICES ONLY. PARTITIONS (sda1, nvme0n1p2) WOULD DOUBLE COUNT,
// loop/ram/dm DEVICES ARE NOT PHYSICAL I/O.
const WHOLE_DISK: &str = r"^(sd[a-z]+|hd[a-z]+|vd[a-z]+|xvd[a-z]+|nvme\d+n\d+|mmcblk\d+)$";

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostReading {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
    pub net_bytes_sent: u64,
    pub net_bytes_recv: u64,
}

pub trait CounterSource: Send {
    fn read(&mut self) -> Result<HostReading, SamplingError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CpuTimes {
    idle: u64,
    total: u64,
}

pub struct ProcCounters {
    root: PathBuf,
    whole_disk: Regex,
    prev_cpu: Option<CpuTimes>,
    last_cpu_percent: f64,
}

impl ProcCounters {
    pub fn host() -> Result<Self, SamplingError> {
        if !cfg!(target_os = "linux") {
            return Err(SamplingError::Unsupported(std::env::consts::OS));
        }
        Ok(Self::with_root("/proc"))
    }

    // READ FROM AN ALTERNATE proc ROOT (FIXTURES, CONTAINERS WITH A BIND-MOUNTED HOST /proc)
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            whole_disk: Regex::new(WHOLE_DISK).expect("WHOLE_DISK is a valid pattern"),
            prev_cpu: None,
            last_cpu_percent: 0.0,
        }
    }

    fn read_file(&self, rel: &str) -> Result<(PathBuf, String), SamplingError> {
        let path = self.root.join(rel);
        match fs::read_to_string(&path) {
            Ok(text) => Ok((path, text)),
            Err(source) => Err(SamplingError::Read { path, source }),
        }
    }

    fn read_cpu_times(&self) -> Result<CpuTimes, SamplingError> {
        let (path, text) = self.read_file("stat")?;
        parse_cpu(&path, &text)
    }

    // CPU % OVER A WINDOW THAT ENDS NOW. THE FIRST READ OPENS ITS OWN WINDOW
    // (NEVER THE SINCE-BOOT AVERAGE), AND A READ THAT LANDS BEFORE THE NEXT
    // TICK WAITS FOR IT. IF NO TICK ARRIVES THE LAST VALUE STANDS.
    fn cpu_percent(&mut self) -> Result<f64, SamplingError> {
        let mut cur = self.read_cpu_times()?;
        let prev = self.prev_cpu.unwrap_or(cur);
        let started = Instant::now();
        while cur.total <= prev.total && started.elapsed() < TICK_WAIT {
            thread::sleep(TICK_POLL);
            cur = self.read_cpu_times()?;
        }
        if let Some(pct) = busy_percent(prev, cur) {
            self.last_cpu_percent = pct;
        }
        self.prev_cpu = Some(cur);
        Ok(self.last_cpu_percent)
    }
}

impl CounterSource for ProcCounters {
    fn read(&mut self) -> Result<HostReading, SamplingError> {
        let cpu_percent = self.cpu_percent()?;

        let (path, text) = self.read_file("meminfo")?;
        let memory_percent = parse_meminfo(&path, &text)?;

        let (path, text) = self.read_file("diskstats")?;
        let (disk_read_bytes, disk_write_bytes) = parse_diskstats(&path, &text, &self.whole_disk)?;

        let (path, text) = self.read_file("net/dev")?;
        let (net_bytes_sent, net_bytes_recv) = parse_net_dev(&path, &text)?;

        Ok(HostReading {
            cpu_percent,
            memory_percent,
            disk_read_bytes,
            disk_write_bytes,
            net_bytes_sent,
            net_bytes_recv,
        })
    }
}

fn malformed(path: &Path, detail: impl Into<String>) -> SamplingError {
    SamplingError::Parse {
        path: path.to_path_buf(),
        detail: detail.into(),
    }
}

fn parse_u64(path: &Path, field: &str) -> Result<u64, SamplingError> {
    field
        .parse()
        .map_err(|_| malformed(path, format!("non-numeric field {:?}", field)))
}

// AGGREGATE "cpu " LINE: user nice system idle iowait irq softirq steal guest guest_nice
// guest/guest_nice ARE ALREADY INCLUDED IN user/nice, SO ONLY THE FIRST 8 ARE SUMMED.
fn parse_cpu(path: &Path, text: &str) -> Result<CpuTimes, SamplingError> {
    let line = text
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| malformed(path, "no aggregate cpu line"))?;
    let fields = line
        .split_whitespace()
        .skip(1)
        .map(|f| parse_u64(path, f))
        .collect::<Result<Vec<u64>, _>>()?;
    if fields.len() < 4 {
        return Err(malformed(path, "cpu line has fewer than 4 fields"));
    }
    // idle + iowait
    let idle = fields[3].saturating_add(fields.get(4).copied().unwrap_or(0));
    let total = fields.iter().take(8).fold(0u64, |acc, f| acc.saturating_add(*f));
    Ok(CpuTimes { idle, total })
}

fn busy_percent(prev: CpuTimes, cur: CpuTimes) -> Option<f64> {
    let total_delta = cur.total.saturating_sub(prev.total);
    if total_delta == 0 {
        return None;
    }
    let idle_delta = cur.idle.saturating_sub(prev.idle).min(total_delta);
    Some((total_delta - idle_delta) as f64 / total_delta as f64 * 100.0)
}

// USED = TOTAL - AVAILABLE. KERNELS OLDER THAN 3.14 HAVE NO MemAvailable.
fn parse_meminfo(path: &Path, text: &str) -> Result<f64, SamplingError> {
    let mut kb: HashMap<&str, u64> = HashMap::new();
    for line in text.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        if let Some(value) = rest.split_whitespace().next() {
            kb.insert(key.trim(), parse_u64(path, value)?);
        }
    }
    let total = match kb.get("MemTotal") {
        Some(&t) if t > 0 => t,
        _ => return Err(malformed(path, "missing or zero MemTotal")),
    };
    let available = match kb.get("MemAvailable") {
        Some(&a) => a,
        None => ["MemFree", "Buffers", "Cached"]
            .iter()
            .map(|k| kb.get(k).copied().unwrap_or(0))
            .sum(),
    };
    let used = total - available.min(total);
    Ok(used as f64 / total as f64 * 100.0)
}

// major minor name reads merged sectors_read ms writes merged sectors_written ...
fn parse_diskstats(path: &Path, text: &str, whole_disk: &Regex) -> Result<(u64, u64), SamplingError> {
    let mut read = 0u64;
    let mut written = 0u64;
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            return Err(malformed(path, format!("short diskstats line {:?}", line.trim())));
        }
        if !whole_disk.is_match(fields[2]) {
            continue;
        }
        read = read.saturating_add(parse_u64(path, fields[5])?.saturating_mul(SECTOR_BYTES));
        written = written.saturating_add(parse_u64(path, fields[9])?.saturating_mul(SECTOR_BYTES));
    }
    Ok((read, written))
}

// TWO HEADER LINES, THEN "  iface: rx_bytes rx_packets ... (8 RX FIELDS) tx_bytes ..."
// RETURNS (SENT, RECEIVED)
fn parse_net_dev(path: &Path, text: &str) -> Result<(u64, u64), SamplingError> {
    let mut sent = 0u64;
    let mut recv = 0u64;
    for line in text.lines() {
        let Some((name, rest)) = line.split_once(':') else {
            continue;
        };
        if name.trim() == "lo" {
            continue;
        }
        let fields: Vec<&str> = rest.split_whitespace().collect();
        if fields.len() < 9 {
            return Err(malformed(path, format!("short net/dev line for {}", name.trim())));
        }
        recv = recv.saturating_add(parse_u64(path, fields[0])?);
        sent = sent.saturating_add(parse_u64(path, fields[8])?);
    }
    Ok((sent, recv))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "\
cpu  4705 356 584 3699 23 23 0 0 0 0
cpu0 1393280 32966 572056 13343292 6130 0 17875 0 23933 0
intr 114930548 113199788 3 0 5 263 0 4 [... lots more numbers ...]
ctxt 1990473
";

    const MEMINFO: &str = "\
MemTotal:       16000000 kB
MemFree:         2000000 kB
MemAvailable:    4000000 kB
Buffers:          500000 kB
Cached:          3000000 kB
";

    const DISKSTATS: &str = "\
   8       0 sda 1000 10 2048 500 400 20 4096 800 0 900 1300 0 0 0 0
   8       1 sda1 900 10 2000 450 390 20 4000 780 0 850 1230 0 0 0 0
 259       0 nvme0n1 10 0 100 5 20 0 200 10 0 15 15 0 0 0 0
 259       1 nvme0n1p1 10 0 100 5 20 0 200 10 0 15 15 0 0 0 0
   7       0 loop0 50 0 800 4 0 0 0 0 0 4 4 0 0 0 0
";

    const NET_DEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 999999    100    0    0    0     0          0         0   999999     100    0    0    0     0       0          0
  eth0: 1000       10    0    0    0     0          0         0     2000      20    0    0    0     0       0          0
 wlan0:  300        3    0    0    0     0          0         0      400       4    0    0    0     0       0          0
";

    fn p() -> PathBuf {
        PathBuf::from("/proc/fixture")
    }

    #[test]
    fn cpu_sums_first_eight_fields() {
        let t = parse_cpu(&p(), STAT).unwrap();
        assert_eq!(t.idle, 3699 + 23);
        assert_eq!(t.total, 4705 + 356 + 584 + 3699 + 23 + 23);
    }

    #[test]
    fn cpu_busy_percent_from_delta() {
        let a = CpuTimes { idle: 100, total: 200 };
        let b = CpuTimes { idle: 150, total: 400 };
        // 200 JIFFIES ELAPSED, 50 IDLE -> 75% BUSY
        assert_eq!(busy_percent(a, b), Some(75.0));
        assert_eq!(busy_percent(b, b), None);
    }

    #[test]
    fn cpu_rejects_garbage() {
        assert!(parse_cpu(&p(), "cpu  1 2 x 4\n").is_err());
        assert!(parse_cpu(&p(), "intr 1 2 3\n").is_err());
        assert!(parse_cpu(&p(), "cpu  1 2\n").is_err());
    }

    #[test]
    fn meminfo_uses_available() {
        let pct = parse_meminfo(&p(), MEMINFO).unwrap();
        assert!((pct - 75.0).abs() < 1e-9);
    }

    #[test]
    fn meminfo_falls_back_without_available() {
        let old = "MemTotal: 1000 kB\nMemFree: 100 kB\nBuffers: 100 kB\nCached: 300 kB\n";
        let pct = parse_meminfo(&p(), old).unwrap();
        assert!((pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn meminfo_requires_total() {
        assert!(parse_meminfo(&p(), "MemFree: 100 kB\n").is_err());
    }

    #[test]
    fn diskstats_counts_whole_disks_only() {
        let re = Regex::new(WHOLE_DISK).unwrap();
        let (read, written) = parse_diskstats(&p(), DISKSTATS, &re).unwrap();
        assert_eq!(read, (2048 + 100) * SECTOR_BYTES);
        assert_eq!(written, (4096 + 200) * SECTOR_BYTES);
    }

    #[test]
    fn huge_counters_saturate() {
        let re = Regex::new(WHOLE_DISK).unwrap();
        let disks = format!(
            "8 0 sda 1 0 {max} 0 1 0 {max} 0 0 0 0\n8 16 sdb 1 0 {max} 0 1 0 1 0 0 0 0\n",
            max = u64::MAX
        );
        let (read, written) = parse_diskstats(&p(), &disks, &re).unwrap();
        assert_eq!(read, u64::MAX);
        assert_eq!(written, u64::MAX);

        let net = format!(
            "h\nh\neth0: {max} 0 0 0 0 0 0 0 {max} 0 0 0 0 0 0 0\neth1: 1 0 0 0 0 0 0 0 1 0 0 0 0 0 0 0\n",
            max = u64::MAX
        );
        assert_eq!(parse_net_dev(&p(), &net).unwrap(), (u64::MAX, u64::MAX));
    }

    #[test]
    fn diskstats_short_line_is_fatal() {
        let re = Regex::new(WHOLE_DISK).unwrap();
        assert!(parse_diskstats(&p(), "8 0 sda 1 2\n", &re).is_err());
    }

    #[test]
    fn net_dev_skips_loopback() {
        let (sent, recv) = parse_net_dev(&p(), NET_DEV).unwrap();
        assert_eq!(recv, 1000 + 300);
        assert_eq!(sent, 2000 + 400);
    }

    fn fixture_root(stat: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("net")).unwrap();
        fs::write(dir.path().join("stat"), stat).unwrap();
        fs::write(dir.path().join("meminfo"), MEMINFO).unwrap();
        fs::write(dir.path().join("diskstats"), DISKSTATS).unwrap();
        fs::write(dir.path().join("net/dev"), NET_DEV).unwrap();
        dir
    }

    // REPLACE stat IN ONE STEP SO A CONCURRENT READ NEVER SEES HALF A FILE
    fn swap_stat(root: &Path, stat: &str) {
        let tmp = root.join("stat.new");
        fs::write(&tmp, stat).unwrap();
        fs::rename(&tmp, root.join("stat")).unwrap();
    }

    #[test]
    fn reads_fixture_root() {
        let dir = fixture_root(STAT);
        let mut counters = ProcCounters::with_root(dir.path());
        let first = counters.read().unwrap();
        assert_eq!(first.net_bytes_sent, 2400);
        assert_eq!(first.disk_read_bytes, 2148 * SECTOR_BYTES);
        // A FROZEN stat NEVER TICKS: NO WINDOW, NO MEASUREMENT
        assert_eq!(first.cpu_percent, 0.0);

        let second = counters.read().unwrap();
        assert_eq!(second.cpu_percent, first.cpu_percent);
    }

    #[test]
    fn first_read_ignores_the_since_boot_average() {
        // 90% BUSY SINCE BOOT
        let dir = fixture_root("cpu  900 0 0 100 0 0 0 0 0 0\n");
        let root = dir.path().to_path_buf();
        let ticker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            // 100 MORE JIFFIES, 75 OF THEM IDLE
            swap_stat(&root, "cpu  925 0 0 175 0 0 0 0 0 0\n");
        });

        let mut counters = ProcCounters::with_root(dir.path());
        let first = counters.read().unwrap();
        ticker.join().unwrap();
        assert!((first.cpu_percent - 25.0).abs() < 1e-9);
    }

    #[test]
    fn later_reads_cover_the_window_since_the_previous_read() {
        let dir = fixture_root("cpu  100 0 0 100 0 0 0 0 0 0\n");
        let mut counters = ProcCounters::with_root(dir.path());
        counters.read().unwrap();

        // 200 JIFFIES, 20 IDLE -> 90%
        swap_stat(dir.path(), "cpu  280 0 0 120 0 0 0 0 0 0\n");
        let second = counters.read().unwrap();
        assert!((second.cpu_percent - 90.0).abs() < 1e-9);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut counters = ProcCounters::with_root(dir.path());
        match counters.read() {
            Err(SamplingError::Read { path, .. }) => assert!(path.ends_with("stat")),
            other => panic!("expected read error, got {:?}", other.map(|_| ())),
        }
    }
}

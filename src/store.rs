// VMBENCH RESULT STORE
// ONE CSV FILE PER BACKEND. WRITES GO TO A SIBLING TEMP FILE AND ARE
// RENAMED INTO PLACE, SO A READER NEVER SEES HALF A RUN. READS ARE
// POSITIONAL AND SKIP ANY ROW THAT DOES NOT DECODE.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use tracing::{debug, warn};

use crate::error::{LoadError, NotFoundError, PersistenceError};
use crate::sample::{Sample, SampleSequence, CSV_HEADER};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadedResults {
    pub samples: SampleSequence,
    // ROWS DROPPED FOR WRONG WIDTH, NON-NUMERIC FIELDS, OR A REPEATED HEADER
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct ResultStore {
    path: PathBuf,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "results.csv".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }

    pub fn save(&self, samples: &SampleSequence) -> Result<(), PersistenceError> {
        let io_err = |source: io::Error| PersistenceError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_err)?;
        }

        let tmp = self.temp_path();
        let result = self.write_to(&tmp, samples).and_then(|()| {
            fs::rename(&tmp, &self.path).map_err(io_err)
        });
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        } else {
            debug!(path = %self.path.display(), rows = samples.len(), "results written");
        }
        result
    }

    fn write_to(&self, tmp: &Path, samples: &SampleSequence) -> Result<(), PersistenceError> {
        let csv_err = |source: csv::Error| PersistenceError::Csv {
            path: self.path.clone(),
            source,
        };
        let io_err = |source: io::Error| PersistenceError::Io {
            path: self.path.clone(),
            source,
        };

        let file = File::create(tmp).map_err(io_err)?;
        // HEADER IS WRITTEN BY HAND: AN EMPTY SEQUENCE STILL GETS ONE
        let mut wtr = WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::new(file));
        wtr.write_record(CSV_HEADER).map_err(csv_err)?;
        for sample in samples {
            wtr.serialize(sample).map_err(csv_err)?;
        }
        let buf = wtr
            .into_inner()
            .map_err(|e| io_err(io::Error::new(io::ErrorKind::Other, e.to_string())))?;
        let file = buf.into_inner().map_err(|e| io_err(e.into_error()))?;
        file.sync_all().map_err(io_err)
    }

    pub fn load(&self) -> Result<LoadedResults, LoadError> {
        let file = File::open(&self.path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => LoadError::NotFound(NotFoundError {
                path: self.path.clone(),
            }),
            _ => LoadError::Io {
                path: self.path.clone(),
                source,
            },
        })?;

        let mut rdr = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(file);

        let header = StringRecord::from(CSV_HEADER.to_vec());
        let mut out = LoadedResults::default();
        let mut first = true;

        for record in rdr.records() {
            let record = match record {
                Ok(r) => r,
                Err(e) if e.is_io_error() => {
                    return Err(LoadError::Csv {
                        path: self.path.clone(),
                        source: e,
                    })
                }
                Err(_) => {
                    out.skipped += 1;
                    first = false;
                    continue;
                }
            };

            if first {
                first = false;
                if record == header {
                    continue;
                }
                warn!(path = %self.path.display(), "result file has no header row");
            }

            match decode(&record) {
                Some(sample) => out.samples.push(sample),
                None => out.skipped += 1,
            }
        }

        if out.skipped > 0 {
            warn!(path = %self.path.display(), skipped = out.skipped, "skipped malformed rows");
        }
        Ok(out)
    }
}

fn decode(record: &StringRecord) -> Option<Sample> {
    if record.len() != CSV_HEADER.len() {
        return None;
    }
    let sample: Sample = record.deserialize(None).ok()?;
    // NaN/inf PARSE AS FLOATS BUT ARE NOT VALID OBSERVATIONS
    if !sample.elapsed_seconds.is_finite()
        || !sample.cpu_percent.is_finite()
        || !sample.memory_percent.is_finite()
    {
        return None;
    }
    Some(sample)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(t: f64) -> Sample {
        Sample {
            elapsed_seconds: t,
            cpu_percent: 12.5,
            memory_percent: 40.25,
            disk_read_bytes: 4096,
            disk_write_bytes: 8192,
            net_bytes_sent: 100,
            net_bytes_recv: 200,
        }
    }

    #[test]
    fn empty_sequence_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("nested/esxi_results.csv"));
        store.save(&SampleSequence::new()).unwrap();
        let text = fs::read_to_string(store.path()).unwrap();
        assert_eq!(
            text,
            "time,cpu,memory,disk_read_bytes,disk_write_bytes,net_bytes_sent,net_bytes_recv\n"
        );
        let loaded = store.load().unwrap();
        assert!(loaded.samples.is_empty());
        assert_eq!(loaded.skipped, 0);
    }

    #[test]
    fn rows_use_shortest_float_form() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("r.csv"));
        let seq: SampleSequence = vec![sample(0.0), sample(1.5)].into_iter().collect();
        store.save(&seq).unwrap();
        let text = fs::read_to_string(store.path()).unwrap();
        let rows: Vec<&str> = text.lines().collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2], "1.5,12.5,40.25,4096,8192,100,200");
        assert!(!dir.path().join(".r.csv.tmp").exists());
    }

    #[test]
    fn decode_rejects_bad_rows() {
        assert!(decode(&StringRecord::from(vec!["1", "2"])).is_none());
        assert!(decode(&StringRecord::from(CSV_HEADER.to_vec())).is_none());
        assert!(decode(&StringRecord::from(vec!["NaN", "1", "1", "1", "1", "1", "1"])).is_none());
        assert!(decode(&StringRecord::from(vec!["1", "2", "3", "-4", "5", "6", "7"])).is_none());
        assert!(decode(&StringRecord::from(vec!["1", "2", "3", "4", "5", "6", "7"])).is_some());
    }
}

use crate::error::{Error, Result};
use crate::io::DatasetIo;
use crate::signal::Recording;
use ::csv::{ReaderBuilder, Trim, WriterBuilder};
use std::io;
use std::path::Path;

/// Sampling rate assumed when the timestamps cannot provide one.
pub const DEFAULT_FS: f64 = 250.0;

/// Wide CSV recordings: an optional `timestamp` column (seconds) and one
/// column per channel.
#[derive(Debug, Clone)]
pub struct CsvDatasetIo {
    fallback_fs: f64,
}

impl Default for CsvDatasetIo {
    fn default() -> Self {
        Self {
            fallback_fs: DEFAULT_FS,
        }
    }
}

impl CsvDatasetIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback_fs(fallback_fs: f64) -> Self {
        Self { fallback_fs }
    }
}

fn dataset_error(path: &Path, reason: impl ToString) -> Error {
    Error::Dataset {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Rate from the median sample interval, so one jittered row does not skew it.
fn median_rate(timestamps: &[f64]) -> Option<f64> {
    let mut intervals: Vec<f64> = timestamps.windows(2).map(|w| w[1] - w[0]).collect();
    if intervals.is_empty() {
        return None;
    }
    intervals.sort_by(f64::total_cmp);
    let mid = intervals.len() / 2;
    let median = if intervals.len() % 2 == 0 {
        (intervals[mid - 1] + intervals[mid]) / 2.0
    } else {
        intervals[mid]
    };
    let fs = 1.0 / median;
    (fs.is_finite() && fs > 0.0).then_some(fs)
}

impl DatasetIo for CsvDatasetIo {
    type Handle = Recording;

    fn read_dataset(&self, path: &Path) -> Result<Recording> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(Trim::All)
            .from_path(path)
            .map_err(|err| Error::storage(path, io::Error::from(err)))?;
        let headers = reader
            .headers()
            .map_err(|err| dataset_error(path, err))?
            .clone();
        let ts_idx = headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case("timestamp"));
        let columns: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| Some(*idx) != ts_idx)
            .map(|(idx, name)| (idx, name.to_string()))
            .collect();
        if columns.is_empty() {
            return Err(dataset_error(path, "no channel columns"));
        }
        let mut recording = Recording::new(
            self.fallback_fs,
            columns.iter().map(|(_, name)| name.clone()).collect(),
        );
        let mut timestamps = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(|err| dataset_error(path, err))?;
            let line = row + 2;
            if let Some(ts_idx) = ts_idx {
                let ts: f64 = record
                    .get(ts_idx)
                    .unwrap_or_default()
                    .parse()
                    .map_err(|_| dataset_error(path, format!("line {}: bad timestamp", line)))?;
                if timestamps.last().is_some_and(|&prev| ts <= prev) {
                    return Err(dataset_error(
                        path,
                        format!("line {}: timestamps must increase", line),
                    ));
                }
                timestamps.push(ts);
            }
            for (channel, (idx, name)) in columns.iter().enumerate() {
                let value: f64 = record.get(*idx).unwrap_or_default().parse().map_err(|_| {
                    dataset_error(path, format!("line {}: bad value for '{}'", line, name))
                })?;
                recording.data[channel].push(value);
            }
        }
        if let Some(fs) = median_rate(&timestamps) {
            recording.fs = fs;
        }
        Ok(recording)
    }

    fn write_dataset(&self, recording: &Recording, path: &Path) -> Result<()> {
        let mut writer = WriterBuilder::new()
            .from_path(path)
            .map_err(|err| Error::storage(path, io::Error::from(err)))?;
        let mut header = vec!["timestamp".to_string()];
        header.extend(recording.channels.iter().cloned());
        writer
            .write_record(&header)
            .map_err(|err| Error::storage(path, io::Error::from(err)))?;
        for i in 0..recording.n_samples() {
            let mut row = Vec::with_capacity(recording.n_channels() + 1);
            row.push(format!("{:.6}", i as f64 / recording.fs));
            for channel in &recording.data {
                let value = channel
                    .get(i)
                    .ok_or_else(|| dataset_error(path, "channels have different lengths"))?;
                row.push(value.to_string());
            }
            writer
                .write_record(&row)
                .map_err(|err| Error::storage(path, io::Error::from(err)))?;
        }
        writer.flush().map_err(|err| Error::storage(path, err))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn sample_path(relative: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .and_then(|p| p.parent())
            .expect("workspace root")
            .join(relative)
    }

    #[test]
    fn reads_sample_recording() {
        let rec = CsvDatasetIo::new()
            .read_dataset(&sample_path("test_data/sample_recording.csv"))
            .expect("read sample");
        assert_eq!(rec.channels, vec!["Fz", "Cz", "Pz", "Oz"]);
        assert_eq!(rec.n_samples(), 8);
        assert!((rec.fs - 250.0).abs() < 1e-6);
        assert!((rec.data[1][0] - 12.5).abs() < 1e-9);
    }

    #[test]
    fn missing_timestamps_use_fallback_rate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.csv");
        fs::write(&path, "C3,C4\n1,2\n3,4\n").unwrap();
        let rec = CsvDatasetIo::with_fallback_fs(128.0)
            .read_dataset(&path)
            .unwrap();
        assert_eq!(rec.fs, 128.0);
        assert_eq!(rec.data, vec![vec![1.0, 3.0], vec![2.0, 4.0]]);
    }

    #[test]
    fn bad_values_name_the_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "timestamp,C3\n0.0,1\n0.004,oops\n").unwrap();
        match CsvDatasetIo::new().read_dataset(&path) {
            Err(Error::Dataset { reason, .. }) => assert!(reason.contains("line 3"), "{reason}"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rate_uses_the_median_interval() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jitter.csv");
        // second row arrives late; the other intervals are 10 ms
        fs::write(
            &path,
            "timestamp,C3\n0.00,1\n0.03,2\n0.04,3\n0.05,4\n0.06,5\n",
        )
        .unwrap();
        let rec = CsvDatasetIo::new().read_dataset(&path).unwrap();
        assert!((rec.fs - 100.0).abs() < 1e-6, "{}", rec.fs);
    }

    #[test]
    fn timestamps_going_backwards_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backwards.csv");
        fs::write(&path, "timestamp,C3\n0.01,1\n0.00,2\n").unwrap();
        match CsvDatasetIo::new().read_dataset(&path) {
            Err(Error::Dataset { reason, .. }) => assert!(reason.contains("line 3"), "{reason}"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn written_recordings_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let rec = Recording {
            fs: 100.0,
            channels: vec!["O1".into(), "O2".into()],
            data: vec![vec![0.5, -0.5, 1.0], vec![2.0, 3.0, 4.0]],
        };
        let io = CsvDatasetIo::new();
        io.write_dataset(&rec, &path).unwrap();
        let back = io.read_dataset(&path).unwrap();
        assert_eq!(back.channels, rec.channels);
        assert_eq!(back.data, rec.data);
        assert!((back.fs - 100.0).abs() < 1e-6);
    }
}

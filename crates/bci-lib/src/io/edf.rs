use crate::error::{Error, Result};
use crate::io::DatasetIo;
use crate::signal::Recording;
use edf_reader::file_reader::SyncFileReader;
use edf_reader::sync_reader::SyncEDFReader;
use log::debug;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Label EDF+ gives its annotation pseudo-channel.
const ANNOTATIONS_LABEL: &str = "EDF Annotations";

/// Positional reads straight from disk for the EDF parser.
struct DiskFileReader {
    path: PathBuf,
}

impl DiskFileReader {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl SyncFileReader for DiskFileReader {
    fn read(&self, offset: u64, length: u64) -> std::result::Result<Vec<u8>, io::Error> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; length as usize];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }
}

/// EDF/EDF+ recordings. Read only: every signal channel must share one
/// sampling rate, annotation channels are skipped.
#[derive(Debug, Clone, Default)]
pub struct EdfDatasetIo;

impl EdfDatasetIo {
    pub fn new() -> Self {
        Self
    }
}

fn dataset_error(path: &Path, reason: impl ToString) -> Error {
    Error::Dataset {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

impl DatasetIo for EdfDatasetIo {
    type Handle = Recording;

    fn read_dataset(&self, path: &Path) -> Result<Recording> {
        if !path.is_file() {
            return Err(Error::storage(
                path,
                io::Error::new(io::ErrorKind::NotFound, "no such recording"),
            ));
        }
        let reader = SyncEDFReader::init_with_file_reader(DiskFileReader::new(path))
            .map_err(|err| dataset_error(path, format!("bad EDF header: {}", err)))?;
        let header = &reader.edf_header;
        if header.block_duration == 0 {
            return Err(dataset_error(path, "data record duration is zero"));
        }

        let signals: Vec<usize> = (0..header.channels.len())
            .filter(|&idx| header.channels[idx].label.trim() != ANNOTATIONS_LABEL)
            .collect();
        let Some(&first) = signals.first() else {
            return Err(dataset_error(path, "no signal channels"));
        };
        let per_record = header.channels[first].number_of_samples_in_data_record;
        if let Some(&odd) = signals
            .iter()
            .find(|&&idx| header.channels[idx].number_of_samples_in_data_record != per_record)
        {
            return Err(dataset_error(
                path,
                format!(
                    "channel '{}' has a different sampling rate",
                    header.channels[odd].label.trim()
                ),
            ));
        }
        // block_duration is in milliseconds
        let fs = per_record as f64 * 1000.0 / header.block_duration as f64;

        let total = header.block_duration * header.number_of_blocks;
        let window = reader
            .read_data_window(0, total)
            .map_err(|err| dataset_error(path, format!("reading samples: {}", err)))?;

        let mut recording = Recording::new(
            fs,
            signals
                .iter()
                .map(|&idx| header.channels[idx].label.trim().to_string())
                .collect(),
        );
        for (slot, &idx) in signals.iter().enumerate() {
            let samples = window
                .get(idx)
                .ok_or_else(|| dataset_error(path, format!("channel {} has no samples", idx)))?;
            recording.data[slot] = samples.iter().map(|&value| value as f64).collect();
        }
        debug!(
            "{}: {} channel(s), {} sample(s) at {} Hz",
            path.display(),
            recording.n_channels(),
            recording.n_samples(),
            fs
        );
        Ok(recording)
    }

    fn write_dataset(&self, _recording: &Recording, path: &Path) -> Result<()> {
        Err(dataset_error(path, "writing EDF is not supported"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
        let rec = EdfDatasetIo::new()
            .read_dataset(&sample_path("test_data/sample_recording.edf"))
            .expect("read sample");
        assert_eq!(rec.channels, vec!["C3", "C4"]);
        assert!((rec.fs - 10.0).abs() < 1e-9, "{}", rec.fs);
        assert_eq!(rec.n_samples(), 20);
        // digital sample k of C3 is 100 * k, stored at 0.1 uV per unit
        assert!((rec.data[0][3] - 30.0).abs() < 1e-2, "{}", rec.data[0][3]);
        assert!((rec.data[1][3] + 30.0).abs() < 1e-2, "{}", rec.data[1][3]);
    }

    #[test]
    fn missing_file_is_a_storage_error() {
        let dir = tempdir().unwrap();
        let err = EdfDatasetIo::new()
            .read_dataset(&dir.path().join("absent.edf"))
            .unwrap_err();
        assert!(matches!(err, Error::Storage { .. }), "{err:?}");
    }

    #[test]
    fn writing_is_refused() {
        let dir = tempdir().unwrap();
        let rec = Recording::new(100.0, vec!["C3".into()]);
        let err = EdfDatasetIo::new()
            .write_dataset(&rec, &dir.path().join("out.edf"))
            .unwrap_err();
        assert!(matches!(err, Error::Dataset { .. }));
    }
}

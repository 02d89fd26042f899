pub mod csv;
pub mod edf;

use crate::error::Result;
use crate::signal::Recording;
use std::path::Path;

pub use self::csv::CsvDatasetIo;
pub use self::edf::EdfDatasetIo;

/// Reads and writes the data handle a pipeline threads through its steps.
pub trait DatasetIo: Send + Sync {
    type Handle;

    fn read_dataset(&self, path: &Path) -> Result<Self::Handle>;
    fn write_dataset(&self, handle: &Self::Handle, path: &Path) -> Result<()>;
}

/// Picks the reader from the file extension (`.edf` or CSV otherwise) and
/// always writes CSV.
#[derive(Debug, Clone, Default)]
pub struct RecordingIo {
    csv: CsvDatasetIo,
    edf: EdfDatasetIo,
}

impl RecordingIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_csv(csv: CsvDatasetIo) -> Self {
        Self {
            csv,
            edf: EdfDatasetIo,
        }
    }
}

fn is_edf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("edf"))
}

impl DatasetIo for RecordingIo {
    type Handle = Recording;

    fn read_dataset(&self, path: &Path) -> Result<Recording> {
        if is_edf(path) {
            self.edf.read_dataset(path)
        } else {
            self.csv.read_dataset(path)
        }
    }

    fn write_dataset(&self, recording: &Recording, path: &Path) -> Result<()> {
        self.csv.write_dataset(recording, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn extension_selects_the_reader() {
        assert!(is_edf(Path::new("night.EDF")));
        assert!(!is_edf(Path::new("night.csv")));
        assert!(!is_edf(Path::new("edf")));

        let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("test_data");
        let io = RecordingIo::new();
        let edf = io.read_dataset(&root.join("sample_recording.edf")).unwrap();
        let csv = io.read_dataset(&root.join("sample_recording.csv")).unwrap();
        assert_eq!(edf.channels, vec!["C3", "C4"]);
        assert_eq!(csv.channels, vec!["Fz", "Cz", "Pz", "Oz"]);
    }
}

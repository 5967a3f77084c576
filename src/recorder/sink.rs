//! Persistence for finished recordings.

use super::Recording;
use crate::stream::CHANNEL_NAMES;
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

/// Errors that can occur while persisting a recording.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Somewhere recordings go once collection ends.
pub trait RecordingSink {
    fn write(&mut self, recording: &Recording) -> Result<(), SinkError>;
}

/// Writes one CSV file per recording.
///
/// Files are named `recording_<label>_<YYYYmmdd_HHMMSS>.csv` after the
/// recording's UTC start time, with one `timestamp,AF3,...,AF4,label` row per
/// frame.
#[derive(Debug, Clone)]
pub struct CsvSink {
    directory: PathBuf,
}

impl CsvSink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// File a recording is written to.
    pub fn path_for(&self, recording: &Recording) -> PathBuf {
        self.directory.join(format!(
            "recording_{}_{}.csv",
            recording.label,
            recording.started_at.format("%Y%m%d_%H%M%S")
        ))
    }
}

impl RecordingSink for CsvSink {
    fn write(&mut self, recording: &Recording) -> Result<(), SinkError> {
        std::fs::create_dir_all(&self.directory)?;
        let path = self.path_for(recording);

        let mut writer = csv::Writer::from_path(&path)?;

        let mut header = Vec::with_capacity(CHANNEL_NAMES.len() + 2);
        header.push("timestamp");
        header.extend(CHANNEL_NAMES);
        header.push("label");
        writer.write_record(&header)?;

        for labeled in &recording.frames {
            let mut row = Vec::with_capacity(header.len());
            row.push(labeled.frame.timestamp.to_string());
            row.extend(labeled.frame.channels.iter().map(f64::to_string));
            row.push(labeled.label.to_string());
            writer.write_record(&row)?;
        }
        writer.flush()?;

        info!(
            path = %path.display(),
            frames = recording.frames.len(),
            "Recording saved"
        );
        Ok(())
    }
}

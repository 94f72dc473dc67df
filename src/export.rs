//! History export
//!
//! Writes the collected history as a flat text file, one line per sample:
//!
//! ```text
//! Angle: 10.0000, Duty_cycle: 20.0000%, Timer: 0ms
//! ```
//!
//! The file is written to a temporary sibling and renamed over the target,
//! so a reader of the target path sees either the previous file or the
//! complete new one.

use crate::error::{Result, TelemetryError};
use crate::types::Sample;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Format one history entry as an export line (without terminator)
pub fn format_line(sample: &Sample) -> String {
    sample.to_string()
}

/// Writes export artifacts to a fixed path
#[derive(Debug, Clone)]
pub struct Exporter {
    path: PathBuf,
}

impl Exporter {
    /// Create an exporter targeting `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Target path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the target with one line per sample
    ///
    /// Returns the number of lines written.
    pub fn write(&self, samples: &[Sample]) -> Result<usize> {
        self.write_atomic(samples).map_err(|source| TelemetryError::Export {
            path: self.path.clone(),
            source,
        })?;
        tracing::info!("Exported {} sample(s) to {:?}", samples.len(), self.path);
        Ok(samples.len())
    }

    fn write_atomic(&self, samples: &[Sample]) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let temp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            for sample in samples {
                writeln!(writer, "{}", format_line(sample))?;
            }
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line() {
        assert_eq!(
            format_line(&Sample::new(-3.6, 30.0, 1234)),
            "Angle: -3.6000, Duty_cycle: 30.0000%, Timer: 1234ms"
        );
    }

    #[test]
    fn test_each_entry_gets_its_own_line() {
        // Every line carries its own sample, not a repeat of the last one received
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.txt");
        let samples = vec![
            Sample::new(10.0, 20.0, 0),
            Sample::new(10.5, 21.0, 50),
            Sample::new(11.0, 22.0, 100),
        ];

        let written = Exporter::new(&path).write(&samples).unwrap();
        assert_eq!(written, 3);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "Angle: 10.0000, Duty_cycle: 20.0000%, Timer: 0ms\n\
             Angle: 10.5000, Duty_cycle: 21.0000%, Timer: 50ms\n\
             Angle: 11.0000, Duty_cycle: 22.0000%, Timer: 100ms\n"
        );
    }

    #[test]
    fn test_write_overwrites_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.txt");
        std::fs::write(&path, "old contents that are much longer than the new ones\n").unwrap();

        Exporter::new(&path).write(&[Sample::new(1.0, 2.0, 3)]).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "Angle: 1.0000, Duty_cycle: 2.0000%, Timer: 3ms\n");

        // No temporary files left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("export.txt");

        let err = Exporter::new(&path).write(&[Sample::new(1.0, 2.0, 3)]).unwrap_err();
        assert!(matches!(err, TelemetryError::Export { .. }));
        assert!(!path.exists());
    }
}

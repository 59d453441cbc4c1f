use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, Trim};

use crate::error::RecorderError;
use crate::exporter::{validate_missing_marker, DEFAULT_MISSING_MARKER};
use crate::types::{Reading, FIELDS_PER_ROW};

/// Una fila leída de un CSV exportado
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedRow {
    pub magnetometer: Reading,
    pub heading: f64,
    pub accelerometer: Option<Reading>,
    pub gyroscope: Option<Reading>,
}

#[derive(Debug, Clone, Default)]
pub struct LoadedSession {
    pub rows: Vec<LoadedRow>,
}

/// Resumen de una sesión exportada
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub rows: usize,
    pub missing_accelerometer: usize,
    pub missing_gyroscope: usize,
    pub heading_min: f64,
    pub heading_max: f64,
    pub heading_mean: f64,
}

impl LoadedSession {
    pub fn summary(&self) -> Option<SessionSummary> {
        if self.rows.is_empty() {
            return None;
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for row in &self.rows {
            min = min.min(row.heading);
            max = max.max(row.heading);
            sum += row.heading;
        }
        Some(SessionSummary {
            rows: self.rows.len(),
            missing_accelerometer: self.rows.iter().filter(|r| r.accelerometer.is_none()).count(),
            missing_gyroscope: self.rows.iter().filter(|r| r.gyroscope.is_none()).count(),
            heading_min: min,
            heading_max: max,
            heading_mean: sum / self.rows.len() as f64,
        })
    }
}

/// Carga un CSV exportado. Los campos con `missing_marker` se leen como `None`.
pub fn load_export(path: impl AsRef<Path>, missing_marker: &str) -> Result<LoadedSession, RecorderError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|source| RecorderError::ReadFailure {
        path: path.to_path_buf(),
        source,
    })?;
    read_export(file, missing_marker)
}

pub fn load_export_default(path: impl AsRef<Path>) -> Result<LoadedSession, RecorderError> {
    load_export(path, DEFAULT_MISSING_MARKER)
}

pub fn read_export(input: impl Read, missing_marker: &str) -> Result<LoadedSession, RecorderError> {
    validate_missing_marker(missing_marker)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(input);

    let mut rows = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        // +2: cabecera y numeración desde 1
        let line = row_idx + 2;
        let record = result.map_err(|e| RecorderError::MalformedExport {
            line,
            reason: e.to_string(),
        })?;
        if record.len() != FIELDS_PER_ROW {
            return Err(RecorderError::MalformedExport {
                line,
                reason: format!("expected {} fields, got {}", FIELDS_PER_ROW, record.len()),
            });
        }

        let number = |idx: usize| -> Result<f64, RecorderError> {
            record[idx]
                .parse::<f64>()
                .map_err(|e| RecorderError::MalformedExport {
                    line,
                    reason: format!("field {} ({:?}): {}", idx + 1, &record[idx], e),
                })
        };
        let triple = |start: usize| -> Result<Option<Reading>, RecorderError> {
            let fields = &[&record[start], &record[start + 1], &record[start + 2]];
            if fields.iter().all(|f| *f == missing_marker) {
                return Ok(None);
            }
            Ok(Some(Reading::new(number(start)?, number(start + 1)?, number(start + 2)?)))
        };

        rows.push(LoadedRow {
            magnetometer: Reading::new(number(0)?, number(1)?, number(2)?),
            heading: number(3)?,
            accelerometer: triple(4)?,
            gyroscope: triple(7)?,
        });
    }

    Ok(LoadedSession { rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment_buffer::SessionBuffers;
    use crate::exporter::SessionExporter;
    use crate::storage::LocalDirectory;
    use crate::types::ChannelKind;

    #[test]
    fn test_reads_exported_session() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = LocalDirectory::new(tmp.path());
        let buffers = SessionBuffers::new();
        buffers.record(ChannelKind::Magnetometer, Reading::new(0.0, 25.5, -40.0));
        buffers.record(ChannelKind::Magnetometer, Reading::new(-25.5, 0.0, -40.0));
        buffers.record(ChannelKind::Accelerometer, Reading::new(0.01, -0.02, 0.98));
        buffers.record(ChannelKind::Accelerometer, Reading::new(0.0, 0.0, 1.0));
        buffers.record(ChannelKind::Gyroscope, Reading::new(0.5, 0.25, 0.125));

        let report = SessionExporter::default().export(&buffers, &storage).unwrap();
        let session = load_export_default(&report.path).unwrap();

        assert_eq!(session.rows.len(), 2);
        assert_eq!(session.rows[0].magnetometer, Reading::new(0.0, 25.5, -40.0));
        assert_eq!(session.rows[0].accelerometer, Some(Reading::new(0.01, -0.02, 0.98)));
        assert_eq!(session.rows[0].gyroscope, Some(Reading::new(0.5, 0.25, 0.125)));
        assert_eq!(session.rows[1].gyroscope, None);

        let summary = session.summary().unwrap();
        assert_eq!(summary.missing_gyroscope, 1);
        assert_eq!(summary.heading_min, 90.0);
        assert_eq!(summary.heading_max, 180.0);
        assert_eq!(summary.heading_mean, 135.0);
    }

    #[test]
    fn test_wrong_field_count_reported_with_line() {
        let text = "a, b, c\n1, 2, 3\n";
        let err = read_export(text.as_bytes(), "missing").unwrap_err();
        assert!(matches!(err, RecorderError::MalformedExport { line: 2, .. }));
    }

    #[test]
    fn test_partial_missing_triple_is_an_error() {
        let text = format!(
            "{}\n1, 0, 0, 0.00, missing, 2, 3, 0, 0, 0\n",
            crate::exporter::EXPORT_HEADER
        );
        assert!(matches!(
            read_export(text.as_bytes(), "missing"),
            Err(RecorderError::MalformedExport { line: 2, .. })
        ));
    }

    #[test]
    fn test_numeric_marker_rejected_before_reading() {
        let text = format!(
            "{}\n1, 0, 0, 0.00, 0, 0, 0, 0, 0, 0\n",
            crate::exporter::EXPORT_HEADER
        );
        assert!(matches!(
            read_export(text.as_bytes(), "0"),
            Err(RecorderError::InvalidMarker { .. })
        ));
    }

    #[test]
    fn test_empty_document_has_no_summary() {
        let text = format!("{}\n", crate::exporter::EXPORT_HEADER);
        let session = read_export(text.as_bytes(), "missing").unwrap();
        assert!(session.rows.is_empty());
        assert!(session.summary().is_none());
    }
}

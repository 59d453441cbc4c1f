use std::fmt::Write as _;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::alignment_buffer::SessionBuffers;
use crate::error::RecorderError;
use crate::heading::heading;
use crate::storage::StorageAccess;
use crate::types::{ChannelKind, Reading, SensorSample, FIELDS_PER_ROW};

pub const EXPORT_HEADER: &str = "Magnetometer_x, Magnetometer_y, Magnetometer_z, Heading (angle), Accelerometer_x, Accelerometer_y, Accelerometer_z, Gyroscope_x, Gyroscope_y, Gyroscope_z";
pub const FIELD_SEPARATOR: &str = ", ";
pub const EXPORT_MIME_TYPE: &str = "text/csv";
pub const DEFAULT_MISSING_MARKER: &str = "missing";

/// Un campo de la fila exportada
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field {
    Value(f64),
    /// El canal no tenía muestra en este índice
    Missing,
}

/// Una fila alineada por índice. El magnetómetro siempre está presente
/// porque es la secuencia que guía la exportación.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRow {
    pub magnetometer: Reading,
    pub heading: f64,
    pub accelerometer: Option<Reading>,
    pub gyroscope: Option<Reading>,
}

impl ExportRow {
    /// Los 10 campos en el orden de la cabecera
    pub fn fields(&self) -> [Field; FIELDS_PER_ROW] {
        let axes = |reading: Option<Reading>| match reading {
            Some(r) => [Field::Value(r.x), Field::Value(r.y), Field::Value(r.z)],
            None => [Field::Missing; 3],
        };
        let [ax, ay, az] = axes(self.accelerometer);
        let [gx, gy, gz] = axes(self.gyroscope);
        [
            Field::Value(self.magnetometer.x),
            Field::Value(self.magnetometer.y),
            Field::Value(self.magnetometer.z),
            Field::Value(self.heading),
            ax,
            ay,
            az,
            gx,
            gy,
            gz,
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportDocument {
    rows: Vec<ExportRow>,
}

impl ExportDocument {
    pub fn rows(&self) -> &[ExportRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn missing_count(&self, kind: ChannelKind) -> usize {
        self.rows
            .iter()
            .filter(|row| match kind {
                ChannelKind::Accelerometer => row.accelerometer.is_none(),
                ChannelKind::Gyroscope => row.gyroscope.is_none(),
                ChannelKind::Magnetometer => false,
            })
            .count()
    }
}

/// Opciones de formato del documento
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    /// Decimales fijos del rumbo; los campos crudos usan el formato por defecto
    pub heading_decimals: usize,
    pub missing_marker: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            heading_decimals: 2,
            missing_marker: DEFAULT_MISSING_MARKER.to_string(),
        }
    }
}

/// El marcador tiene que sobrevivir a la relectura del CSV: un campo no vacío,
/// sin separadores ni comillas, sin espacios en los extremos (se recortan al
/// leer) y que no se confunda con un número.
pub fn validate_missing_marker(marker: &str) -> Result<(), RecorderError> {
    let reason = if marker.is_empty() {
        "must not be empty"
    } else if marker.trim() != marker {
        "must not start or end with whitespace"
    } else if marker.contains([',', '"', '\n', '\r']) {
        "must not contain commas, quotes or line breaks"
    } else if marker.parse::<f64>().is_ok() {
        "must not parse as a number"
    } else {
        return Ok(());
    };
    Err(RecorderError::InvalidMarker {
        marker: marker.to_string(),
        reason,
    })
}

/// Resultado de una exportación correcta
#[derive(Debug, Clone)]
pub struct ExportReport {
    pub file_name: String,
    pub path: PathBuf,
    pub rows: usize,
    pub missing_accelerometer: usize,
    pub missing_gyroscope: usize,
}

/// `magnetometer_data_<marca UTC>.csv`
pub fn export_file_name(at: DateTime<Utc>) -> String {
    format!("magnetometer_data_{}.csv", at.format("%Y%m%dT%H%M%S%.3fZ"))
}

pub struct SessionExporter {
    options: ExportOptions,
}

impl SessionExporter {
    pub fn new(options: ExportOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Une los tres buffers por posición.
    ///
    /// El magnetómetro guía: hay una fila por muestra de magnetómetro. Si el
    /// acelerómetro o el giroscopio son más cortos, sus campos quedan como
    /// [`Field::Missing`]; si son más largos, el exceso no se exporta.
    pub fn build(
        accelerometer: &[SensorSample],
        magnetometer: &[SensorSample],
        gyroscope: &[SensorSample],
    ) -> Result<ExportDocument, RecorderError> {
        if accelerometer.is_empty() || magnetometer.is_empty() {
            return Err(RecorderError::EmptySession);
        }

        let rows = magnetometer
            .iter()
            .enumerate()
            .map(|(i, mag)| ExportRow {
                magnetometer: mag.reading(),
                heading: heading(mag.x, mag.y),
                accelerometer: accelerometer.get(i).map(SensorSample::reading),
                gyroscope: gyroscope.get(i).map(SensorSample::reading),
            })
            .collect();

        Ok(ExportDocument { rows })
    }

    fn format_field(&self, out: &mut String, field: Field, is_heading: bool) {
        match field {
            Field::Value(v) if is_heading => {
                let _ = write!(out, "{:.*}", self.options.heading_decimals, v);
            }
            Field::Value(v) => {
                let _ = write!(out, "{}", v);
            }
            Field::Missing => out.push_str(&self.options.missing_marker),
        }
    }

    /// Cabecera + una línea por fila, separadas por ", " y terminadas en LF
    pub fn render(&self, document: &ExportDocument) -> String {
        let mut text = String::with_capacity(EXPORT_HEADER.len() + 1 + document.len() * 96);
        text.push_str(EXPORT_HEADER);
        text.push('\n');

        for row in document.rows() {
            for (i, field) in row.fields().into_iter().enumerate() {
                if i > 0 {
                    text.push_str(FIELD_SEPARATOR);
                }
                self.format_field(&mut text, field, i == 3);
            }
            text.push('\n');
        }

        text
    }

    /// Exporta la sesión a un fichero nuevo del directorio concedido.
    ///
    /// Lectura, escritura y borrado ocurren bajo el cerrojo de sesión. Si algo
    /// falla, los buffers quedan intactos para reintentar y no queda ningún
    /// fichero a medias. Si todo va bien se eliminan exactamente las muestras
    /// exportadas; lo que llegó durante la escritura pertenece a la sesión
    /// siguiente.
    pub fn export(
        &self,
        buffers: &SessionBuffers,
        storage: &dyn StorageAccess,
    ) -> Result<ExportReport, RecorderError> {
        self.export_at(buffers, storage, Utc::now())
    }

    pub fn export_at(
        &self,
        buffers: &SessionBuffers,
        storage: &dyn StorageAccess,
        at: DateTime<Utc>,
    ) -> Result<ExportReport, RecorderError> {
        let _session = buffers.lock_session();

        let accelerometer = buffers.get(ChannelKind::Accelerometer).snapshot();
        let magnetometer = buffers.get(ChannelKind::Magnetometer).snapshot();
        let gyroscope = buffers.get(ChannelKind::Gyroscope).snapshot();

        let document = Self::build(&accelerometer, &magnetometer, &gyroscope)?;

        let grant = storage.request_directory()?;
        let file_name = export_file_name(at);
        let text = self.render(&document);

        let mut out = storage.create_file(&grant, &file_name, EXPORT_MIME_TYPE)?;
        let written = out.write_all(text.as_bytes()).and_then(|()| out.flush());
        drop(out);
        if let Err(e) = written {
            log::error!("Writing {} failed: {}", file_name, e);
            // No dejar un CSV truncado junto a las exportaciones buenas
            if let Err(cleanup) = storage.discard(&grant, &file_name) {
                log::warn!("Could not remove partial export {}: {}", file_name, cleanup);
            }
            return Err(RecorderError::WriteFailure(e));
        }

        let report = ExportReport {
            path: storage.location_of(&grant, &file_name),
            file_name,
            rows: document.len(),
            missing_accelerometer: document.missing_count(ChannelKind::Accelerometer),
            missing_gyroscope: document.missing_count(ChannelKind::Gyroscope),
        };

        buffers
            .get(ChannelKind::Accelerometer)
            .drain_front(accelerometer.len());
        buffers
            .get(ChannelKind::Magnetometer)
            .drain_front(magnetometer.len());
        buffers.get(ChannelKind::Gyroscope).drain_front(gyroscope.len());

        log::info!(
            "Exported {} rows to {} (missing accel={}, gyro={})",
            report.rows,
            report.path.display(),
            report.missing_accelerometer,
            report.missing_gyroscope
        );
        if report.missing_accelerometer > 0 || report.missing_gyroscope > 0 {
            log::warn!(
                "Channel lengths differed at export: accel={} mag={} gyro={}",
                accelerometer.len(),
                magnetometer.len(),
                gyroscope.len()
            );
        }

        Ok(report)
    }
}

impl Default for SessionExporter {
    fn default() -> Self {
        Self::new(ExportOptions::default())
    }
}

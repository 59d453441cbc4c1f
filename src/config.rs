use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::RecorderError;
use crate::exporter::{validate_missing_marker, ExportOptions, DEFAULT_MISSING_MARKER};
use crate::types::SamplingRate;

/// Parámetros de configuración del grabador
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Intervalo inicial entre lecturas en ms (default: 100, preajuste Fast)
    pub sampling_rate_ms: u64,
    /// Directorio concedido para las exportaciones (default: "sesiones")
    pub export_dir: PathBuf,
    /// Crear el directorio si no existe (default: true)
    pub create_export_dir: bool,
    /// Decimales del rumbo en el CSV (default: 2)
    pub heading_decimals: usize,
    /// Marcador para campos sin muestra (default: "missing")
    pub missing_marker: String,
    /// Cada cuánto se imprime el estado en vivo, en ms (default: 1000)
    pub status_interval_ms: u64,
    /// Amplitud del ruido de los canales simulados (default: 0.02)
    pub simulated_noise: f64,
    /// Empezar a grabar al arrancar (default: true)
    pub autostart: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            sampling_rate_ms: SamplingRate::FAST.as_millis(),
            export_dir: PathBuf::from("sesiones"),
            create_export_dir: true,
            heading_decimals: 2,
            missing_marker: DEFAULT_MISSING_MARKER.to_string(),
            status_interval_ms: 1000,
            simulated_noise: 0.02,
            autostart: true,
        }
    }
}

impl RecorderConfig {
    /// Carga la configuración desde un JSON; los campos ausentes toman su
    /// valor por defecto.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RecorderError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| RecorderError::ReadFailure {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&content)?;
        log::debug!("Loaded config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self, RecorderError> {
        let config: RecorderConfig = serde_json::from_str(content)?;
        config.sampling_rate()?;
        validate_missing_marker(&config.missing_marker)?;
        Ok(config)
    }

    pub fn sampling_rate(&self) -> Result<SamplingRate, RecorderError> {
        SamplingRate::from_millis(self.sampling_rate_ms)
    }

    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            heading_decimals: self.heading_decimals,
            missing_marker: self.missing_marker.clone(),
        }
    }
}

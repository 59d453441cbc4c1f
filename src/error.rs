use std::path::PathBuf;

use thiserror::Error;

use crate::types::ChannelKind;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Recording is already active")]
    AlreadyRecording,

    #[error("Recording is not active")]
    NotRecording,

    #[error("Nothing to export: accelerometer or magnetometer buffer is empty")]
    EmptySession,

    #[error("Directory permission not granted: {0}")]
    PermissionDenied(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Write failure: {0}")]
    WriteFailure(#[from] std::io::Error),

    #[error("{kind} subscription failed: {reason}")]
    SubscribeFailed { kind: ChannelKind, reason: String },

    #[error("Invalid sampling rate: {0} ms")]
    InvalidRate(u64),

    #[error("Unrecognized sampling rate {0:?} (expected fast, normal, slow or milliseconds)")]
    UnparsableRate(String),

    #[error("Invalid missing marker {marker:?}: {reason}")]
    InvalidMarker { marker: String, reason: &'static str },

    #[error("Cannot read {path}: {source}")]
    ReadFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Malformed export at line {line}: {reason}")]
    MalformedExport { line: usize, reason: String },
}

impl RecorderError {
    /// Todos los errores del núcleo son recuperables; esto sólo distingue los
    /// que dejan los buffers intactos para reintentar la exportación.
    pub fn is_retryable_export(&self) -> bool {
        matches!(
            self,
            RecorderError::PermissionDenied(_)
                | RecorderError::UnsupportedPlatform(_)
                | RecorderError::WriteFailure(_)
        )
    }
}

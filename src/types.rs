use std::fmt;

use crate::error::RecorderError;

/// Lectura cruda entregada por un canal: [x, y, z]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Reading {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Reading {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Una muestra ya almacenada en su buffer.
/// `timestamp` es la hora de llegada (ms desde epoch) asignada por el buffer,
/// no la del hardware.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub timestamp: i64,
}

impl SensorSample {
    pub fn new(reading: Reading, timestamp: i64) -> Self {
        Self {
            x: reading.x,
            y: reading.y,
            z: reading.z,
            timestamp,
        }
    }

    pub fn reading(&self) -> Reading {
        Reading::new(self.x, self.y, self.z)
    }
}

/// Los tres flujos lógicos de sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Accelerometer,
    Magnetometer,
    Gyroscope,
}

impl ChannelKind {
    /// Orden fijo de suscripción
    pub const ALL: [ChannelKind; NUM_CHANNELS] = [
        ChannelKind::Accelerometer,
        ChannelKind::Magnetometer,
        ChannelKind::Gyroscope,
    ];

    pub fn index(self) -> usize {
        match self {
            ChannelKind::Accelerometer => 0,
            ChannelKind::Magnetometer => 1,
            ChannelKind::Gyroscope => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ChannelKind::Accelerometer => "Accelerometer",
            ChannelKind::Magnetometer => "Magnetometer",
            ChannelKind::Gyroscope => "Gyroscope",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
}

impl RecordingState {
    pub fn is_recording(self) -> bool {
        self == RecordingState::Recording
    }
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingState::Idle => f.write_str("NOT RECORDING"),
            RecordingState::Recording => f.write_str("RECORDING"),
        }
    }
}

/// Milisegundos entre lecturas de hardware (siempre > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SamplingRate(u64);

impl SamplingRate {
    pub const FAST: SamplingRate = SamplingRate(100);
    pub const NORMAL: SamplingRate = SamplingRate(200);
    pub const SLOW: SamplingRate = SamplingRate(1000);

    pub fn from_millis(ms: u64) -> Result<Self, RecorderError> {
        if ms == 0 {
            return Err(RecorderError::InvalidRate(ms));
        }
        Ok(Self(ms))
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn interval(self) -> std::time::Duration {
        std::time::Duration::from_millis(self.0)
    }
}

impl Default for SamplingRate {
    fn default() -> Self {
        SamplingRate::FAST
    }
}

impl fmt::Display for SamplingRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ms", self.0)
    }
}

/// Los tres preajustes de la superficie de control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatePreset {
    Fast,
    Normal,
    Slow,
}

impl RatePreset {
    pub const ALL: [RatePreset; 3] = [RatePreset::Fast, RatePreset::Normal, RatePreset::Slow];

    pub fn rate(self) -> SamplingRate {
        match self {
            RatePreset::Fast => SamplingRate::FAST,
            RatePreset::Normal => SamplingRate::NORMAL,
            RatePreset::Slow => SamplingRate::SLOW,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RatePreset::Fast => "Fast (100)",
            RatePreset::Normal => "Normal (200)",
            RatePreset::Slow => "Slow (1000)",
        }
    }

    /// Conversión string → preajuste ("fast", "normal", "slow")
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "fast" => Some(RatePreset::Fast),
            "normal" => Some(RatePreset::Normal),
            "slow" => Some(RatePreset::Slow),
            _ => None,
        }
    }
}

/// Acepta un nombre de preajuste o un número de milisegundos
pub fn parse_rate(text: &str) -> Result<SamplingRate, RecorderError> {
    if let Some(preset) = RatePreset::parse(text) {
        return Ok(preset.rate());
    }
    let ms: u64 = text
        .trim()
        .parse()
        .map_err(|_| RecorderError::UnparsableRate(text.trim().to_string()))?;
    SamplingRate::from_millis(ms)
}

/// Constantes del sistema
pub const NUM_CHANNELS: usize = 3;
pub const FIELDS_PER_ROW: usize = 10;

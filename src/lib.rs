pub mod alignment_buffer;
pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod exporter;
pub mod heading;
pub mod platform;
pub mod session_loader;
pub mod storage;
pub mod types;

pub use error::RecorderError;
pub use types::{ChannelKind, Reading, RecordingState, SamplingRate, SensorSample};

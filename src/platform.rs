//! Comprobación de plataforma antes de construir el núcleo.
//!
//! La captura sólo está soportada en un host. El front end llama a
//! [`ensure_supported`] y, con el [`SupportedHost`] que devuelve, construye el
//! [`SamplingController`](crate::controller::SamplingController). Sin ese
//! token el controlador no se puede crear, así que el resto del núcleo asume
//! plataforma soportada.

use std::fmt;

use crate::error::RecorderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Linux,
    Android,
    MacOs,
    Windows,
    Other(&'static str),
}

impl HostPlatform {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "linux" => HostPlatform::Linux,
            "android" => HostPlatform::Android,
            "macos" => HostPlatform::MacOs,
            "windows" => HostPlatform::Windows,
            other => HostPlatform::Other(other),
        }
    }
}

impl fmt::Display for HostPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostPlatform::Linux => f.write_str("linux"),
            HostPlatform::Android => f.write_str("android"),
            HostPlatform::MacOs => f.write_str("macos"),
            HostPlatform::Windows => f.write_str("windows"),
            HostPlatform::Other(name) => f.write_str(name),
        }
    }
}

pub const SUPPORTED_PLATFORM: HostPlatform = HostPlatform::Linux;

/// Prueba de que la comprobación de plataforma pasó
#[derive(Debug, Clone, Copy)]
pub struct SupportedHost {
    platform: HostPlatform,
}

impl SupportedHost {
    pub fn platform(&self) -> HostPlatform {
        self.platform
    }
}

pub fn ensure_supported(platform: HostPlatform) -> Result<SupportedHost, RecorderError> {
    if platform != SUPPORTED_PLATFORM {
        return Err(RecorderError::UnsupportedPlatform(format!(
            "{} (only {} is supported)",
            platform, SUPPORTED_PLATFORM
        )));
    }
    Ok(SupportedHost { platform })
}

pub fn ensure_current() -> Result<SupportedHost, RecorderError> {
    ensure_supported(HostPlatform::current())
}

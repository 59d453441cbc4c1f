use std::f64::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::alignment_buffer::lock;
use crate::types::{ChannelKind, Reading, SamplingRate};

/// Callback invocado una vez por lectura, desde el hilo del canal
pub type ReadingCallback = Arc<dyn Fn(Reading) + Send + Sync>;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("{0} channel already has an active subscription")]
    AlreadySubscribed(ChannelKind),

    #[error("{kind} sensor unavailable: {reason}")]
    Unavailable { kind: ChannelKind, reason: String },

    #[error("Failed to spawn {kind} worker: {source}")]
    Spawn {
        kind: ChannelKind,
        #[source]
        source: std::io::Error,
    },
}

/// Identifica una suscripción concreta; sólo sirve para cancelarla
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub kind: ChannelKind,
    pub id: u64,
}

/// Un flujo de sensor. Como mucho una suscripción activa a la vez.
pub trait SensorChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Empieza la entrega asíncrona de lecturas al callback
    fn subscribe(&self, callback: ReadingCallback) -> Result<SubscriptionHandle, ChannelError>;

    /// Detiene la entrega. Un handle ya retirado es un no-op.
    /// Al volver, no se hacen más llamadas al callback.
    fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), ChannelError>;

    /// Aplica a las entregas siguientes
    fn set_update_interval(&self, rate: SamplingRate);
}

/// Genera la siguiente lectura de un canal simulado
pub trait ReadingSource: Send {
    fn next_reading(&mut self) -> Reading;
}

impl<F> ReadingSource for F
where
    F: FnMut() -> Reading + Send,
{
    fn next_reading(&mut self) -> Reading {
        self()
    }
}

/// Vector constante más ruido uniforme en [-noise, noise]
pub struct NoisySource {
    base: Reading,
    noise: f64,
    rng: StdRng,
}

impl NoisySource {
    pub fn new(base: Reading, noise: f64) -> Self {
        Self {
            base,
            noise: noise.abs(),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(base: Reading, noise: f64, seed: u64) -> Self {
        Self {
            base,
            noise: noise.abs(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn jitter(&mut self) -> f64 {
        if self.noise == 0.0 {
            0.0
        } else {
            self.rng.gen_range(-self.noise..=self.noise)
        }
    }
}

impl ReadingSource for NoisySource {
    fn next_reading(&mut self) -> Reading {
        Reading::new(
            self.base.x + self.jitter(),
            self.base.y + self.jitter(),
            self.base.z + self.jitter(),
        )
    }
}

/// Campo magnético horizontal que gira `step_deg` grados por lectura,
/// para que el rumbo barra los 360°.
pub struct RotatingField {
    magnitude: f64,
    vertical: f64,
    angle: f64,
    step: f64,
}

impl RotatingField {
    pub fn new(magnitude: f64, vertical: f64, step_deg: f64) -> Self {
        Self {
            magnitude,
            vertical,
            angle: 0.0,
            step: step_deg.to_radians(),
        }
    }
}

impl ReadingSource for RotatingField {
    fn next_reading(&mut self) -> Reading {
        let reading = Reading::new(
            self.magnitude * self.angle.cos(),
            self.magnitude * self.angle.sin(),
            self.vertical,
        );
        self.angle = (self.angle + self.step) % TAU;
        reading
    }
}

struct ActiveStream {
    id: u64,
    stop_tx: Sender<()>,
    worker: JoinHandle<()>,
}

/// Canal respaldado por un hilo que emite lecturas cada `interval` ms.
/// El intervalo vive en un atómico para que `set_update_interval` no
/// tenga que parar el hilo.
pub struct SimulatedChannel {
    kind: ChannelKind,
    interval_ms: Arc<AtomicU64>,
    source: Arc<Mutex<Box<dyn ReadingSource>>>,
    active: Mutex<Option<ActiveStream>>,
    next_id: AtomicU64,
}

impl SimulatedChannel {
    pub fn new(kind: ChannelKind, source: impl ReadingSource + 'static) -> Self {
        Self {
            kind,
            interval_ms: Arc::new(AtomicU64::new(SamplingRate::default().as_millis())),
            source: Arc::new(Mutex::new(Box::new(source))),
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Valores típicos de un teléfono en reposo sobre la mesa
    pub fn with_defaults(kind: ChannelKind, noise: f64) -> Self {
        match kind {
            ChannelKind::Accelerometer => {
                Self::new(kind, NoisySource::new(Reading::new(0.0, 0.0, 1.0), noise))
            }
            ChannelKind::Magnetometer => Self::new(kind, RotatingField::new(30.0, -40.0, 1.5)),
            ChannelKind::Gyroscope => {
                Self::new(kind, NoisySource::new(Reading::new(0.0, 0.0, 0.0), noise))
            }
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms.load(Ordering::Relaxed)
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.active).is_some()
    }
}

impl SensorChannel for SimulatedChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn subscribe(&self, callback: ReadingCallback) -> Result<SubscriptionHandle, ChannelError> {
        let mut active = lock(&self.active);
        if active.is_some() {
            return Err(ChannelError::AlreadySubscribed(self.kind));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let interval_ms = Arc::clone(&self.interval_ms);
        let source = Arc::clone(&self.source);
        let kind = self.kind;

        let worker = thread::Builder::new()
            .name(format!("canal-{}", kind.label().to_lowercase()))
            .spawn(move || {
                log::debug!("{} stream started", kind);
                loop {
                    let wait = std::time::Duration::from_millis(interval_ms.load(Ordering::Relaxed));
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {
                            let reading = lock(&source).next_reading();
                            callback(reading);
                        }
                        // Señal de parada o emisor soltado
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::debug!("{} stream stopped", kind);
            })
            .map_err(|source| ChannelError::Spawn { kind, source })?;

        *active = Some(ActiveStream {
            id,
            stop_tx,
            worker,
        });
        Ok(SubscriptionHandle { kind, id })
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), ChannelError> {
        let stream = {
            let mut active = lock(&self.active);
            match active.as_ref() {
                Some(stream) if stream.id == handle.id && handle.kind == self.kind => active.take(),
                _ => None,
            }
        };

        let Some(stream) = stream else {
            log::debug!("{} unsubscribe ignored: handle {} not active", self.kind, handle.id);
            return Ok(());
        };

        let _ = stream.stop_tx.send(());
        if stream.worker.join().is_err() {
            log::warn!("{} worker panicked before stopping", self.kind);
        }
        Ok(())
    }

    fn set_update_interval(&self, rate: SamplingRate) {
        self.interval_ms.store(rate.as_millis(), Ordering::Relaxed);
    }
}

impl Drop for SimulatedChannel {
    fn drop(&mut self) {
        let stream = lock(&self.active).take();
        if let Some(stream) = stream {
            let _ = stream.stop_tx.send(());
            let _ = stream.worker.join();
        }
    }
}

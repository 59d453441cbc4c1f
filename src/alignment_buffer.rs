use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use crate::types::{ChannelKind, Reading, SensorSample, NUM_CHANNELS};

/// Hora de llegada en milisegundos desde epoch
pub fn arrival_timestamp() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Un hilo de canal que entra en pánico no debe bloquear la sesión
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registro de sólo-anexar de un canal.
/// El orden de anexado es el orden de llegada; un único escritor por buffer.
pub struct AlignmentBuffer {
    kind: ChannelKind,
    samples: Mutex<Vec<SensorSample>>,
}

impl AlignmentBuffer {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            samples: Mutex::new(Vec::new()),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Añade una lectura con timestamp de llegada. Retorna la nueva longitud.
    pub fn append(&self, reading: Reading) -> usize {
        self.append_at(reading, arrival_timestamp())
    }

    pub fn append_at(&self, reading: Reading, timestamp: i64) -> usize {
        let mut samples = lock(&self.samples);
        samples.push(SensorSample::new(reading, timestamp));
        samples.len()
    }

    /// Obtiene el número de muestras acumuladas
    pub fn len(&self) -> usize {
        lock(&self.samples).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.samples).is_empty()
    }

    /// Copia de las muestras actuales, en orden de llegada
    pub fn snapshot(&self) -> Vec<SensorSample> {
        lock(&self.samples).clone()
    }

    pub fn last(&self) -> Option<SensorSample> {
        lock(&self.samples).last().copied()
    }

    /// Elimina las primeras `count` muestras (las ya exportadas).
    /// Lo que llegó después de la instantánea se conserva.
    pub fn drain_front(&self, count: usize) -> usize {
        let mut samples = lock(&self.samples);
        let count = count.min(samples.len());
        samples.drain(..count);
        count
    }

    /// Limpia el buffer
    pub fn clear(&self) -> usize {
        let mut samples = lock(&self.samples);
        let removed = samples.len();
        samples.clear();
        removed
    }
}

/// Los tres buffers de una sesión más el cerrojo que serializa
/// exportación y borrado.
pub struct SessionBuffers {
    buffers: [AlignmentBuffer; NUM_CHANNELS],
    latest: [Mutex<Option<Reading>>; NUM_CHANNELS],
    session: Mutex<()>,
}

impl SessionBuffers {
    pub fn new() -> Self {
        Self {
            buffers: ChannelKind::ALL.map(AlignmentBuffer::new),
            latest: [Mutex::new(None), Mutex::new(None), Mutex::new(None)],
            session: Mutex::new(()),
        }
    }

    pub fn get(&self, kind: ChannelKind) -> &AlignmentBuffer {
        &self.buffers[kind.index()]
    }

    /// Punto de entrada de los callbacks de canal. Sólo toca el buffer de
    /// `kind`; los tres canales pueden llamar a la vez.
    pub fn record(&self, kind: ChannelKind, reading: Reading) -> usize {
        *lock(&self.latest[kind.index()]) = Some(reading);
        self.get(kind).append(reading)
    }

    /// Última lectura recibida por el canal (no se borra con los buffers)
    pub fn latest(&self, kind: ChannelKind) -> Option<Reading> {
        *lock(&self.latest[kind.index()])
    }

    /// Longitudes en orden [accel, mag, gyro]
    pub fn lengths(&self) -> [usize; NUM_CHANNELS] {
        ChannelKind::ALL.map(|kind| self.get(kind).len())
    }

    /// Regla de habilitación de "borrar" y "exportar": acelerómetro y
    /// magnetómetro con datos.
    pub fn has_exportable_data(&self) -> bool {
        !self.get(ChannelKind::Accelerometer).is_empty()
            && !self.get(ChannelKind::Magnetometer).is_empty()
    }

    /// Exclusión mutua entre exportación y borrado
    pub fn lock_session(&self) -> MutexGuard<'_, ()> {
        lock(&self.session)
    }

    pub fn clear_all(&self) -> [usize; NUM_CHANNELS] {
        let _session = self.lock_session();
        ChannelKind::ALL.map(|kind| self.get(kind).clear())
    }
}

impl Default for SessionBuffers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn reading(i: usize) -> Reading {
        Reading::new(i as f64, 0.0, 0.0)
    }

    #[test]
    fn test_append_grows_by_one_and_keeps_order() {
        let buffer = AlignmentBuffer::new(ChannelKind::Magnetometer);
        for i in 0..50 {
            let before = buffer.len();
            let after = buffer.append(reading(i));
            assert_eq!(after, before + 1);
        }

        let xs: Vec<f64> = buffer.snapshot().iter().map(|s| s.x).collect();
        let expected: Vec<f64> = (0..50).map(|i| i as f64).collect();
        assert_eq!(xs, expected);
    }

    #[test]
    fn test_timestamps_are_arrival_times() {
        let buffer = AlignmentBuffer::new(ChannelKind::Gyroscope);
        let before = arrival_timestamp();
        buffer.append(reading(1));
        buffer.append(reading(2));
        let after = arrival_timestamp();

        let samples = buffer.snapshot();
        assert!(samples[0].timestamp >= before);
        assert!(samples[1].timestamp <= after);
        assert!(samples[0].timestamp <= samples[1].timestamp);
    }

    #[test]
    fn test_drain_front_keeps_late_arrivals() {
        let buffer = AlignmentBuffer::new(ChannelKind::Accelerometer);
        for i in 0..5 {
            buffer.append_at(reading(i), i as i64);
        }
        assert_eq!(buffer.drain_front(3), 3);
        let xs: Vec<f64> = buffer.snapshot().iter().map(|s| s.x).collect();
        assert_eq!(xs, vec![3.0, 4.0]);

        // Pedir más de lo que hay no falla
        assert_eq!(buffer.drain_front(10), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_concurrent_channels_each_keep_their_order() {
        let buffers = Arc::new(SessionBuffers::new());
        let mut workers = Vec::new();

        for kind in ChannelKind::ALL {
            let buffers = Arc::clone(&buffers);
            workers.push(thread::spawn(move || {
                for i in 0..1000 {
                    buffers.record(kind, reading(i));
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(buffers.lengths(), [1000, 1000, 1000]);
        for kind in ChannelKind::ALL {
            let xs: Vec<f64> = buffers.get(kind).snapshot().iter().map(|s| s.x).collect();
            assert!(xs.windows(2).all(|w| w[0] < w[1]), "{} desordenado", kind);
        }
    }

    #[test]
    fn test_exportable_rule_ignores_gyroscope() {
        let buffers = SessionBuffers::new();
        buffers.record(ChannelKind::Gyroscope, reading(0));
        assert!(!buffers.has_exportable_data());

        buffers.record(ChannelKind::Accelerometer, reading(0));
        assert!(!buffers.has_exportable_data());

        buffers.record(ChannelKind::Magnetometer, reading(0));
        assert!(buffers.has_exportable_data());
    }

    #[test]
    fn test_clear_all_keeps_latest_reading() {
        let buffers = SessionBuffers::new();
        buffers.record(ChannelKind::Magnetometer, Reading::new(1.0, 2.0, 3.0));
        buffers.record(ChannelKind::Accelerometer, reading(7));

        assert_eq!(buffers.clear_all(), [1, 1, 0]);
        assert_eq!(buffers.lengths(), [0, 0, 0]);
        assert_eq!(
            buffers.latest(ChannelKind::Magnetometer),
            Some(Reading::new(1.0, 2.0, 3.0))
        );
    }
}

use std::sync::{Arc, Mutex};

use crate::alignment_buffer::{lock, SessionBuffers};
use crate::channel::{ReadingCallback, SensorChannel, SubscriptionHandle};
use crate::error::RecorderError;
use crate::exporter::{ExportReport, SessionExporter};
use crate::platform::SupportedHost;
use crate::storage::StorageAccess;
use crate::types::{ChannelKind, Reading, RecordingState, SamplingRate, NUM_CHANNELS};

/// Fases internas. `Starting` y `Stopping` se ven desde fuera como el estado
/// de partida, así nunca se observa una grabación parcial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Starting,
    Recording,
    Stopping,
}

struct Lifecycle {
    phase: Phase,
    rate: SamplingRate,
    handles: Vec<SubscriptionHandle>,
}

/// Los tres canales indexados por [`ChannelKind::index`]
pub struct ChannelSet {
    channels: [Box<dyn SensorChannel>; NUM_CHANNELS],
}

impl ChannelSet {
    /// Falla si algún canal no está en su posición
    pub fn new(
        accelerometer: Box<dyn SensorChannel>,
        magnetometer: Box<dyn SensorChannel>,
        gyroscope: Box<dyn SensorChannel>,
    ) -> Result<Self, RecorderError> {
        let channels = [accelerometer, magnetometer, gyroscope];
        for (expected, channel) in ChannelKind::ALL.iter().zip(channels.iter()) {
            if channel.kind() != *expected {
                return Err(RecorderError::SubscribeFailed {
                    kind: *expected,
                    reason: format!("slot holds a {} channel", channel.kind()),
                });
            }
        }
        Ok(Self { channels })
    }

    pub fn get(&self, kind: ChannelKind) -> &dyn SensorChannel {
        self.channels[kind.index()].as_ref()
    }
}

/// Dueño del ciclo de grabación y de la frecuencia de los tres canales.
pub struct SamplingController {
    host: SupportedHost,
    channels: ChannelSet,
    buffers: Arc<SessionBuffers>,
    lifecycle: Mutex<Lifecycle>,
}

impl SamplingController {
    pub fn new(host: SupportedHost, channels: ChannelSet, rate: SamplingRate) -> Self {
        log::debug!("Sampling controller ready on {} at {}", host.platform(), rate);
        Self {
            host,
            channels,
            buffers: Arc::new(SessionBuffers::new()),
            lifecycle: Mutex::new(Lifecycle {
                phase: Phase::Idle,
                rate,
                handles: Vec::with_capacity(NUM_CHANNELS),
            }),
        }
    }

    pub fn host(&self) -> SupportedHost {
        self.host
    }

    pub fn state(&self) -> RecordingState {
        match lock(&self.lifecycle).phase {
            Phase::Recording | Phase::Stopping => RecordingState::Recording,
            Phase::Idle | Phase::Starting => RecordingState::Idle,
        }
    }

    pub fn rate(&self) -> SamplingRate {
        lock(&self.lifecycle).rate
    }

    pub fn buffers(&self) -> &SessionBuffers {
        &self.buffers
    }

    /// Longitudes en orden [accel, mag, gyro]
    pub fn buffer_lengths(&self) -> [usize; NUM_CHANNELS] {
        self.buffers.lengths()
    }

    pub fn latest(&self, kind: ChannelKind) -> Option<Reading> {
        self.buffers.latest(kind)
    }

    pub fn can_export(&self) -> bool {
        self.buffers.has_exportable_data()
    }

    pub fn can_clear(&self) -> bool {
        self.buffers.has_exportable_data()
    }

    /// Callback de un canal: anexa la lectura a su buffer con hora de llegada
    pub fn on_reading(&self, kind: ChannelKind, reading: Reading) -> usize {
        self.buffers.record(kind, reading)
    }

    fn callback_for(&self, kind: ChannelKind) -> ReadingCallback {
        let buffers = Arc::clone(&self.buffers);
        Arc::new(move |reading| {
            buffers.record(kind, reading);
        })
    }

    /// Suscribe los tres canales en orden fijo. Si uno falla se deshacen los
    /// ya suscritos y el controlador sigue en Idle.
    pub fn start(&self) -> Result<(), RecorderError> {
        let rate = {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.phase != Phase::Idle {
                return Err(RecorderError::AlreadyRecording);
            }
            lifecycle.phase = Phase::Starting;
            for kind in ChannelKind::ALL {
                self.channels.get(kind).set_update_interval(lifecycle.rate);
            }
            lifecycle.rate
        };

        let mut handles = Vec::with_capacity(NUM_CHANNELS);
        for kind in ChannelKind::ALL {
            match self.channels.get(kind).subscribe(self.callback_for(kind)) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    log::error!("{} subscribe failed, rolling back: {}", kind, e);
                    self.release(&handles);
                    lock(&self.lifecycle).phase = Phase::Idle;
                    return Err(RecorderError::SubscribeFailed {
                        kind,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let mut lifecycle = lock(&self.lifecycle);
        lifecycle.handles = handles;
        lifecycle.phase = Phase::Recording;
        log::info!("Recording started at {}", rate);
        Ok(())
    }

    /// Cancela las tres suscripciones. No borra los buffers.
    pub fn stop(&self) -> Result<(), RecorderError> {
        let handles = {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.phase != Phase::Recording {
                return Err(RecorderError::NotRecording);
            }
            lifecycle.phase = Phase::Stopping;
            std::mem::take(&mut lifecycle.handles)
        };

        self.release(&handles);

        lock(&self.lifecycle).phase = Phase::Idle;
        let [acc, mag, gyro] = self.buffers.lengths();
        log::info!(
            "Recording stopped (buffered accel={} mag={} gyro={})",
            acc,
            mag,
            gyro
        );
        Ok(())
    }

    /// Best effort: un fallo al cancelar sólo se registra
    fn release(&self, handles: &[SubscriptionHandle]) {
        for handle in handles {
            if let Err(e) = self.channels.get(handle.kind).unsubscribe(*handle) {
                log::warn!("{} unsubscribe failed: {}", handle.kind, e);
            }
        }
    }

    /// Cambia la frecuencia objetivo. Si se está grabando, se difunde a los
    /// tres canales sin reiniciar la grabación.
    pub fn set_rate(&self, rate: SamplingRate) {
        let mut lifecycle = lock(&self.lifecycle);
        lifecycle.rate = rate;
        if lifecycle.phase != Phase::Idle {
            for kind in ChannelKind::ALL {
                self.channels.get(kind).set_update_interval(rate);
            }
        }
        log::info!("Sampling rate set to {}", rate);
    }

    pub fn clear_buffers(&self) -> [usize; NUM_CHANNELS] {
        let removed = self.buffers.clear_all();
        log::info!("Cleared buffers {:?}", removed);
        removed
    }

    pub fn export(
        &self,
        exporter: &SessionExporter,
        storage: &dyn StorageAccess,
    ) -> Result<ExportReport, RecorderError> {
        exporter.export(&self.buffers, storage)
    }
}

impl Drop for SamplingController {
    fn drop(&mut self) {
        let handles = std::mem::take(&mut lock(&self.lifecycle).handles);
        self.release(&handles);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelError;
    use crate::platform::{ensure_supported, HostPlatform};
    use crate::storage::LocalDirectory;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Barrier;

    /// Canal manual: guarda el callback y deja que el test empuje lecturas
    struct ManualChannel {
        kind: ChannelKind,
        fail_subscribe: bool,
        fail_unsubscribe: bool,
        callback: Mutex<Option<(u64, ReadingCallback)>>,
        next_id: AtomicU64,
        interval_ms: AtomicU64,
        subscribe_calls: AtomicUsize,
        unsubscribe_calls: AtomicUsize,
    }

    impl ManualChannel {
        fn new(kind: ChannelKind) -> Arc<Self> {
            Self::build(kind, false, false)
        }

        fn failing(kind: ChannelKind) -> Arc<Self> {
            Self::build(kind, true, false)
        }

        /// Se suscribe bien pero no se deja cancelar
        fn stubborn(kind: ChannelKind) -> Arc<Self> {
            Self::build(kind, false, true)
        }

        fn build(kind: ChannelKind, fail_subscribe: bool, fail_unsubscribe: bool) -> Arc<Self> {
            Arc::new(Self {
                kind,
                fail_subscribe,
                fail_unsubscribe,
                callback: Mutex::new(None),
                next_id: AtomicU64::new(1),
                interval_ms: AtomicU64::new(0),
                subscribe_calls: AtomicUsize::new(0),
                unsubscribe_calls: AtomicUsize::new(0),
            })
        }

        fn emit(&self, reading: Reading) -> bool {
            let callback = self.callback.lock().unwrap().as_ref().map(|(_, cb)| Arc::clone(cb));
            match callback {
                Some(cb) => {
                    cb(reading);
                    true
                }
                None => false,
            }
        }

        fn active(&self) -> bool {
            self.callback.lock().unwrap().is_some()
        }
    }

    /// Adaptador para poder compartir el canal con el test
    struct Shared(Arc<ManualChannel>);

    impl SensorChannel for Shared {
        fn kind(&self) -> ChannelKind {
            self.0.kind
        }

        fn subscribe(&self, callback: ReadingCallback) -> Result<SubscriptionHandle, ChannelError> {
            self.0.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            if self.0.fail_subscribe {
                return Err(ChannelError::Unavailable {
                    kind: self.0.kind,
                    reason: "sensor ausente".into(),
                });
            }
            let mut slot = self.0.callback.lock().unwrap();
            if slot.is_some() {
                return Err(ChannelError::AlreadySubscribed(self.0.kind));
            }
            let id = self.0.next_id.fetch_add(1, Ordering::SeqCst);
            *slot = Some((id, callback));
            Ok(SubscriptionHandle {
                kind: self.0.kind,
                id,
            })
        }

        fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), ChannelError> {
            self.0.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
            if self.0.fail_unsubscribe {
                return Err(ChannelError::Unavailable {
                    kind: self.0.kind,
                    reason: "el sensor no responde".into(),
                });
            }
            let mut slot = self.0.callback.lock().unwrap();
            if matches!(slot.as_ref(), Some((id, _)) if *id == handle.id) {
                *slot = None;
            }
            Ok(())
        }

        fn set_update_interval(&self, rate: SamplingRate) {
            self.0.interval_ms.store(rate.as_millis(), Ordering::SeqCst);
        }
    }

    /// Canal cuyo subscribe se queda dentro hasta que el test lo suelta
    struct GatedChannel {
        kind: ChannelKind,
        entered: Barrier,
        release: Barrier,
        subscribe_calls: AtomicUsize,
    }

    impl GatedChannel {
        fn new(kind: ChannelKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                entered: Barrier::new(2),
                release: Barrier::new(2),
                subscribe_calls: AtomicUsize::new(0),
            })
        }
    }

    impl SensorChannel for Arc<GatedChannel> {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        fn subscribe(&self, _callback: ReadingCallback) -> Result<SubscriptionHandle, ChannelError> {
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            self.entered.wait();
            self.release.wait();
            Ok(SubscriptionHandle {
                kind: self.kind,
                id: 1,
            })
        }

        fn unsubscribe(&self, _handle: SubscriptionHandle) -> Result<(), ChannelError> {
            Ok(())
        }

        fn set_update_interval(&self, _rate: SamplingRate) {}
    }

    struct Rig {
        controller: SamplingController,
        acc: Arc<ManualChannel>,
        mag: Arc<ManualChannel>,
        gyro: Arc<ManualChannel>,
    }

    impl Rig {
        fn channel(&self, kind: ChannelKind) -> &ManualChannel {
            match kind {
                ChannelKind::Accelerometer => self.acc.as_ref(),
                ChannelKind::Magnetometer => self.mag.as_ref(),
                ChannelKind::Gyroscope => self.gyro.as_ref(),
            }
        }
    }

    fn rig_with(acc: Arc<ManualChannel>, mag: Arc<ManualChannel>, gyro: Arc<ManualChannel>) -> Rig {
        let host = ensure_supported(HostPlatform::Linux).unwrap();
        let channels = ChannelSet::new(
            Box::new(Shared(Arc::clone(&acc))),
            Box::new(Shared(Arc::clone(&mag))),
            Box::new(Shared(Arc::clone(&gyro))),
        )
        .unwrap();
        Rig {
            controller: SamplingController::new(host, channels, SamplingRate::FAST),
            acc,
            mag,
            gyro,
        }
    }

    fn rig() -> Rig {
        rig_with(
            ManualChannel::new(ChannelKind::Accelerometer),
            ManualChannel::new(ChannelKind::Magnetometer),
            ManualChannel::new(ChannelKind::Gyroscope),
        )
    }

    #[test]
    fn test_start_subscribes_all_three() {
        let rig = rig();
        assert_eq!(rig.controller.state(), RecordingState::Idle);
        rig.controller.start().unwrap();
        assert_eq!(rig.controller.state(), RecordingState::Recording);
        for kind in ChannelKind::ALL {
            assert!(rig.channel(kind).active());
            assert_eq!(rig.channel(kind).interval_ms.load(Ordering::SeqCst), 100);
        }
    }

    #[test]
    fn test_second_start_rejected_without_double_subscription() {
        let rig = rig();
        rig.controller.start().unwrap();
        assert!(matches!(
            rig.controller.start(),
            Err(RecorderError::AlreadyRecording)
        ));
        for kind in ChannelKind::ALL {
            assert_eq!(rig.channel(kind).subscribe_calls.load(Ordering::SeqCst), 1);
            assert!(rig.channel(kind).active());
        }
    }

    #[test]
    fn test_start_while_start_in_flight_rejected() {
        let gate = GatedChannel::new(ChannelKind::Accelerometer);
        let mag = ManualChannel::new(ChannelKind::Magnetometer);
        let gyro = ManualChannel::new(ChannelKind::Gyroscope);
        let channels = ChannelSet::new(
            Box::new(Arc::clone(&gate)),
            Box::new(Shared(Arc::clone(&mag))),
            Box::new(Shared(Arc::clone(&gyro))),
        )
        .unwrap();
        let host = ensure_supported(HostPlatform::Linux).unwrap();
        let controller = SamplingController::new(host, channels, SamplingRate::FAST);

        std::thread::scope(|s| {
            let first = s.spawn(|| controller.start());
            // El primer start está dentro del subscribe del acelerómetro
            gate.entered.wait();

            assert_eq!(controller.state(), RecordingState::Idle);
            assert!(matches!(
                controller.start(),
                Err(RecorderError::AlreadyRecording)
            ));
            assert!(matches!(controller.stop(), Err(RecorderError::NotRecording)));

            gate.release.wait();
            first.join().unwrap().unwrap();
        });

        assert_eq!(controller.state(), RecordingState::Recording);
        assert_eq!(gate.subscribe_calls.load(Ordering::SeqCst), 1);
        assert_eq!(mag.subscribe_calls.load(Ordering::SeqCst), 1);
        assert_eq!(gyro.subscribe_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_tolerates_failed_unsubscribe() {
        let rig = rig_with(
            ManualChannel::new(ChannelKind::Accelerometer),
            ManualChannel::stubborn(ChannelKind::Magnetometer),
            ManualChannel::new(ChannelKind::Gyroscope),
        );
        rig.controller.start().unwrap();
        rig.acc.emit(Reading::new(0.0, 0.0, 1.0));

        rig.controller.stop().unwrap();
        assert_eq!(rig.controller.state(), RecordingState::Idle);
        for kind in ChannelKind::ALL {
            assert_eq!(rig.channel(kind).unsubscribe_calls.load(Ordering::SeqCst), 1);
        }
        assert!(!rig.acc.active());
        assert!(!rig.gyro.active());
        assert_eq!(rig.controller.buffer_lengths(), [1, 0, 0]);

        // Los handles ya se soltaron: otro stop no vuelve a cancelar
        assert!(matches!(rig.controller.stop(), Err(RecorderError::NotRecording)));
        assert_eq!(rig.mag.unsubscribe_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_when_idle_rejected_and_buffers_untouched() {
        let rig = rig();
        rig.controller.on_reading(ChannelKind::Magnetometer, Reading::new(1.0, 0.0, 0.0));
        assert!(matches!(rig.controller.stop(), Err(RecorderError::NotRecording)));
        assert_eq!(rig.controller.buffer_lengths(), [0, 1, 0]);
    }

    #[test]
    fn test_stop_unsubscribes_and_keeps_buffers() {
        let rig = rig();
        rig.controller.start().unwrap();
        assert!(rig.acc.emit(Reading::new(0.0, 0.0, 1.0)));
        assert!(rig.mag.emit(Reading::new(20.0, 5.0, -40.0)));
        assert!(rig.mag.emit(Reading::new(21.0, 5.0, -40.0)));

        rig.controller.stop().unwrap();
        assert_eq!(rig.controller.state(), RecordingState::Idle);
        for kind in ChannelKind::ALL {
            assert!(!rig.channel(kind).active());
        }
        assert_eq!(rig.controller.buffer_lengths(), [1, 2, 0]);
        assert!(!rig.gyro.emit(Reading::default()));
    }

    #[test]
    fn test_failed_subscribe_rolls_back() {
        let rig = rig_with(
            ManualChannel::new(ChannelKind::Accelerometer),
            ManualChannel::new(ChannelKind::Magnetometer),
            ManualChannel::failing(ChannelKind::Gyroscope),
        );

        let err = rig.controller.start().unwrap_err();
        assert!(matches!(
            err,
            RecorderError::SubscribeFailed {
                kind: ChannelKind::Gyroscope,
                ..
            }
        ));
        assert_eq!(rig.controller.state(), RecordingState::Idle);
        assert!(!rig.acc.active());
        assert!(!rig.mag.active());

        // Se puede volver a intentar y stop sigue rechazado
        assert!(matches!(rig.controller.stop(), Err(RecorderError::NotRecording)));
        assert!(rig.controller.start().is_err());
        assert_eq!(rig.acc.subscribe_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_set_rate_while_recording() {
        let rig = rig();
        rig.controller.start().unwrap();
        rig.mag.emit(Reading::new(1.0, 1.0, 1.0));
        rig.acc.emit(Reading::new(1.0, 1.0, 1.0));

        rig.controller.set_rate(SamplingRate::SLOW);
        assert_eq!(rig.controller.rate(), SamplingRate::SLOW);
        assert_eq!(rig.controller.state(), RecordingState::Recording);
        assert_eq!(rig.controller.buffer_lengths(), [1, 1, 0]);
        for kind in ChannelKind::ALL {
            assert_eq!(rig.channel(kind).interval_ms.load(Ordering::SeqCst), 1000);
            assert_eq!(rig.channel(kind).subscribe_calls.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_set_rate_while_idle_applies_on_start() {
        let rig = rig();
        rig.controller.set_rate(SamplingRate::NORMAL);
        assert_eq!(rig.mag.interval_ms.load(Ordering::SeqCst), 0);

        rig.controller.start().unwrap();
        assert_eq!(rig.mag.interval_ms.load(Ordering::SeqCst), 200);
    }

    #[test]
    fn test_clear_in_either_state() {
        let rig = rig();
        rig.controller.start().unwrap();
        rig.acc.emit(Reading::default());
        rig.gyro.emit(Reading::default());
        assert_eq!(rig.controller.clear_buffers(), [1, 0, 1]);
        assert_eq!(rig.controller.state(), RecordingState::Recording);

        rig.controller.stop().unwrap();
        rig.controller.on_reading(ChannelKind::Magnetometer, Reading::default());
        rig.controller.clear_buffers();
        assert_eq!(rig.controller.buffer_lengths(), [0, 0, 0]);
    }

    #[test]
    fn test_enablement_rule() {
        let rig = rig();
        assert!(!rig.controller.can_export());
        rig.controller.on_reading(ChannelKind::Magnetometer, Reading::default());
        assert!(!rig.controller.can_clear());
        rig.controller.on_reading(ChannelKind::Accelerometer, Reading::default());
        assert!(rig.controller.can_export());
        assert!(rig.controller.can_clear());
    }

    #[test]
    fn test_record_then_export_session() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = LocalDirectory::new(tmp.path());
        let rig = rig();

        rig.controller.start().unwrap();
        for i in 0..3 {
            rig.mag.emit(Reading::new(1.0, i as f64, 0.0));
            rig.acc.emit(Reading::new(0.0, 0.0, 1.0));
        }
        rig.gyro.emit(Reading::new(0.1, 0.1, 0.1));
        rig.gyro.emit(Reading::new(0.2, 0.2, 0.2));
        rig.controller.stop().unwrap();

        let report = rig
            .controller
            .export(&SessionExporter::default(), &storage)
            .unwrap();
        assert_eq!(report.rows, 3);
        assert_eq!(report.missing_gyroscope, 1);
        assert_eq!(rig.controller.state(), RecordingState::Idle);
        assert_eq!(rig.controller.buffer_lengths(), [0, 0, 0]);

        let content = std::fs::read_to_string(report.path).unwrap();
        let last = content.lines().last().unwrap();
        assert!(last.ends_with("missing, missing, missing"));

        assert!(matches!(
            rig.controller.export(&SessionExporter::default(), &storage),
            Err(RecorderError::EmptySession)
        ));
    }

    #[test]
    fn test_mismatched_slot_rejected() {
        let result = ChannelSet::new(
            Box::new(Shared(ManualChannel::new(ChannelKind::Magnetometer))),
            Box::new(Shared(ManualChannel::new(ChannelKind::Accelerometer))),
            Box::new(Shared(ManualChannel::new(ChannelKind::Gyroscope))),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_with_simulated_channels() {
        use crate::channel::SimulatedChannel;
        use std::time::Duration;

        let host = ensure_supported(HostPlatform::Linux).unwrap();
        let channels = ChannelSet::new(
            Box::new(SimulatedChannel::with_defaults(ChannelKind::Accelerometer, 0.01)),
            Box::new(SimulatedChannel::with_defaults(ChannelKind::Magnetometer, 0.01)),
            Box::new(SimulatedChannel::with_defaults(ChannelKind::Gyroscope, 0.01)),
        )
        .unwrap();
        let controller =
            SamplingController::new(host, channels, SamplingRate::from_millis(5).unwrap());

        controller.start().unwrap();
        std::thread::sleep(Duration::from_millis(120));
        controller.stop().unwrap();

        let lengths = controller.buffer_lengths();
        assert!(lengths.iter().all(|&n| n > 0), "{:?}", lengths);
        assert!(controller.latest(ChannelKind::Magnetometer).is_some());

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(controller.buffer_lengths(), lengths);
    }
}

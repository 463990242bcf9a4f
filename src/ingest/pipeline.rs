//! Per-message processing: analysis, policy, ledger and side effects.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::message::{DeviceClass, SensorMessage};
use super::policy::{Breach, BreachLatch, PolicyConfig, TransformerMetrics};
use crate::alerts::{Notifier, SmsGateway};
use crate::analysis::{AudioAnalyzer, FailurePredictor, PhysicsEngine, DEFAULT_LIMIT_TEMP_C};
use crate::db::{NewReading, Store};
use crate::ledger::{EventKind, HashChainLedger, LedgerError};
use crate::transport::{ControlCommand, ControlPublisher};
use crate::twin::DigitalTwin;

/// Sensor id recorded on theft events, which concern the whole segment.
pub const THEFT_SENSOR_ID: &str = "GRID_SYSTEM";

/// Default bound on each publish or notification.
pub const DEFAULT_SIDE_EFFECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub policy: PolicyConfig,
    /// Amplify aging factors for demonstrations.
    pub demo_amplification: bool,
    /// Temperature the failure predictor extrapolates towards.
    pub failure_limit_temp: f64,
    pub side_effect_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            demo_amplification: false,
            failure_limit_temp: DEFAULT_LIMIT_TEMP_C,
            side_effect_timeout: DEFAULT_SIDE_EFFECT_TIMEOUT,
        }
    }
}

/// What processing one message did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageReport {
    /// Ledger events appended, in order.
    pub events: Vec<EventKind>,
    pub reading_id: Option<i64>,
    pub predicted_failure_minutes: Option<f64>,
    pub missing_current: f64,
    pub commands_published: usize,
    pub notifications_sent: usize,
}

/// Stateful analysers for one transformer stream.
#[derive(Debug)]
struct TransformerMonitor {
    physics: PhysicsEngine,
    predictor: FailurePredictor,
    /// One latch per safety-critical policy.
    latches: HashMap<EventKind, BreachLatch>,
}

impl TransformerMonitor {
    fn new(amplify: bool) -> Self {
        Self {
            physics: PhysicsEngine::new(amplify),
            predictor: FailurePredictor::new(),
            latches: HashMap::new(),
        }
    }

    /// Update every latch and return the kinds whose breach just started.
    fn rising_edges(&mut self, breaches: &[Breach]) -> Vec<EventKind> {
        let mut fresh = Vec::new();
        for breach in breaches.iter().filter(|b| b.is_safety_critical()) {
            if self.latches.entry(breach.kind).or_default().update(true) {
                fresh.push(breach.kind);
            }
        }
        for (kind, latch) in self.latches.iter_mut() {
            if !breaches.iter().any(|b| b.kind == *kind) {
                latch.update(false);
            }
        }
        fresh
    }
}

/// The ingestion pipeline.
///
/// Owns all per-stream analysis state. It must be driven by a single task;
/// see [`super::IngestHandle`] for the queue in front of it.
pub struct Pipeline<P, G> {
    twin: DigitalTwin,
    store: Arc<Store>,
    ledger: Arc<HashChainLedger>,
    publisher: Arc<P>,
    notifier: Arc<Notifier<G>>,
    config: PipelineConfig,
    monitors: HashMap<String, TransformerMonitor>,
    audio: AudioAnalyzer,
    theft: BreachLatch,
}

impl<P: ControlPublisher, G: SmsGateway> Pipeline<P, G> {
    pub fn new(
        twin: DigitalTwin,
        store: Arc<Store>,
        ledger: Arc<HashChainLedger>,
        publisher: Arc<P>,
        notifier: Arc<Notifier<G>>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            twin,
            store,
            ledger,
            publisher,
            notifier,
            config,
            monitors: HashMap::new(),
            audio: AudioAnalyzer::new(),
            theft: BreachLatch::default(),
        }
    }

    /// Decode and process a raw payload.
    ///
    /// Malformed payloads are logged and dropped without touching any state.
    pub async fn handle_payload(
        &mut self,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> Option<MessageReport> {
        match SensorMessage::parse(payload, received_at) {
            Ok(message) => Some(self.process(message).await),
            Err(e) => {
                tracing::warn!(
                    "Dropping invalid message ({} bytes): {}",
                    payload.len(),
                    e
                );
                None
            }
        }
    }

    /// Process one validated message to completion.
    pub async fn process(&mut self, message: SensorMessage) -> MessageReport {
        let mut report = MessageReport::default();

        {
            let mut state = self.twin.write().await;
            match message.device_class {
                DeviceClass::Transformer => state.update_transformer(message.current),
                DeviceClass::Meter => state.update_meter(&message.sensor_id, message.current),
            }
        }

        if message.device_class == DeviceClass::Transformer {
            self.process_transformer(&message, &mut report).await;
        }

        self.evaluate_theft(message.timestamp, &mut report).await;

        tracing::debug!(
            sensor_id = %message.sensor_id,
            device = %message.device_class,
            events = report.events.len(),
            "Message processed"
        );
        report
    }

    async fn process_transformer(&mut self, message: &SensorMessage, report: &mut MessageReport) {
        let amplify = self.config.demo_amplification;
        let monitor = self
            .monitors
            .entry(message.sensor_id.clone())
            .or_insert_with(|| TransformerMonitor::new(amplify));

        monitor
            .predictor
            .add_sample(message.temperature, message.epoch_seconds());
        let prediction = monitor
            .predictor
            .predict_minutes_to_threshold(self.config.failure_limit_temp);

        let distortion = if message.waveform.is_empty() {
            0.0
        } else {
            self.audio.analyze_distortion(&message.waveform)
        };

        let metrics = TransformerMetrics {
            temperature: message.temperature,
            vibration: message.vibration,
            aging_factor: monitor.physics.compute_aging_factor(message.temperature),
            rate_of_rise: monitor
                .physics
                .detect_thermal_shock(message.temperature, message.timestamp),
            distortion,
        };

        let breaches = self.config.policy.evaluate(&metrics);
        let fresh = monitor.rising_edges(&breaches);

        if let Some(minutes) = prediction {
            tracing::warn!(
                sensor_id = %message.sensor_id,
                minutes,
                "Failure predicted: {:.0}C reached in {:.1} minutes",
                self.config.failure_limit_temp,
                minutes
            );
        }
        report.predicted_failure_minutes = prediction;

        let reading = NewReading {
            sensor_id: message.sensor_id.clone(),
            temperature: message.temperature,
            current: message.current,
            vibration: message.vibration,
            aging_factor: metrics.aging_factor,
            rate_of_rise: metrics.rate_of_rise,
            distortion: metrics.distortion,
            timestamp: message.timestamp,
            predicted_failure_minutes: prediction,
        };
        match self.store.insert_reading(&reading) {
            Ok(id) => report.reading_id = Some(id),
            Err(e) => tracing::error!(
                sensor_id = %message.sensor_id,
                "Failed to persist reading: {}",
                e
            ),
        }

        for breach in &breaches {
            self.record(&message.sensor_id, breach, message.timestamp, report);

            let Some(action) = &breach.action else {
                continue;
            };

            if !fresh.contains(&breach.kind) {
                tracing::debug!(
                    sensor_id = %message.sensor_id,
                    kind = %breach.kind,
                    "Breach still active, actions already taken"
                );
                continue;
            }

            if self.shed_load(action.shed_reason).await {
                report.commands_published += 1;
            }
            if self.notify(&action.alert).await {
                report.notifications_sent += 1;
            }
        }
    }

    async fn evaluate_theft(&mut self, timestamp: DateTime<Utc>, report: &mut MessageReport) {
        let (missing, breached) = {
            let state = self.twin.read().await;
            let missing = state.compute_missing_current();
            (missing, missing > state.theft_threshold())
        };
        report.missing_current = missing;

        let fresh = self.theft.update(breached);
        if !breached {
            return;
        }

        let breach = Breach {
            kind: EventKind::TheftDetected,
            value: missing,
            message: format!("{:.2}A unaccounted for.", missing),
            action: None,
        };
        self.record(THEFT_SENSOR_ID, &breach, timestamp, report);

        if fresh && self.notify(&format!("Power Theft Detected! {:.2}A stolen.", missing)).await {
            report.notifications_sent += 1;
        }
    }

    /// Append a breach to the ledger. Failures are logged, never fatal.
    fn record(
        &self,
        sensor_id: &str,
        breach: &Breach,
        timestamp: DateTime<Utc>,
        report: &mut MessageReport,
    ) {
        tracing::warn!(
            sensor_id,
            kind = %breach.kind,
            value = breach.value,
            "{}",
            breach.message
        );

        match self
            .ledger
            .append(sensor_id, breach.kind, breach.value, &breach.message, timestamp)
        {
            Ok(_) => report.events.push(breach.kind),
            Err(e) => tracing::error!(
                sensor_id,
                kind = %breach.kind,
                "Failed to append ledger event: {}",
                e
            ),
        }
    }

    async fn shed_load(&self, reason: &str) -> bool {
        let command = ControlCommand::shed_load(reason);
        let timeout = self.config.side_effect_timeout;

        match tokio::time::timeout(timeout, self.publisher.publish(&command)).await {
            Ok(Ok(())) => {
                tracing::warn!("Load shed: {}", reason);
                true
            }
            Ok(Err(e)) => {
                tracing::error!("Failed to publish load-shed command: {}", e);
                false
            }
            Err(_) => {
                tracing::error!("Load-shed publish timed out after {:?}", timeout);
                false
            }
        }
    }

    async fn notify(&self, message: &str) -> bool {
        let timeout = self.config.side_effect_timeout;

        match tokio::time::timeout(timeout, self.notifier.notify(message)).await {
            Ok(outcome) => {
                if let Some(reason) = &outcome.reason {
                    tracing::debug!("Notification not sent: {}", reason.as_str());
                }
                outcome.sent
            }
            Err(_) => {
                tracing::error!("Notification timed out after {:?}", timeout);
                false
            }
        }
    }

    /// Wipe persisted history and every piece of in-memory state.
    ///
    /// Memory is only cleared once the store wipe succeeded.
    pub async fn reset(&mut self) -> Result<(), LedgerError> {
        self.ledger.wipe()?;

        self.twin.write().await.clear();
        self.monitors.clear();
        self.theft.reset();

        tracing::warn!("Pipeline reset: ledger, readings and live state cleared");
        Ok(())
    }

    /// Number of transformer streams being tracked.
    pub fn monitored_transformers(&self) -> usize {
        self.monitors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::NotifierConfig;
    use crate::ledger::ChainStatus;
    use crate::testing::{RecordingGateway, RecordingPublisher};
    use crate::transport::RelayCommand;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    struct Harness {
        pipeline: Pipeline<RecordingPublisher, RecordingGateway>,
        store: Arc<Store>,
        ledger: Arc<HashChainLedger>,
        twin: DigitalTwin,
        publisher: RecordingPublisher,
        gateway: RecordingGateway,
    }

    fn harness_with(publisher: RecordingPublisher, cooldown: Duration) -> Harness {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let ledger = Arc::new(HashChainLedger::new(store.clone()));
        let twin = DigitalTwin::default();
        let gateway = RecordingGateway::default();
        let notifier = Arc::new(Notifier::new(
            Some(gateway.clone()),
            NotifierConfig {
                enabled: true,
                destination: Some("+15550001234".to_string()),
                cooldown,
            },
        ));

        let pipeline = Pipeline::new(
            twin.clone(),
            store.clone(),
            ledger.clone(),
            Arc::new(publisher.clone()),
            notifier,
            PipelineConfig::default(),
        );

        Harness {
            pipeline,
            store,
            ledger,
            twin,
            publisher,
            gateway,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingPublisher::default(), Duration::ZERO)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 14, 0, 0).unwrap()
    }

    fn transformer(temp: f64, current: f64, vibration: f64, at_secs: i64) -> SensorMessage {
        SensorMessage {
            sensor_id: "DT-402".to_string(),
            device_class: DeviceClass::Transformer,
            temperature: temp,
            current,
            vibration,
            waveform: Vec::new(),
            timestamp: t0() + ChronoDuration::seconds(at_secs),
        }
    }

    fn meter(id: &str, current: f64) -> SensorMessage {
        SensorMessage {
            sensor_id: id.to_string(),
            device_class: DeviceClass::Meter,
            temperature: 0.0,
            current,
            vibration: 0.0,
            waveform: Vec::new(),
            timestamp: t0(),
        }
    }

    /// Meters that balance a 10 A transformer.
    async fn balance(h: &mut Harness) {
        h.pipeline.process(meter("METER-01", 6.0)).await;
        h.pipeline.process(meter("METER-02", 4.0)).await;
    }

    #[tokio::test]
    async fn test_nominal_transformer_persists_reading_only() {
        let mut h = harness();
        balance(&mut h).await;

        let report = h.pipeline.process(transformer(45.0, 10.0, 0.1, 0)).await;

        assert!(report.events.is_empty());
        assert!(report.reading_id.is_some());
        assert_eq!(report.missing_current, 0.0);
        assert_eq!(h.store.reading_count().unwrap(), 1);
        assert_eq!(h.store.event_count().unwrap(), 0);
        assert!(h.publisher.commands().is_empty());
    }

    #[tokio::test]
    async fn test_thermal_shock_sheds_load_once() {
        let mut h = harness();
        balance(&mut h).await;

        h.pipeline.process(transformer(40.0, 10.0, 0.0, 0)).await;
        let second = h.pipeline.process(transformer(41.5, 10.0, 0.0, 1)).await;
        let third = h.pipeline.process(transformer(43.0, 10.0, 0.0, 2)).await;

        assert_eq!(second.events, vec![EventKind::ThermalShock]);
        assert_eq!(third.events, vec![EventKind::ThermalShock]);
        assert_eq!(second.commands_published, 1);
        assert_eq!(third.commands_published, 0);

        let commands = h.publisher.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command, RelayCommand::Off);
        assert_eq!(commands[0].reason, "Thermal Shock Detected");

        let messages = h.gateway.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].1.contains("Thermal Shock! Temp rose rapidly to 41.5C"));

        let events = h.store.recent_events(10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].value, 90.0);
        assert!(h.ledger.verify_chain().unwrap().is_secure());
    }

    #[tokio::test]
    async fn test_shock_latch_rearms_after_cooling() {
        let mut h = harness();
        balance(&mut h).await;

        h.pipeline.process(transformer(40.0, 10.0, 0.0, 0)).await;
        h.pipeline.process(transformer(42.0, 10.0, 0.0, 1)).await;
        h.pipeline.process(transformer(42.0, 10.0, 0.0, 60)).await;
        let again = h.pipeline.process(transformer(44.0, 10.0, 0.0, 61)).await;

        assert_eq!(again.commands_published, 1);
        assert_eq!(h.publisher.commands().len(), 2);
    }

    #[tokio::test]
    async fn test_cold_rise_is_below_shock_floor() {
        let mut h = harness();
        balance(&mut h).await;

        h.pipeline.process(transformer(20.0, 10.0, 0.0, 0)).await;
        let report = h.pipeline.process(transformer(25.0, 10.0, 0.0, 1)).await;

        assert!(report.events.is_empty());
        assert!(h.publisher.commands().is_empty());
    }

    #[tokio::test]
    async fn test_tampering_sheds_load_and_notifies() {
        let mut h = harness();
        balance(&mut h).await;

        let report = h.pipeline.process(transformer(45.0, 10.0, 0.9, 0)).await;

        assert_eq!(report.events, vec![EventKind::PhysicalTampering]);
        assert_eq!(report.commands_published, 1);
        assert_eq!(report.notifications_sent, 1);
        assert_eq!(h.publisher.commands()[0].reason, "Physical Tampering Detected");
        assert!(h.gateway.messages()[0]
            .1
            .ends_with("Physical Tampering Detected! Vibration Level: 0.9"));
    }

    #[tokio::test]
    async fn test_shock_during_tampering_acts_independently() {
        let mut h = harness();
        balance(&mut h).await;

        let first = h.pipeline.process(transformer(40.0, 10.0, 0.9, 0)).await;
        let second = h.pipeline.process(transformer(41.5, 10.0, 0.9, 1)).await;

        assert_eq!(first.commands_published, 1);
        assert_eq!(
            second.events,
            vec![EventKind::ThermalShock, EventKind::PhysicalTampering]
        );
        assert_eq!(second.commands_published, 1);

        let reasons: Vec<String> = h.publisher.commands().into_iter().map(|c| c.reason).collect();
        assert_eq!(reasons, vec!["Physical Tampering Detected", "Thermal Shock Detected"]);
    }

    #[tokio::test]
    async fn test_critical_aging_and_audio_are_ledger_only() {
        let mut h = harness();
        balance(&mut h).await;

        let mut hot = transformer(110.0, 10.0, 0.0, 0);
        let mut rng = StdRng::seed_from_u64(7);
        hot.waveform = (0..200).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let report = h.pipeline.process(hot).await;

        assert_eq!(
            report.events,
            vec![EventKind::CriticalAging, EventKind::AudioFail]
        );
        assert_eq!(report.commands_published, 0);
        assert!(h.gateway.messages().is_empty());
    }

    #[tokio::test]
    async fn test_theft_is_recorded_against_grid_system() {
        let mut h = harness();
        h.pipeline.process(meter("METER-01", 4.0)).await;
        h.pipeline.process(meter("METER-02", 3.0)).await;

        let report = h.pipeline.process(transformer(45.0, 10.0, 0.0, 0)).await;

        assert_eq!(report.events, vec![EventKind::TheftDetected]);
        assert_eq!(report.missing_current, 3.0);
        assert_eq!(report.notifications_sent, 1);
        assert!(h.gateway.messages()[0].1.ends_with("Power Theft Detected! 3.00A stolen."));

        let event = &h.store.recent_events(1).unwrap()[0];
        assert_eq!(event.sensor_id, THEFT_SENSOR_ID);
        assert_eq!(event.message, "3.00A unaccounted for.");
        assert!(h.twin.snapshot().await.theft_detected);

        // Still stealing: logged again, not paged again.
        let again = h.pipeline.process(meter("METER-02", 3.0)).await;
        assert_eq!(again.events, vec![EventKind::TheftDetected]);
        assert_eq!(again.notifications_sent, 0);
    }

    #[tokio::test]
    async fn test_theft_threshold_is_exclusive() {
        let mut h = harness();
        h.pipeline.process(meter("METER-01", 8.0)).await;

        let report = h.pipeline.process(transformer(45.0, 10.0, 0.0, 0)).await;
        assert_eq!(report.missing_current, 2.0);
        assert!(report.events.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_leaves_state_untouched() {
        let mut h = harness();

        assert!(h.pipeline.handle_payload(b"{not json", t0()).await.is_none());
        assert!(h
            .pipeline
            .handle_payload(br#"{"sensor_id":"DT-402","current":10}"#, t0())
            .await
            .is_none());

        assert_eq!(h.twin.snapshot().await.transformer_current, 0.0);
        assert_eq!(h.store.reading_count().unwrap(), 0);
        assert_eq!(h.pipeline.monitored_transformers(), 0);
    }

    #[tokio::test]
    async fn test_meter_messages_update_twin_without_readings() {
        let mut h = harness();

        let report = h
            .pipeline
            .handle_payload(
                br#"{"sensor_id":"METER-01","device_type":"METER","current":10.0}"#,
                t0(),
            )
            .await
            .unwrap();

        assert!(report.reading_id.is_none());
        assert_eq!(h.twin.snapshot().await.total_load, 10.0);
        assert_eq!(h.store.reading_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_interleaved_transformers_keep_separate_rates() {
        let mut h = harness();
        balance(&mut h).await;

        let mut other = transformer(30.0, 10.0, 0.0, 0);
        other.sensor_id = "DT-999".to_string();

        h.pipeline.process(transformer(40.0, 10.0, 0.0, 0)).await;
        h.pipeline.process(other).await;
        let report = h.pipeline.process(transformer(40.5, 10.0, 0.0, 60)).await;

        assert!(report.events.is_empty());
        assert_eq!(h.pipeline.monitored_transformers(), 2);
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_stop_processing() {
        let mut h = harness_with(RecordingPublisher::failing(), Duration::ZERO);
        balance(&mut h).await;

        let report = h.pipeline.process(transformer(45.0, 10.0, 0.9, 0)).await;

        assert_eq!(report.events, vec![EventKind::PhysicalTampering]);
        assert_eq!(report.commands_published, 0);
        assert_eq!(report.notifications_sent, 1);
        assert_eq!(h.store.event_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_storage_failure_keeps_twin_update() {
        let mut h = harness();
        h.store.execute_unchecked("DROP TABLE readings").unwrap();

        let report = h.pipeline.process(transformer(45.0, 10.0, 0.0, 0)).await;

        assert!(report.reading_id.is_none());
        assert_eq!(h.twin.snapshot().await.transformer_current, 10.0);
    }

    #[tokio::test]
    async fn test_predictor_reports_rising_trend() {
        let mut h = harness();
        balance(&mut h).await;

        let mut report = MessageReport::default();
        for i in 0..12 {
            report = h
                .pipeline
                .process(transformer(70.0 + i as f64, 10.0, 0.0, i * 60))
                .await;
        }

        // +1C per minute from 81C leaves 19 minutes to 100C.
        let minutes = report.predicted_failure_minutes.unwrap();
        assert!((minutes - 19.0).abs() < 0.01, "predicted {minutes}");

        let stored = &h.store.recent_readings(1).unwrap()[0];
        assert_eq!(stored.predicted_failure_minutes, Some(minutes));
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let mut h = harness();
        h.pipeline.process(meter("METER-01", 1.0)).await;
        h.pipeline.process(transformer(45.0, 10.0, 0.9, 0)).await;
        assert!(h.store.event_count().unwrap() > 0);

        h.pipeline.reset().await.unwrap();

        assert_eq!(h.store.event_count().unwrap(), 0);
        assert_eq!(h.store.reading_count().unwrap(), 0);
        assert_eq!(h.pipeline.monitored_transformers(), 0);
        assert!(h.twin.snapshot().await.meters.is_empty());
        assert!(matches!(h.ledger.verify_chain().unwrap(), ChainStatus::Empty));

        // Latches were cleared, so the same tampering acts again.
        let report = h.pipeline.process(transformer(45.0, 10.0, 0.9, 1)).await;
        assert_eq!(report.commands_published, 1);
    }
}

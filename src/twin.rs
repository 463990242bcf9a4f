//! Digital twin of the distribution segment.
//!
//! Mirrors the last known transformer current and every downstream meter
//! current. Current drawn at the transformer but not accounted for by any
//! meter is treated as a theft signal.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::analysis::round_to;

/// Theft threshold used when none is configured, in Amps.
pub const DEFAULT_THEFT_THRESHOLD_AMPS: f64 = 2.0;

/// Live electrical state, last value wins.
#[derive(Debug, Clone)]
pub struct GridState {
    transformer_current: f64,
    meters: HashMap<String, f64>,
    theft_threshold: f64,
}

impl Default for GridState {
    fn default() -> Self {
        Self::new(DEFAULT_THEFT_THRESHOLD_AMPS)
    }
}

impl GridState {
    pub fn new(theft_threshold: f64) -> Self {
        Self {
            transformer_current: 0.0,
            meters: HashMap::new(),
            theft_threshold,
        }
    }

    pub fn update_transformer(&mut self, current: f64) {
        self.transformer_current = current;
    }

    pub fn update_meter(&mut self, meter_id: &str, current: f64) {
        self.meters.insert(meter_id.to_string(), current);
    }

    pub fn transformer_current(&self) -> f64 {
        self.transformer_current
    }

    pub fn theft_threshold(&self) -> f64 {
        self.theft_threshold
    }

    /// Sum of all downstream meter currents.
    pub fn total_downstream_load(&self) -> f64 {
        self.meters.values().sum()
    }

    /// Unaccounted current, never negative, rounded to 2 decimals.
    ///
    /// A negative difference is meter noise, not theft.
    pub fn compute_missing_current(&self) -> f64 {
        let loss = self.transformer_current - self.total_downstream_load();
        if loss < 0.0 {
            return 0.0;
        }
        round_to(loss, 2)
    }

    /// Whether the current instant classifies as theft.
    pub fn theft_detected(&self) -> bool {
        self.compute_missing_current() > self.theft_threshold
    }

    /// Return to the start-of-process state. The threshold is configuration
    /// and survives.
    pub fn clear(&mut self) {
        self.transformer_current = 0.0;
        self.meters.clear();
    }

    pub fn snapshot(&self) -> TwinSnapshot {
        let mut meters: Vec<MeterReading> = self
            .meters
            .iter()
            .map(|(meter_id, current)| MeterReading {
                meter_id: meter_id.clone(),
                current: *current,
            })
            .collect();
        meters.sort_by(|a, b| a.meter_id.cmp(&b.meter_id));

        let missing_current = self.compute_missing_current();
        TwinSnapshot {
            transformer_current: self.transformer_current,
            total_load: round_to(self.total_downstream_load(), 2),
            missing_current,
            theft_detected: missing_current > self.theft_threshold,
            meters,
            status: "ONLINE",
        }
    }
}

/// One meter's last known current.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterReading {
    pub meter_id: String,
    pub current: f64,
}

/// Point-in-time copy of the twin for readers outside the ingestion worker.
#[derive(Debug, Clone, Serialize)]
pub struct TwinSnapshot {
    pub transformer_current: f64,
    pub total_load: f64,
    pub missing_current: f64,
    pub theft_detected: bool,
    pub meters: Vec<MeterReading>,
    pub status: &'static str,
}

/// Shared handle to the twin.
///
/// Only the ingestion worker takes the write lock during normal operation.
#[derive(Debug, Clone, Default)]
pub struct DigitalTwin {
    state: Arc<RwLock<GridState>>,
}

impl DigitalTwin {
    pub fn new(theft_threshold: f64) -> Self {
        Self {
            state: Arc::new(RwLock::new(GridState::new(theft_threshold))),
        }
    }

    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, GridState> {
        self.state.read().await
    }

    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, GridState> {
        self.state.write().await
    }

    pub async fn snapshot(&self) -> TwinSnapshot {
        self.state.read().await.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_segment_has_no_missing_current() {
        let mut state = GridState::default();
        state.update_transformer(10.0);
        state.update_meter("A", 6.0);
        state.update_meter("B", 4.0);
        assert_eq!(state.compute_missing_current(), 0.0);
        assert!(!state.theft_detected());
    }

    #[test]
    fn test_unmetered_draw_is_reported() {
        let mut state = GridState::default();
        state.update_transformer(15.0);
        state.update_meter("A", 10.0);
        assert_eq!(state.compute_missing_current(), 5.0);
        assert!(state.theft_detected());
    }

    #[test]
    fn test_missing_current_never_negative() {
        let mut state = GridState::default();
        state.update_transformer(3.0);
        state.update_meter("A", 7.5);
        assert_eq!(state.compute_missing_current(), 0.0);

        state.update_transformer(-4.0);
        assert_eq!(state.compute_missing_current(), 0.0);
    }

    #[test]
    fn test_meter_upsert_is_last_value_wins() {
        let mut state = GridState::default();
        state.update_transformer(12.0);
        state.update_meter("A", 2.0);
        state.update_meter("A", 11.0);
        assert_eq!(state.total_downstream_load(), 11.0);
        assert_eq!(state.compute_missing_current(), 1.0);
    }

    #[test]
    fn test_threshold_boundary_is_exclusive() {
        let mut state = GridState::new(2.0);
        state.update_transformer(12.0);
        state.update_meter("A", 10.0);
        assert_eq!(state.compute_missing_current(), 2.0);
        assert!(!state.theft_detected());
    }

    #[test]
    fn test_clear_keeps_threshold() {
        let mut state = GridState::new(0.3);
        state.update_transformer(5.0);
        state.update_meter("A", 1.0);
        state.clear();
        assert_eq!(state.transformer_current(), 0.0);
        assert_eq!(state.total_downstream_load(), 0.0);
        assert_eq!(state.theft_threshold(), 0.3);
    }

    #[tokio::test]
    async fn test_snapshot_sorts_meters() {
        let twin = DigitalTwin::new(2.0);
        {
            let mut state = twin.write().await;
            state.update_transformer(9.0);
            state.update_meter("HOUSE_02", 3.0);
            state.update_meter("HOUSE_01", 2.5);
        }

        let snapshot = twin.snapshot().await;
        assert_eq!(snapshot.meters[0].meter_id, "HOUSE_01");
        assert_eq!(snapshot.total_load, 5.5);
        assert_eq!(snapshot.missing_current, 3.5);
        assert!(snapshot.theft_detected);
        assert_eq!(snapshot.status, "ONLINE");
    }
}

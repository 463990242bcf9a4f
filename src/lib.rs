//! Grid Sentinel - Distribution Transformer Telemetry Service
//!
//! Ingests transformer and smart-meter telemetry, maintains a live digital
//! twin, records safety events on a hash-chained ledger and sheds load when a
//! transformer is in danger.

pub mod alerts;
pub mod analysis;
pub mod config;
pub mod control;
pub mod db;
pub mod ingest;
pub mod ledger;
pub mod transport;
pub mod twin;

#[cfg(test)]
mod testing;

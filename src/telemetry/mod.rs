//! # Telemetry Module
//!
//! Handles ESC telemetry bookkeeping and JSONL output.
//!
//! This module handles:
//! - Tracking gaps in the 8-bit telemetry sequence
//! - Timestamping decoded readings
//! - Formatting as JSONL (JSON Lines)

pub mod logger;
pub mod tracker;

pub use logger::{JsonlWriter, TelemetryRecord};
pub use tracker::SequenceTracker;

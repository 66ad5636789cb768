//! # ESC Bridge Library
//!
//! Drive and monitor RS-485 drone ESCs through a USB serial bridge.
//!
//! This library provides the frame codec, stream resynchronization, motor
//! command building, telemetry decoding and the cadence-driven command
//! scheduler that keeps an armed ESC fed with frames.

pub mod config;
pub mod error;
pub mod esc;
pub mod scheduler;
pub mod serial;
pub mod telemetry;

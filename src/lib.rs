//! Group a photo library into trips.
//!
//! The pipeline runs in stages, each a pure batch computation whose output
//! replaces the previous one:
//!
//! 1. [`processor::resolve_devices`] splits make/model groups into physical devices
//! 2. [`processor::infer_locations`] borrows positions for GPS-less photos
//! 3. [`processor::detect_sessions`] clusters photos per photographer
//! 4. [`processor::detect_trips`] segments sessions into trips away from home
//!
//! [`store::Library`] persists stage outputs and [`config::Config`] holds the
//! tunable thresholds.

pub mod analysis;
pub mod config;
pub mod error;
pub mod models;
pub mod processor;
pub mod store;

pub use error::{Error, Result};

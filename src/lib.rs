//! Telemetry poller for Grünbeck water softeners
//!
//! Periodically queries the softener's local `mux_http` endpoint, parses the
//! register payload, and shares the latest readings with any number of
//! subscribers.
//!
//! # Features
//!
//! - One coalesced request at a time per device, however many triggers
//! - Atomic snapshot replacement; failed or empty fetches keep the last data
//! - Runtime-adjustable polling interval
//! - Sensor descriptors for the common softener readings

// Core modules
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod poller;
pub mod services;

// Test support modules - available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

// Re-export main types for convenience
pub use client::{FetchRequest, Register, RegisterTable, SoftenerClient, SoftenerHttpClient};
pub use config::PollerConfig;
pub use error::{GruenbeckError, Result};
pub use poller::{
    FetchOutcome, OutcomeKind, PollerState, Subscription, SubscriptionHandle, TelemetryPoller,
    UpdateStatus,
};
pub use services::{ReadingStore, Snapshot};

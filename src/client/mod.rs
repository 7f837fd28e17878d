//! Client side of the softener's `mux_http` endpoint
//!
//! - [`request`]: register identifiers and the fixed query body
//! - [`http_client`]: reqwest-based transport
//! - [`payload_parser`]: repairs and parses the XML-like response

pub mod http_client;
pub mod payload_parser;
pub mod request;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

pub use http_client::SoftenerHttpClient;
pub use payload_parser::parse_payload;
pub use request::{FetchRequest, Register, DEFAULT_DEVICE_ID};

/// Latest value per register, as sent by the device
pub type RegisterTable = BTreeMap<Register, String>;

/// Transport to the softener
///
/// Implementations return the raw response body. An empty body must be
/// reported as [`GruenbeckError::EmptyResponse`](crate::error::GruenbeckError::EmptyResponse),
/// every connection, status or timeout failure as a transport error.
#[async_trait]
pub trait SoftenerClient: Send + Sync {
    /// Issue one query and return the raw body
    async fn fetch(&self, request: &FetchRequest) -> Result<String>;

    /// Endpoint description for logging
    fn endpoint(&self) -> String;
}

//! Capability probe run once before a host is polled

use crate::client::{parse_payload, FetchRequest, Register, SoftenerClient};
use crate::error::Result;
use serde::Serialize;
use tracing::info;

/// Identity fields read by the probe query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Device type code (`D_C_1_1`)
    pub device_type: String,
    /// Firmware version (`D_Y_6`)
    pub firmware_version: String,
    /// Hardware revision (`D_Y_7`)
    pub hardware_revision: String,
}

/// Query the probe register set and return the device identity
///
/// Unlike the recurring poll, an empty response here is an error: a host
/// that cannot answer the probe is not accepted for polling.
pub async fn probe_device(client: &dyn SoftenerClient, device_id: u32) -> Result<DeviceInfo> {
    let request = FetchRequest::probe(device_id);
    let raw = client.fetch(&request).await?;
    let table = parse_payload(&raw, &request)?;

    let field = |register: Register| table.get(&register).cloned().unwrap_or_default();
    let device_info = DeviceInfo {
        device_type: field(Register::DC1_1),
        firmware_version: field(Register::DY6),
        hardware_revision: field(Register::DY7),
    };

    info!(
        "Softener at {} answered probe: firmware {}",
        client.endpoint(),
        device_info.firmware_version
    );
    Ok(device_info)
}

//! Register identifiers and the fixed query sent to `mux_http`

use crate::error::{GruenbeckError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default value of the `id` query field
pub const DEFAULT_DEVICE_ID: u32 = 626;

/// Data field exposed by the softener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Register {
    /// Operating mode
    #[serde(rename = "D_Y_1")]
    DY1,
    /// Current regeneration step (0 = none)
    #[serde(rename = "D_Y_5")]
    DY5,
    /// Softening capacity configuration
    #[serde(rename = "D_Y_10_1")]
    DY10_1,
    /// Actual flow
    #[serde(rename = "D_A_1_1")]
    DA1_1,
    /// Remaining capacity
    #[serde(rename = "D_A_1_2")]
    DA1_2,
    /// Capacity figure
    #[serde(rename = "D_A_1_3")]
    DA1_3,
    /// Remaining time/amount of the current regeneration step
    #[serde(rename = "D_A_2_1")]
    DA2_1,
    /// Hours since last regeneration
    #[serde(rename = "D_A_3_1")]
    DA3_1,
    /// Percent of the running regeneration
    #[serde(rename = "D_A_3_2")]
    DA3_2,
    /// Device type code
    #[serde(rename = "D_C_1_1")]
    DC1_1,
    /// Firmware version
    #[serde(rename = "D_Y_6")]
    DY6,
    /// Hardware revision
    #[serde(rename = "D_Y_7")]
    DY7,
}

impl Register {
    /// Registers polled on every tick
    pub const OPERATIONAL: [Register; 9] = [
        Register::DY1,
        Register::DY5,
        Register::DY10_1,
        Register::DA1_1,
        Register::DA1_2,
        Register::DA1_3,
        Register::DA2_1,
        Register::DA3_1,
        Register::DA3_2,
    ];

    /// Registers read once to identify the device
    pub const PROBE: [Register; 3] = [Register::DC1_1, Register::DY6, Register::DY7];

    /// Wire name, identical in request and response
    pub fn as_str(&self) -> &'static str {
        match self {
            Register::DY1 => "D_Y_1",
            Register::DY5 => "D_Y_5",
            Register::DY10_1 => "D_Y_10_1",
            Register::DA1_1 => "D_A_1_1",
            Register::DA1_2 => "D_A_1_2",
            Register::DA1_3 => "D_A_1_3",
            Register::DA2_1 => "D_A_2_1",
            Register::DA3_1 => "D_A_3_1",
            Register::DA3_2 => "D_A_3_2",
            Register::DC1_1 => "D_C_1_1",
            Register::DY6 => "D_Y_6",
            Register::DY7 => "D_Y_7",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Register {
    type Err = GruenbeckError;

    fn from_str(s: &str) -> Result<Self> {
        Register::OPERATIONAL
            .iter()
            .chain(Register::PROBE.iter())
            .find(|register| register.as_str() == s)
            .copied()
            .ok_or_else(|| GruenbeckError::not_found(format!("Unknown register: {s}")))
    }
}

/// Immutable description of one fetch: which registers to read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    device_id: u32,
    registers: Vec<Register>,
}

impl FetchRequest {
    /// Create a request for an explicit register set
    pub fn new(device_id: u32, registers: impl IntoIterator<Item = Register>) -> Result<Self> {
        let mut unique: Vec<Register> = Vec::new();
        for register in registers {
            if !unique.contains(&register) {
                unique.push(register);
            }
        }

        if unique.is_empty() {
            return Err(GruenbeckError::invalid_input(
                "Fetch request needs at least one register",
            ));
        }

        Ok(Self {
            device_id,
            registers: unique,
        })
    }

    /// Recurring operational set
    pub fn operational(device_id: u32) -> Self {
        Self {
            device_id,
            registers: Register::OPERATIONAL.to_vec(),
        }
    }

    /// Initial capability probe set
    pub fn probe(device_id: u32) -> Self {
        Self {
            device_id,
            registers: Register::PROBE.to_vec(),
        }
    }

    /// Registers in request order
    pub fn registers(&self) -> &[Register] {
        &self.registers
    }

    /// Value of the `id` query field
    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    /// Render the POST body, e.g. `id=626&show=D_Y_5|D_A_1_1~`
    pub fn query(&self) -> String {
        let show = self
            .registers
            .iter()
            .map(Register::as_str)
            .collect::<Vec<_>>()
            .join("|");
        format!("id={}&show={show}~", self.device_id)
    }
}

//! FPGA front-panel loader
//!
//! Configures an Opal Kelly style FPGA module (e.g. XEM6310) with a bitfile
//! and hands back the open device for wire-in / wire-out access.
//!
//! The vendor SDK is reached through the [`FrontPanel`] capability; this crate
//! ships no binding to it. [`MockFrontPanel`] records calls for tests.
//!
//! ```
//! use lab_instruments::fpga::{FpgaLoader, FrontPanel, MockFrontPanel};
//!
//! # tokio_test::block_on(async {
//! let dir = tempfile::tempdir().unwrap();
//! let bitfile = dir.path().join("toplevel.bit");
//! std::fs::write(&bitfile, b"bitstream").unwrap();
//!
//! let loader = FpgaLoader::new(None);
//! let mut fpga = loader.load(MockFrontPanel::new(), &bitfile).await.unwrap();
//! fpga.set_wire_in_value(0x00, 0b01, 0xFFFF_FFFF).await.unwrap();
//! fpga.update_wire_ins().await.unwrap();
//! fpga.update_wire_outs().await.unwrap();
//! assert_eq!(fpga.get_wire_out_value(0x20).await.unwrap(), 0b01);
//! # });
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

/// Wire-in endpoint addresses.
pub const WIRE_IN_ENDPOINTS: RangeInclusive<u8> = 0x00..=0x1F;
/// Wire-out endpoint addresses.
pub const WIRE_OUT_ENDPOINTS: RangeInclusive<u8> = 0x20..=0x3F;

/// Front-panel status codes returned by the device SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontPanelCode {
    /// 0
    NoError,
    /// -1
    Failed,
    /// -2
    Timeout,
    /// -3, the DONE pin never went high after configuration
    DoneNotHigh,
    /// -4
    TransferError,
    /// -5
    CommunicationError,
    /// -6
    InvalidBitstream,
    /// -7
    FileError,
    /// -8
    DeviceNotOpen,
    /// Any other code
    Other(i32),
}

impl From<i32> for FrontPanelCode {
    fn from(code: i32) -> Self {
        match code {
            0 => FrontPanelCode::NoError,
            -1 => FrontPanelCode::Failed,
            -2 => FrontPanelCode::Timeout,
            -3 => FrontPanelCode::DoneNotHigh,
            -4 => FrontPanelCode::TransferError,
            -5 => FrontPanelCode::CommunicationError,
            -6 => FrontPanelCode::InvalidBitstream,
            -7 => FrontPanelCode::FileError,
            -8 => FrontPanelCode::DeviceNotOpen,
            other => FrontPanelCode::Other(other),
        }
    }
}

impl FrontPanelCode {
    /// Convert a raw SDK return value into a result.
    pub fn check(code: i32) -> Result<(), FpgaError> {
        match FrontPanelCode::from(code) {
            FrontPanelCode::NoError => Ok(()),
            failed => Err(FpgaError::Device(failed)),
        }
    }
}

/// FPGA loader and device errors
#[derive(Error, Debug)]
pub enum FpgaError {
    /// Bitfile missing, unreadable, or without a `.bit` extension
    #[error("Bitfile '{path}' is not usable: {reason}")]
    Bitfile {
        /// Offending path
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// No module with the requested serial is attached
    #[error("No FPGA module found (serial: {0})")]
    NotFound(String),

    /// Non-zero status code from the device SDK
    #[error("Front panel error: {0:?}")]
    Device(FrontPanelCode),

    /// Endpoint address outside the wire-in or wire-out range
    #[error("Endpoint 0x{0:02X} is not a valid {1} endpoint")]
    InvalidEndpoint(u8, &'static str),
}

/// Device operations of an FPGA module.
#[async_trait]
pub trait FrontPanel: Send {
    /// Open the module with the given serial, or the first one found.
    async fn open_by_serial(&mut self, serial: Option<&str>) -> Result<(), FpgaError>;

    /// Load a bitfile; returns the raw SDK status code.
    async fn configure_fpga(&mut self, bitfile: &Path) -> i32;

    /// Stage `value` under `mask` on a wire-in endpoint (`0x00..=0x1F`).
    async fn set_wire_in_value(
        &mut self,
        endpoint: u8,
        value: u32,
        mask: u32,
    ) -> Result<(), FpgaError>;

    /// Push every staged wire-in value to the device.
    async fn update_wire_ins(&mut self) -> Result<(), FpgaError>;

    /// Latch the current wire-out values from the device.
    async fn update_wire_outs(&mut self) -> Result<(), FpgaError>;

    /// Latched value of a wire-out endpoint (`0x20..=0x3F`).
    async fn get_wire_out_value(&mut self, endpoint: u8) -> Result<u32, FpgaError>;
}

/// Where to find the module and which bitfile to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FpgaSettings {
    /// Bitfile loaded at startup
    pub bitfile: PathBuf,
    /// Module serial; the first attached module when absent
    #[serde(default)]
    pub serial: Option<String>,
}

/// Opens a module and configures it with a bitfile.
#[derive(Debug, Clone, Default)]
pub struct FpgaLoader {
    serial: Option<String>,
}

impl FpgaLoader {
    /// Loader for the module with `serial`, or the first one found.
    pub fn new(serial: Option<String>) -> Self {
        Self { serial }
    }

    /// Loader targeting the module named in `settings`.
    pub fn from_settings(settings: &FpgaSettings) -> Self {
        Self::new(settings.serial.clone())
    }

    /// Configure `device` as described by `settings`.
    pub async fn load_configured<P: FrontPanel>(
        device: P,
        settings: &FpgaSettings,
    ) -> Result<P, FpgaError> {
        Self::from_settings(settings)
            .load(device, &settings.bitfile)
            .await
    }

    /// Validate `bitfile`, open the module, and configure it.
    ///
    /// The module is not touched when the bitfile is missing or is not a
    /// `.bit` file.
    pub async fn load<P: FrontPanel>(
        &self,
        mut device: P,
        bitfile: &Path,
    ) -> Result<P, FpgaError> {
        validate_bitfile(bitfile).await?;

        device.open_by_serial(self.serial.as_deref()).await?;
        debug!(
            "FPGA module opened (serial: {})",
            self.serial.as_deref().unwrap_or("first available")
        );

        let code = device.configure_fpga(bitfile).await;
        FrontPanelCode::check(code)?;
        info!("FPGA configured with {}", bitfile.display());
        Ok(device)
    }
}

async fn validate_bitfile(bitfile: &Path) -> Result<(), FpgaError> {
    let invalid = |reason: String| FpgaError::Bitfile {
        path: bitfile.to_path_buf(),
        reason,
    };

    if bitfile.extension().and_then(|ext| ext.to_str()) != Some("bit") {
        return Err(invalid("expected a .bit file".to_string()));
    }
    let metadata = tokio::fs::metadata(bitfile)
        .await
        .map_err(|e| invalid(e.to_string()))?;
    if !metadata.is_file() {
        return Err(invalid("not a regular file".to_string()));
    }
    Ok(())
}

/// One call observed by a [`MockFrontPanel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontPanelCall {
    /// `open_by_serial`
    Open(Option<String>),
    /// `configure_fpga`
    Configure(PathBuf),
    /// `set_wire_in_value`
    SetWireIn {
        /// Wire-in address
        endpoint: u8,
        /// Staged value
        value: u32,
        /// Bits of `value` applied
        mask: u32,
    },
    /// `update_wire_ins`
    UpdateWireIns,
    /// `update_wire_outs`
    UpdateWireOuts,
    /// `get_wire_out_value`
    GetWireOut(u8),
}

#[derive(Debug, Default)]
struct MockFrontPanelState {
    calls: Vec<FrontPanelCall>,
    configure_code: i32,
    staged: [u32; 32],
    device: [u32; 32],
    latched: [u32; 32],
    missing: bool,
}

/// In-memory FPGA module wired in loopback: wire-out `0x20 + n` reads back
/// wire-in `n` once both sides have been updated.
#[derive(Debug, Clone, Default)]
pub struct MockFrontPanel {
    state: Arc<Mutex<MockFrontPanelState>>,
}

impl MockFrontPanel {
    /// Attached module that configures successfully.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `code` from the next configure calls.
    pub fn with_configure_code(self, code: i32) -> Self {
        self.lock().configure_code = code;
        self
    }

    /// Behave as if no module is attached.
    pub fn missing(self) -> Self {
        self.lock().missing = true;
        self
    }

    /// Every call seen so far, in order.
    pub fn calls(&self) -> Vec<FrontPanelCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockFrontPanelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn endpoint_index(
    endpoint: u8,
    range: RangeInclusive<u8>,
    kind: &'static str,
) -> Result<usize, FpgaError> {
    if range.contains(&endpoint) {
        Ok(usize::from(endpoint - range.start()))
    } else {
        Err(FpgaError::InvalidEndpoint(endpoint, kind))
    }
}

#[async_trait]
impl FrontPanel for MockFrontPanel {
    async fn open_by_serial(&mut self, serial: Option<&str>) -> Result<(), FpgaError> {
        let mut state = self.lock();
        state.calls.push(FrontPanelCall::Open(serial.map(str::to_string)));
        if state.missing {
            return Err(FpgaError::NotFound(
                serial.unwrap_or("first available").to_string(),
            ));
        }
        Ok(())
    }

    async fn configure_fpga(&mut self, bitfile: &Path) -> i32 {
        let mut state = self.lock();
        state.calls.push(FrontPanelCall::Configure(bitfile.to_path_buf()));
        state.configure_code
    }

    async fn set_wire_in_value(
        &mut self,
        endpoint: u8,
        value: u32,
        mask: u32,
    ) -> Result<(), FpgaError> {
        let idx = endpoint_index(endpoint, WIRE_IN_ENDPOINTS, "wire-in")?;
        let mut state = self.lock();
        state.calls.push(FrontPanelCall::SetWireIn {
            endpoint,
            value,
            mask,
        });
        state.staged[idx] = (state.staged[idx] & !mask) | (value & mask);
        Ok(())
    }

    async fn update_wire_ins(&mut self) -> Result<(), FpgaError> {
        let mut state = self.lock();
        state.calls.push(FrontPanelCall::UpdateWireIns);
        state.device = state.staged;
        Ok(())
    }

    async fn update_wire_outs(&mut self) -> Result<(), FpgaError> {
        let mut state = self.lock();
        state.calls.push(FrontPanelCall::UpdateWireOuts);
        state.latched = state.device;
        Ok(())
    }

    async fn get_wire_out_value(&mut self, endpoint: u8) -> Result<u32, FpgaError> {
        let idx = endpoint_index(endpoint, WIRE_OUT_ENDPOINTS, "wire-out")?;
        let mut state = self.lock();
        state.calls.push(FrontPanelCall::GetWireOut(endpoint));
        Ok(state.latched[idx])
    }
}

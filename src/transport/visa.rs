//! VISA transport for GPIB/USB/Ethernet instruments
//!
//! Wraps the visa-rs crate. VISA calls are blocking, so every operation runs on
//! Tokio's blocking pool; the session itself sits behind `Arc<Mutex<_>>` so it
//! can be moved into those tasks.
//!
//! Supports resource strings like:
//! - "GPIB0::1::INSTR" (GPIB interface)
//! - "USB0::0x1234::0x5678::SERIAL::INSTR" (USB)
//! - "TCPIP0::192.168.1.100::INSTR" (Ethernet/LXI)

use super::{ResourceManager, Transport};
use crate::error::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(feature = "instrument_visa")]
use std::ffi::CString;
#[cfg(feature = "instrument_visa")]
use std::io::{BufRead, BufReader, Write};
#[cfg(feature = "instrument_visa")]
use std::sync::Arc;
#[cfg(feature = "instrument_visa")]
use tokio::sync::Mutex;
#[cfg(feature = "instrument_visa")]
use tracing::debug;
#[cfg(feature = "instrument_visa")]
use visa_rs::attribute::AttrTmoValue;
#[cfg(feature = "instrument_visa")]
use visa_rs::prelude::*;

/// Session settings shared by every VISA resource opened by one manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisaSettings {
    /// Read/write timeout in milliseconds, also used when opening the session
    pub timeout_ms: u64,
    /// Line terminator appended to each command (typically "\n" for SCPI)
    pub write_terminator: String,
}

impl Default for VisaSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            write_terminator: "\n".to_string(),
        }
    }
}

impl VisaSettings {
    /// Configured timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Timeout in the form the VISA timeout attribute takes, saturating at
    /// `u32::MAX`.
    pub fn session_timeout_ms(&self) -> u32 {
        u32::try_from(self.timeout_ms).unwrap_or(u32::MAX)
    }
}

/// Opens VISA sessions through the default resource manager.
#[derive(Debug, Clone, Default)]
pub struct VisaResourceManager {
    settings: VisaSettings,
}

impl VisaResourceManager {
    /// Manager whose sessions all use `settings`.
    pub fn new(settings: VisaSettings) -> Self {
        Self { settings }
    }

    /// Settings applied to every opened session.
    pub fn settings(&self) -> &VisaSettings {
        &self.settings
    }
}

/// An open VISA session.
pub struct VisaTransport {
    resource: String,
    write_terminator: String,
    timeout_ms: u32,
    #[cfg(feature = "instrument_visa")]
    instrument: Option<Arc<Mutex<Instrument>>>,
}

#[cfg(feature = "instrument_visa")]
fn visa_err(err: visa_rs::Error) -> TransportError {
    TransportError::Visa(err.to_string())
}

#[cfg(feature = "instrument_visa")]
fn apply_timeout(instr: &Instrument, timeout_ms: u32) -> Result<(), TransportError> {
    let attr = AttrTmoValue::new_checked(timeout_ms)
        .ok_or_else(|| TransportError::Visa(format!("Invalid VISA timeout {}ms", timeout_ms)))?;
    instr.set_attr(attr).map_err(visa_err)
}

#[cfg(feature = "instrument_visa")]
impl VisaTransport {
    fn session(&self) -> Result<Arc<Mutex<Instrument>>, TransportError> {
        self.instrument
            .clone()
            .ok_or_else(|| TransportError::Closed(self.resource.clone()))
    }

    async fn run_blocking<F, R>(&self, op: F) -> Result<R, TransportError>
    where
        F: FnOnce(&mut Instrument) -> Result<R, TransportError> + Send + 'static,
        R: Send + 'static,
    {
        let session = self.session()?;
        let timeout_ms = self.timeout_ms;
        tokio::task::spawn_blocking(move || {
            let mut guard = session.blocking_lock();
            apply_timeout(&guard, timeout_ms)?;
            op(&mut guard)
        })
        .await
        .map_err(|e| TransportError::Visa(format!("VISA I/O task panicked: {}", e)))?
    }
}

#[cfg(feature = "instrument_visa")]
#[async_trait]
impl Transport for VisaTransport {
    async fn write(&mut self, command: &str) -> Result<(), TransportError> {
        let line = format!("{}{}", command, self.write_terminator);
        self.run_blocking(move |instr| {
            instr.write_all(line.as_bytes())?;
            Ok(())
        })
        .await?;
        debug!("VISA write '{}' -> {}", command, self.resource);
        Ok(())
    }

    async fn query(&mut self, command: &str) -> Result<String, TransportError> {
        let line = format!("{}{}", command, self.write_terminator);
        let response = self
            .run_blocking(move |instr| {
                instr.write_all(line.as_bytes())?;
                let mut reply = String::new();
                BufReader::new(&*instr).read_line(&mut reply)?;
                Ok(reply)
            })
            .await?;
        let response = response.trim().to_string();
        debug!("VISA query '{}' -> '{}'", command, response);
        Ok(response)
    }

    async fn clear(&mut self) -> Result<(), TransportError> {
        self.run_blocking(|instr| instr.clear().map_err(visa_err))
            .await?;
        debug!("VISA device clear sent to {}", self.resource);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.instrument.take().is_some() {
            debug!("VISA resource '{}' closed", self.resource);
        }
        Ok(())
    }

    fn resource(&self) -> &str {
        &self.resource
    }
}

#[cfg(feature = "instrument_visa")]
#[async_trait]
impl ResourceManager for VisaResourceManager {
    async fn open(&self, resource: &str) -> Result<Box<dyn Transport>, TransportError> {
        let resource_str = resource.to_string();
        let timeout = self.settings.timeout();
        let timeout_ms = self.settings.session_timeout_ms();
        let connection_err = |reason: String| TransportError::Connection {
            resource: resource.to_string(),
            reason,
        };

        let instrument = tokio::task::spawn_blocking(move || {
            let rm = DefaultRM::new().map_err(|e| e.to_string())?;
            let name = CString::new(resource_str).map_err(|e| e.to_string())?;
            let instr = rm
                .open(&name.into(), AccessMode::NO_LOCK, timeout)
                .map_err(|e| e.to_string())?;
            apply_timeout(&instr, timeout_ms).map_err(|e| e.to_string())?;
            Ok::<_, String>(instr)
        })
        .await
        .map_err(|e| connection_err(format!("VISA open task panicked: {}", e)))?
        .map_err(connection_err)?;

        debug!(
            "VISA resource '{}' opened with {}ms timeout",
            resource, self.settings.timeout_ms
        );
        Ok(Box::new(VisaTransport {
            resource: resource.to_string(),
            write_terminator: self.settings.write_terminator.clone(),
            timeout_ms,
            instrument: Some(Arc::new(Mutex::new(instrument))),
        }))
    }

    async fn list_resources(&self) -> Result<Vec<String>, TransportError> {
        tokio::task::spawn_blocking(|| {
            let rm = DefaultRM::new().map_err(visa_err)?;
            let expr = CString::new("?*INSTR")
                .map_err(|e| TransportError::Visa(e.to_string()))?;
            let mut list = rm.find_res_list(&expr.into()).map_err(visa_err)?;
            let mut found = Vec::new();
            while let Some(res) = list.find_next().map_err(visa_err)? {
                found.push(res.to_string());
            }
            Ok(found)
        })
        .await
        .map_err(|e| TransportError::Visa(format!("VISA enumeration task panicked: {}", e)))?
    }
}

#[cfg(not(feature = "instrument_visa"))]
fn visa_disabled() -> TransportError {
    TransportError::FeatureNotEnabled("instrument_visa".to_string())
}

#[cfg(not(feature = "instrument_visa"))]
#[async_trait]
impl Transport for VisaTransport {
    async fn write(&mut self, _command: &str) -> Result<(), TransportError> {
        Err(visa_disabled())
    }

    async fn query(&mut self, _command: &str) -> Result<String, TransportError> {
        Err(visa_disabled())
    }

    fn resource(&self) -> &str {
        &self.resource
    }
}

#[cfg(not(feature = "instrument_visa"))]
#[async_trait]
impl ResourceManager for VisaResourceManager {
    async fn open(&self, _resource: &str) -> Result<Box<dyn Transport>, TransportError> {
        Err(visa_disabled())
    }

    async fn list_resources(&self) -> Result<Vec<String>, TransportError> {
        Err(visa_disabled())
    }
}

impl std::fmt::Debug for VisaTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisaTransport")
            .field("resource", &self.resource)
            .field("write_terminator", &self.write_terminator)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

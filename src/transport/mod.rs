//! Connection layer beneath the instrument wrappers.
//!
//! A [`Transport`] is an open session to one physical instrument. It sends
//! ASCII commands verbatim and reads ASCII replies; it knows nothing about the
//! command vocabulary. A [`ResourceManager`] opens transports by resource
//! address and enumerates the resources it can see.
//!
//! Implementations:
//! - [`VisaResourceManager`] / [`VisaTransport`] for GPIB, USB and LAN
//!   instruments through the VISA library (`instrument_visa` feature)
//! - [`MockResourceManager`] / [`MockTransport`] for tests and dry runs

use crate::error::TransportError;
use async_trait::async_trait;

pub mod mock;
pub mod visa;

pub use mock::{MockResourceManager, MockTransport};
pub use visa::{VisaResourceManager, VisaSettings, VisaTransport};

/// An open session to one instrument.
///
/// Methods take `&mut self`: a session is owned by exactly one wrapper and
/// operations on it are strictly sequential.
#[async_trait]
pub trait Transport: Send {
    /// Send a command that produces no reply.
    async fn write(&mut self, command: &str) -> Result<(), TransportError>;

    /// Send a command and read one reply line (trimmed).
    async fn query(&mut self, command: &str) -> Result<String, TransportError>;

    /// Issue a device clear.
    async fn clear(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Release the underlying resource. Further calls fail with `Closed`.
    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Resource address this session was opened on.
    fn resource(&self) -> &str;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn write(&mut self, command: &str) -> Result<(), TransportError> {
        (**self).write(command).await
    }

    async fn query(&mut self, command: &str) -> Result<String, TransportError> {
        (**self).query(command).await
    }

    async fn clear(&mut self) -> Result<(), TransportError> {
        (**self).clear().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        (**self).close().await
    }

    fn resource(&self) -> &str {
        (**self).resource()
    }
}

/// Opens transports and enumerates visible resources.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Open a session on `resource` (e.g. `"GPIB0::1::INSTR"`).
    async fn open(&self, resource: &str) -> Result<Box<dyn Transport>, TransportError>;

    /// Addresses of every resource currently visible.
    async fn list_resources(&self) -> Result<Vec<String>, TransportError>;
}

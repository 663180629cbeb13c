//! Connected instrument discovery
//!
//! Enumerates the resources a [`ResourceManager`] can see and asks each one
//! for its `*IDN?` string. A resource that cannot be opened or does not answer
//! is reported with its error instead of aborting the listing, so one
//! powered-off instrument on the bus does not hide the others.

use crate::config::InstrumentEntry;
use crate::error::TransportError;
use crate::transport::{ResourceManager, Transport};
use tracing::{debug, warn};

/// One enumerated resource.
#[derive(Debug)]
pub struct DiscoveredInstrument {
    /// VISA resource string
    pub resource: String,
    /// Identity string, or why it could not be read
    pub identity: Result<String, TransportError>,
}

impl DiscoveredInstrument {
    /// `"<address>  <identity>"`, the format printed by the CLI.
    pub fn summary(&self) -> String {
        match &self.identity {
            Ok(idn) => format!("{}  {}", self.resource, idn),
            Err(e) => format!("{}  <unavailable: {}>", self.resource, e),
        }
    }
}

async fn identify_resource(
    rm: &dyn ResourceManager,
    resource: &str,
) -> Result<String, TransportError> {
    let mut transport = rm.open(resource).await?;
    let reply = transport.query("*IDN?").await;
    // Close even when the query failed.
    if let Err(e) = transport.close().await {
        warn!("Failed to close {}: {}", resource, e);
    }
    Ok(reply?.trim().to_string())
}

/// Identify each of `resources` in turn.
pub async fn identify_resources<I>(
    rm: &dyn ResourceManager,
    resources: I,
) -> Vec<DiscoveredInstrument>
where
    I: IntoIterator<Item = String>,
{
    let mut found = Vec::new();
    for resource in resources {
        let identity = identify_resource(rm, &resource).await;
        match &identity {
            Ok(idn) => debug!("{} -> {}", resource, idn),
            Err(e) => warn!("Could not identify {}: {}", resource, e),
        }
        found.push(DiscoveredInstrument { resource, identity });
    }
    found
}

/// List every visible resource together with its identity.
pub async fn list_connected_instruments(
    rm: &dyn ResourceManager,
) -> Result<Vec<DiscoveredInstrument>, TransportError> {
    let resources = rm.list_resources().await?;
    debug!("Found {} resource(s)", resources.len());
    Ok(identify_resources(rm, resources).await)
}

/// Identify the instruments named in the configuration.
pub async fn identify_configured(
    rm: &dyn ResourceManager,
    entries: &[InstrumentEntry],
) -> Vec<DiscoveredInstrument> {
    identify_resources(rm, entries.iter().map(|entry| entry.resource.clone())).await
}

//! Instrument wrappers.
//!
//! Each wrapper owns one [`Transport`] exclusively, formats the instrument's
//! command strings, and composes an [`Interlock`](crate::interlock::Interlock)
//! sized to its channel count:
//!
//! - [`Kei2230g`]: Keithley 2230G 3-channel DC power supply
//! - [`Kei2600b`]: Keithley 2600B 2-channel source-measure unit
//! - [`Afg3000`]: Tektronix AFG3000 2-channel function generator
//!
//! ## Example
//!
//! ```
//! use lab_instruments::instrument::{Kei2600b, OutputState};
//! use lab_instruments::transport::MockTransport;
//!
//! # tokio_test::block_on(async {
//! let mock = MockTransport::new("GPIB0::1::INSTR");
//! let mut smu = Kei2600b::new(mock.clone());
//!
//! smu.set_limit(1, 1.0, 1e-3).await.unwrap();
//! assert!(smu.set_voltage(1, 0.22).await.unwrap().is_applied());
//! smu.set_output_state(1, OutputState::On).await.unwrap();
//! # });
//! ```

use crate::error::{InstrumentError, InstrumentResult};
use crate::interlock::{Rejection, SourceOutcome};
use crate::transport::Transport;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

pub mod function_generator;
pub mod power_supply;
pub mod source_meter;

pub use function_generator::{Afg3000, AmplitudeWindow, FrequencyUnit, Waveform};
pub use power_supply::{CurrentUnit, Kei2230g, VoltageUnit};
pub use source_meter::{ComplianceLimit, IvReading, Kei2600b};

/// Output relay state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    /// Output enabled
    On,
    /// Output disabled
    Off,
}

impl fmt::Display for OutputState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputState::On => write!(f, "ON"),
            OutputState::Off => write!(f, "OFF"),
        }
    }
}

impl FromStr for OutputState {
    type Err = InstrumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ON" | "1" => Ok(OutputState::On),
            "OFF" | "0" => Ok(OutputState::Off),
            other => Err(InstrumentError::InvalidArgument(format!(
                "unknown output state '{}' (expected ON or OFF)",
                other
            ))),
        }
    }
}

impl From<bool> for OutputState {
    fn from(on: bool) -> Self {
        if on { OutputState::On } else { OutputState::Off }
    }
}

/// Query `*IDN?` and log the identity the way every wrapper does on open.
pub(crate) async fn identify<T: Transport>(transport: &mut T) -> InstrumentResult<String> {
    let idn = transport.query("*IDN?").await?;
    let idn = idn.trim().to_string();
    info!("Initialized {} ({})", idn, transport.resource());
    Ok(idn)
}

/// Parse a numeric reply such as `"1.234E-03"`.
pub(crate) fn parse_reading(command: &str, response: &str) -> InstrumentResult<f64> {
    response
        .trim()
        .parse::<f64>()
        .map_err(|_| InstrumentError::InvalidResponse {
            command: command.to_string(),
            response: response.trim().to_string(),
        })
}

/// Log a soft rejection and build the matching outcome.
pub(crate) fn reject(
    resource: &str,
    channel: u8,
    rejection: Rejection,
    hint: &str,
) -> SourceOutcome {
    warn!("{} channel {}: {}. {}", resource, channel, rejection, hint);
    SourceOutcome::Rejected(rejection)
}

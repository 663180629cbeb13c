//! Keithley 2230G 3-channel DC power supply
//!
//! Programmer manual: Keithley 2230G-900-01A, chapter 4 onwards.
//!
//! The supply selects a channel with `INSTrument:NSELect` and then applies
//! `SOURce:` commands to the selected channel. Output is switched for all
//! channels at once.
//!
//! Every channel must have its maximum voltage configured with
//! [`Kei2230g::set_voltage_limit`] before voltage or current levels are
//! accepted for it.

use super::{identify, parse_reading, reject, OutputState};
use crate::error::InstrumentResult;
use crate::interlock::{Interlock, Rejection, SourceOutcome};
use crate::transport::Transport;
use std::fmt;
use tracing::debug;

/// Number of output channels on the 2230G.
pub const CHANNEL_COUNT: u8 = 3;

/// Unit suffix for voltage levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoltageUnit {
    /// `mV`
    #[default]
    Millivolts,
    /// `V`
    Volts,
}

impl fmt::Display for VoltageUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoltageUnit::Millivolts => write!(f, "mV"),
            VoltageUnit::Volts => write!(f, "V"),
        }
    }
}

/// Unit suffix for current levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CurrentUnit {
    /// `mA`
    #[default]
    Milliamps,
    /// `A`
    Amps,
}

impl fmt::Display for CurrentUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurrentUnit::Milliamps => write!(f, "mA"),
            CurrentUnit::Amps => write!(f, "A"),
        }
    }
}

/// Three-channel 2230G with a voltage-limit interlock per channel.
pub struct Kei2230g<T> {
    transport: T,
    /// Voltage limit (V) per channel
    interlock: Interlock<f64>,
    identity: Option<String>,
}

impl<T: Transport> Kei2230g<T> {
    /// Wrap an open transport without talking to the instrument.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            interlock: Interlock::new(CHANNEL_COUNT),
            identity: None,
        }
    }

    /// Wrap an open transport and query its identity.
    pub async fn open(transport: T) -> InstrumentResult<Self> {
        let mut supply = Self::new(transport);
        supply.identity = Some(identify(&mut supply.transport).await?);
        Ok(supply)
    }

    /// `*IDN?` reply captured by [`Kei2230g::open`].
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Per-channel voltage limits.
    pub fn interlock(&self) -> &Interlock<f64> {
        &self.interlock
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Give back the transport, e.g. to close it.
    pub fn into_transport(self) -> T {
        self.transport
    }

    async fn select_channel(&mut self, channel: u8) -> InstrumentResult<()> {
        self.transport
            .write(&format!("INSTrument:NSELect {}", channel))
            .await?;
        Ok(())
    }

    /// Switch the output of all channels. Not gated by the interlock.
    pub async fn set_output_state(&mut self, state: OutputState) -> InstrumentResult<()> {
        self.transport.write(&format!("OUTP {}", state)).await?;
        Ok(())
    }

    /// Configure the maximum output voltage (V) of `channel` and arm it.
    pub async fn set_voltage_limit(
        &mut self,
        channel: u8,
        voltage_limit: f64,
    ) -> InstrumentResult<()> {
        self.interlock.validate(channel)?;
        self.select_channel(channel).await?;
        self.transport
            .write(&format!("SOURce:VOLTage:LIMit:LEVel {}", voltage_limit))
            .await?;
        self.interlock.arm(channel, voltage_limit)?;
        debug!(
            "{} channel {} armed with {} V limit",
            self.transport.resource(),
            channel,
            voltage_limit
        );
        Ok(())
    }

    /// Set the output voltage of `channel`.
    pub async fn set_voltage(
        &mut self,
        channel: u8,
        voltage: f64,
        unit: VoltageUnit,
    ) -> InstrumentResult<SourceOutcome> {
        if !self.interlock.is_armed(channel)? {
            return Ok(self.reject_unarmed(channel));
        }
        self.select_channel(channel).await?;
        self.transport
            .write(&format!(
                "SOURce:VOLTage:LEVel:IMMediate:AMPLitude {}{}",
                voltage, unit
            ))
            .await?;
        Ok(SourceOutcome::Applied)
    }

    /// Set the output current of `channel`.
    pub async fn set_current(
        &mut self,
        channel: u8,
        current: f64,
        unit: CurrentUnit,
    ) -> InstrumentResult<SourceOutcome> {
        if !self.interlock.is_armed(channel)? {
            return Ok(self.reject_unarmed(channel));
        }
        self.select_channel(channel).await?;
        self.transport
            .write(&format!(
                "SOURce:CURRent:LEVel:IMMediate:AMPLitude {}{}",
                current, unit
            ))
            .await?;
        Ok(SourceOutcome::Applied)
    }

    /// Measured voltage (V) on `channel`.
    pub async fn get_voltage(&mut self, channel: u8) -> InstrumentResult<f64> {
        self.measure("voltage", channel).await
    }

    /// Measured current (A) on `channel`.
    pub async fn get_current(&mut self, channel: u8) -> InstrumentResult<f64> {
        self.measure("current", channel).await
    }

    async fn measure(&mut self, quantity: &str, channel: u8) -> InstrumentResult<f64> {
        self.interlock.validate(channel)?;
        let command = format!("measure:SCALar:{}:DC? CH{}", quantity, channel);
        let response = self.transport.query(&command).await?;
        parse_reading(&command, &response)
    }

    fn reject_unarmed(&self, channel: u8) -> SourceOutcome {
        reject(
            self.transport.resource(),
            channel,
            Rejection::LimitNotSet,
            "Run set_voltage_limit first to protect your circuit",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InstrumentError;
    use crate::transport::MockTransport;
    use tracing_test::traced_test;

    fn supply() -> (Kei2230g<MockTransport>, MockTransport) {
        let mock = MockTransport::new("GPIB0::3::INSTR");
        (Kei2230g::new(mock.clone()), mock)
    }

    #[tokio::test]
    #[traced_test]
    async fn test_voltage_rejected_until_limit_set() {
        let (mut psu, mock) = supply();

        let outcome = psu.set_voltage(2, 500.0, VoltageUnit::Millivolts).await.unwrap();
        assert_eq!(outcome, SourceOutcome::Rejected(Rejection::LimitNotSet));
        assert!(mock.writes().is_empty());
        assert!(logs_contain("limit not set"));
    }

    #[tokio::test]
    async fn test_limit_then_voltage_commands() {
        let (mut psu, mock) = supply();

        psu.set_voltage_limit(2, 3.3).await.unwrap();
        let outcome = psu.set_voltage(2, 500.0, VoltageUnit::default()).await.unwrap();

        assert!(outcome.is_applied());
        assert_eq!(
            mock.writes(),
            vec![
                "INSTrument:NSELect 2",
                "SOURce:VOLTage:LIMit:LEVel 3.3",
                "INSTrument:NSELect 2",
                "SOURce:VOLTage:LEVel:IMMediate:AMPLitude 500mV",
            ]
        );
    }

    #[tokio::test]
    async fn test_current_gated_by_voltage_limit() {
        let (mut psu, mock) = supply();

        assert!(psu
            .set_current(1, 100.0, CurrentUnit::Milliamps)
            .await
            .unwrap()
            .is_rejected());

        psu.set_voltage_limit(1, 5.0).await.unwrap();
        mock.clear_log();
        assert!(psu
            .set_current(1, 0.25, CurrentUnit::Amps)
            .await
            .unwrap()
            .is_applied());
        assert_eq!(
            mock.writes(),
            vec![
                "INSTrument:NSELect 1",
                "SOURce:CURRent:LEVel:IMMediate:AMPLitude 0.25A",
            ]
        );
    }

    #[tokio::test]
    async fn test_output_state_not_gated() {
        let (mut psu, mock) = supply();
        psu.set_output_state(OutputState::On).await.unwrap();
        psu.set_output_state(OutputState::Off).await.unwrap();
        assert_eq!(mock.writes(), vec!["OUTP ON", "OUTP OFF"]);
    }

    #[tokio::test]
    async fn test_failed_limit_leaves_channel_unarmed() {
        let (mut psu, mock) = supply();
        mock.inject_next_failure();

        assert!(matches!(
            psu.set_voltage_limit(3, 12.0).await,
            Err(InstrumentError::Transport(_))
        ));
        assert!(!psu.interlock().is_armed(3).unwrap());
    }

    #[tokio::test]
    async fn test_invalid_channel_sends_nothing() {
        let (mut psu, mock) = supply();

        for ch in [0u8, 4] {
            assert!(matches!(
                psu.set_voltage_limit(ch, 1.0).await,
                Err(InstrumentError::InvalidChannel { channel_count: 3, .. })
            ));
            assert!(psu.set_voltage(ch, 1.0, VoltageUnit::Volts).await.is_err());
            assert!(psu.get_voltage(ch).await.is_err());
        }
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_measurements() {
        let (mut psu, mock) = supply();
        mock.push_reply("measure:SCALar:voltage:DC? CH1", "4.9981");
        mock.push_reply("measure:SCALar:current:DC? CH1", "1.20E-02");
        mock.push_reply("measure:SCALar:current:DC? CH2", "OVER");

        assert_eq!(psu.get_voltage(1).await.unwrap(), 4.9981);
        assert_eq!(psu.get_current(1).await.unwrap(), 0.012);
        assert!(matches!(
            psu.get_current(2).await,
            Err(InstrumentError::InvalidResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_open_reads_identity() {
        let mock = MockTransport::new("GPIB0::3::INSTR");
        mock.push_reply("*IDN?", "Keithley instruments, 2230G-30-1, 9203020, 1.16-1.04\n");

        let psu = Kei2230g::open(mock.clone()).await.unwrap();
        assert_eq!(
            psu.identity(),
            Some("Keithley instruments, 2230G-30-1, 9203020, 1.16-1.04")
        );
        assert_eq!(mock.queries(), vec!["*IDN?"]);
    }
}

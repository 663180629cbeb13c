//! Keithley 2600B series SourceMeter
//!
//! The 2600B is driven through its TSP (Lua) command interface rather than
//! SCPI: every command is an assignment or call on the `smua` / `smub` node.
//! Channels A and B are exposed as channels 1 and 2.
//!
//! Both compliance limits of a channel are configured together with
//! [`Kei2600b::set_limit`], which arms the channel for voltage and current
//! sourcing.

use super::{identify, parse_reading, reject, OutputState};
use crate::error::InstrumentResult;
use crate::interlock::{Interlock, Rejection, SourceOutcome};
use crate::transport::Transport;
use std::time::Duration;
use tracing::debug;

/// Number of SMU channels (A and B).
pub const CHANNEL_COUNT: u8 = 2;

/// Settling time before a device clear hands the front panel back.
const FRONT_PANEL_SETTLE: Duration = Duration::from_millis(100);

/// Compliance limits configured on one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComplianceLimit {
    /// Voltage limit (V), effective when sourcing current
    pub voltage: f64,
    /// Current limit (A), effective when sourcing voltage
    pub current: f64,
}

/// Simultaneous current/voltage measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IvReading {
    /// Measured current (A)
    pub current: f64,
    /// Measured voltage (V)
    pub voltage: f64,
}

/// Two-channel 2600B with a compliance-limit interlock per channel.
pub struct Kei2600b<T> {
    transport: T,
    interlock: Interlock<ComplianceLimit>,
    identity: Option<String>,
}

/// TSP node name for a validated channel number.
fn smu_node(channel: u8) -> &'static str {
    if channel == 1 { "smua" } else { "smub" }
}

impl<T: Transport> Kei2600b<T> {
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
        let mut smu = Self::new(transport);
        smu.identity = Some(identify(&mut smu.transport).await?);
        Ok(smu)
    }

    /// `*IDN?` reply captured by [`Kei2600b::open`].
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Per-channel compliance limits.
    pub fn interlock(&self) -> &Interlock<ComplianceLimit> {
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

    fn node(&self, channel: u8) -> InstrumentResult<&'static str> {
        self.interlock.validate(channel)?;
        Ok(smu_node(channel))
    }

    /// Switch the output relay of `channel`. Not gated by the interlock.
    pub async fn set_output_state(
        &mut self,
        channel: u8,
        state: OutputState,
    ) -> InstrumentResult<()> {
        let node = self.node(channel)?;
        self.transport
            .write(&format!("{node}.source.output={node}.OUTPUT_{}", state))
            .await?;
        Ok(())
    }

    /// Configure both compliance limits of `channel` and arm it.
    ///
    /// # Arguments
    /// * `voltage_limit` - V, effective when sourcing current
    /// * `current_limit` - A, effective when sourcing voltage
    pub async fn set_limit(
        &mut self,
        channel: u8,
        voltage_limit: f64,
        current_limit: f64,
    ) -> InstrumentResult<()> {
        let node = self.node(channel)?;
        self.transport
            .write(&format!("{node}.source.limitv = {}", voltage_limit))
            .await?;
        self.transport
            .write(&format!("{node}.source.limiti = {}", current_limit))
            .await?;
        self.interlock.arm(
            channel,
            ComplianceLimit {
                voltage: voltage_limit,
                current: current_limit,
            },
        )?;
        debug!(
            "{} {} armed (limitv={}, limiti={})",
            self.transport.resource(),
            node,
            voltage_limit,
            current_limit
        );
        Ok(())
    }

    /// Source a DC voltage (V) on `channel`, measuring current on the display.
    pub async fn set_voltage(
        &mut self,
        channel: u8,
        voltage: f64,
    ) -> InstrumentResult<SourceOutcome> {
        let node = self.node(channel)?;
        if !self.interlock.is_armed(channel)? {
            return Ok(self.reject_unarmed(channel));
        }
        self.transport
            .write(&format!("{node}.source.func = {node}.OUTPUT_DCVOLTS"))
            .await?;
        self.transport
            .write(&format!("{node}.source.levelv = {}", voltage))
            .await?;
        self.transport
            .write(&format!("display.{node}.measure.func = display.MEASURE_DCAMPS"))
            .await?;
        Ok(SourceOutcome::Applied)
    }

    /// Source a DC current (A) on `channel`, measuring voltage on the display.
    pub async fn set_current(
        &mut self,
        channel: u8,
        current: f64,
    ) -> InstrumentResult<SourceOutcome> {
        let node = self.node(channel)?;
        if !self.interlock.is_armed(channel)? {
            return Ok(self.reject_unarmed(channel));
        }
        self.transport
            .write(&format!("{node}.source.func = {node}.OUTPUT_DCAMPS"))
            .await?;
        self.transport
            .write(&format!("{node}.source.leveli = {}", current))
            .await?;
        self.transport
            .write(&format!("display.{node}.measure.func = display.MEASURE_DCVOLTS"))
            .await?;
        Ok(SourceOutcome::Applied)
    }

    /// Measure current and voltage on `channel` in one acquisition.
    pub async fn get_current_voltage(&mut self, channel: u8) -> InstrumentResult<IvReading> {
        let node = self.node(channel)?;
        self.transport
            .write(&format!("iReading, vReading = {node}.measure.iv()"))
            .await?;

        let current_cmd = "print(iReading)";
        let current = self.transport.query(current_cmd).await?;
        let current = parse_reading(current_cmd, &current)?;

        let voltage_cmd = "print(vReading)";
        let voltage = self.transport.query(voltage_cmd).await?;
        let voltage = parse_reading(voltage_cmd, &voltage)?;

        Ok(IvReading { current, voltage })
    }

    /// Hand the front panel back to the operator so it shows live readings.
    ///
    /// The SMU offers no busy query, so a fixed settling delay precedes the
    /// device clear.
    pub async fn release_front_panel(&mut self) -> InstrumentResult<()> {
        tokio::time::sleep(FRONT_PANEL_SETTLE).await;
        self.transport.clear().await?;
        Ok(())
    }

    fn reject_unarmed(&self, channel: u8) -> SourceOutcome {
        reject(
            self.transport.resource(),
            channel,
            Rejection::LimitNotSet,
            "Run set_limit first to protect your circuit",
        )
    }
}

//! Tektronix AFG3000 series arbitrary function generator
//!
//! Programmer manual: AFG3000 Series Programmer (commands by functional group,
//! p. 29).
//!
//! Levels assume the default 50 Ω output load. Into a high-impedance load the
//! instrument delivers twice the programmed voltage, so every channel must
//! have a voltage window configured with [`Afg3000::set_voltage_limit`]
//! before amplitude or offset are accepted. The window is sent to the
//! instrument's own limit registers and also checked locally.

use super::{identify, reject, OutputState};
use crate::error::{InstrumentError, InstrumentResult};
use crate::interlock::{Interlock, Rejection, SourceOutcome};
use crate::transport::Transport;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Number of output channels.
pub const CHANNEL_COUNT: u8 = 2;

/// Presets take their frequency in hertz.
const PRESET_FREQUENCY_UNIT: FrequencyUnit = FrequencyUnit::Hz;

/// Permitted voltage range (V) for amplitude and offset on one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmplitudeWindow {
    /// Lowest allowed level
    pub min: f64,
    /// Highest allowed level
    pub max: f64,
}

impl AmplitudeWindow {
    /// Window `[min, max]`. Both bounds must be finite and ordered.
    pub fn new(min: f64, max: f64) -> InstrumentResult<Self> {
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(InstrumentError::InvalidArgument(format!(
                "invalid voltage window [{}, {}]",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    /// Whether `value` lies inside the window, bounds included.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Unit suffix for `FREQuency:FIXed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrequencyUnit {
    /// Hertz
    #[default]
    Hz,
    /// Kilohertz
    KHz,
    /// Megahertz
    MHz,
}

impl fmt::Display for FrequencyUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrequencyUnit::Hz => write!(f, "Hz"),
            FrequencyUnit::KHz => write!(f, "kHz"),
            FrequencyUnit::MHz => write!(f, "MHz"),
        }
    }
}

impl FromStr for FrequencyUnit {
    type Err = InstrumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Hz" => Ok(FrequencyUnit::Hz),
            "kHz" => Ok(FrequencyUnit::KHz),
            "MHz" => Ok(FrequencyUnit::MHz),
            other => Err(InstrumentError::InvalidArgument(format!(
                "unknown frequency unit '{}' (expected Hz, kHz or MHz)",
                other
            ))),
        }
    }
}

/// Standard output waveforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    /// `SINusoid`
    Sine,
    /// `SQUare`
    Square,
    /// `RAMP`
    Ramp,
    /// `PULSe`
    Pulse,
}

impl Waveform {
    /// Mnemonic accepted by `FUNCtion:SHAPe`.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Waveform::Sine => "SINusoid",
            Waveform::Square => "SQUare",
            Waveform::Ramp => "RAMP",
            Waveform::Pulse => "PULSe",
        }
    }
}

impl FromStr for Waveform {
    type Err = InstrumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sine" | "sin" | "sinusoid" => Ok(Waveform::Sine),
            "square" | "squ" => Ok(Waveform::Square),
            "ramp" => Ok(Waveform::Ramp),
            "pulse" | "puls" => Ok(Waveform::Pulse),
            other => Err(InstrumentError::InvalidArgument(format!(
                "unknown waveform '{}' (expected Sine, Square, Ramp or Pulse)",
                other
            ))),
        }
    }
}

/// Two-channel AFG3000 with a voltage window interlock per channel.
pub struct Afg3000<T> {
    transport: T,
    interlock: Interlock<AmplitudeWindow>,
    identity: Option<String>,
}

impl<T: Transport> Afg3000<T> {
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
        let mut afg = Self::new(transport);
        afg.identity = Some(identify(&mut afg.transport).await?);
        Ok(afg)
    }

    /// `*IDN?` reply captured by [`Afg3000::open`].
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Per-channel voltage windows.
    pub fn interlock(&self) -> &Interlock<AmplitudeWindow> {
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

    /// Switch the output of `channel`. Not gated by the interlock.
    pub async fn set_output_state(
        &mut self,
        channel: u8,
        state: OutputState,
    ) -> InstrumentResult<()> {
        self.interlock.validate(channel)?;
        self.transport
            .write(&format!("OUTPUT{}:STATE {}", channel, state))
            .await?;
        Ok(())
    }

    /// Configure the voltage window (V) of `channel` and arm it.
    pub async fn set_voltage_limit(
        &mut self,
        channel: u8,
        min: f64,
        max: f64,
    ) -> InstrumentResult<()> {
        self.interlock.validate(channel)?;
        let window = AmplitudeWindow::new(min, max)?;
        self.transport
            .write(&format!("SOURce{}:VOLTage:LIMit:LOW {}V", channel, window.min))
            .await?;
        self.transport
            .write(&format!("SOURce{}:VOLTage:LIMit:HIGH {}V", channel, window.max))
            .await?;
        self.interlock.arm(channel, window)?;
        debug!(
            "{} channel {} armed with window [{}, {}] V",
            self.transport.resource(),
            channel,
            window.min,
            window.max
        );
        Ok(())
    }

    /// Check the interlock and window for a gated level command.
    fn check_level(
        &self,
        channel: u8,
        value: f64,
        what: &str,
    ) -> InstrumentResult<Option<SourceOutcome>> {
        let Some(window) = self.interlock.limit(channel)? else {
            return Ok(Some(reject(
                self.transport.resource(),
                channel,
                Rejection::LimitNotSet,
                "Run set_voltage_limit first to protect your circuit",
            )));
        };
        if !window.contains(value) {
            let hint = format!("Requested {} exceeds the safety boundary", what);
            return Ok(Some(reject(
                self.transport.resource(),
                channel,
                Rejection::OutOfBounds {
                    value,
                    min: window.min,
                    max: window.max,
                },
                &hint,
            )));
        }
        Ok(None)
    }

    /// Set the peak-to-peak amplitude (V) of `channel`.
    pub async fn set_output_vpp(
        &mut self,
        channel: u8,
        amplitude: f64,
    ) -> InstrumentResult<SourceOutcome> {
        if let Some(rejected) = self.check_level(channel, amplitude, "amplitude")? {
            return Ok(rejected);
        }
        self.transport
            .write(&format!(
                "SOURce{}:VOLTage:LEVel:IMMediate:AMPLitude {}VPP",
                channel, amplitude
            ))
            .await?;
        Ok(SourceOutcome::Applied)
    }

    /// Set the DC offset (V) of `channel`.
    pub async fn set_output_offset(
        &mut self,
        channel: u8,
        offset: f64,
    ) -> InstrumentResult<SourceOutcome> {
        if let Some(rejected) = self.check_level(channel, offset, "offset")? {
            return Ok(rejected);
        }
        self.transport
            .write(&format!(
                "SOURce{}:VOLTage:LEVel:IMMediate:OFFSet {}V",
                channel, offset
            ))
            .await?;
        Ok(SourceOutcome::Applied)
    }

    /// Set the output frequency of `channel`. Not gated.
    pub async fn set_output_freq(
        &mut self,
        channel: u8,
        frequency: f64,
        unit: FrequencyUnit,
    ) -> InstrumentResult<()> {
        self.interlock.validate(channel)?;
        self.transport
            .write(&format!("SOURce{}:FREQuency:FIXed {}{}", channel, frequency, unit))
            .await?;
        Ok(())
    }

    /// Select the waveform of `channel`. Not gated.
    pub async fn set_output_shape(
        &mut self,
        channel: u8,
        waveform: Waveform,
    ) -> InstrumentResult<()> {
        self.interlock.validate(channel)?;
        self.transport
            .write(&format!("SOURce{}:FUNCtion:SHAPe {}", channel, waveform.mnemonic()))
            .await?;
        Ok(())
    }

    /// Square wave with the given frequency (Hz), amplitude (Vpp) and offset (V).
    pub async fn preset_square_wave(
        &mut self,
        channel: u8,
        frequency_hz: f64,
        amplitude: f64,
        offset: f64,
    ) -> InstrumentResult<SourceOutcome> {
        self.preset(channel, Waveform::Square, frequency_hz, amplitude, offset)
            .await
    }

    /// Sine wave with the given frequency (Hz), amplitude (Vpp) and offset (V).
    pub async fn preset_sine_wave(
        &mut self,
        channel: u8,
        frequency_hz: f64,
        amplitude: f64,
        offset: f64,
    ) -> InstrumentResult<SourceOutcome> {
        self.preset(channel, Waveform::Sine, frequency_hz, amplitude, offset)
            .await
    }

    async fn preset(
        &mut self,
        channel: u8,
        waveform: Waveform,
        frequency_hz: f64,
        amplitude: f64,
        offset: f64,
    ) -> InstrumentResult<SourceOutcome> {
        let offset_set = self.set_output_offset(channel, offset).await?;
        self.set_output_shape(channel, waveform).await?;
        let amplitude_set = self.set_output_vpp(channel, amplitude).await?;
        self.set_output_freq(channel, frequency_hz, PRESET_FREQUENCY_UNIT)
            .await?;
        Ok(offset_set.and(amplitude_set))
    }
}

//! Per-channel safety interlock.
//!
//! Every source-capable instrument owns one [`Interlock`] sized to its channel
//! count. A channel becomes armed the first time its protective limit is
//! successfully configured and stays armed for the lifetime of the wrapper.
//! Source commands on an unarmed channel are refused before anything reaches
//! the instrument.
//!
//! Channels are numbered from 1 in the public API, matching the front panel
//! labels. Storage is 0-based.

use crate::error::{InstrumentError, InstrumentResult};
use std::fmt;

/// Why a gated source command was not sent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// No protective limit has been configured on the channel yet.
    LimitNotSet,
    /// The requested value lies outside the configured window.
    OutOfBounds {
        /// Requested value
        value: f64,
        /// Window lower bound
        min: f64,
        /// Window upper bound
        max: f64,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::LimitNotSet => write!(f, "limit not set"),
            Rejection::OutOfBounds { value, min, max } => {
                write!(f, "value {} outside safety window [{}, {}]", value, min, max)
            }
        }
    }
}

/// Result of a gated source operation.
///
/// A rejection is a soft failure: nothing was sent and the caller may arm the
/// channel (or pick another value) and retry.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceOutcome {
    /// The command was sent.
    Applied,
    /// Nothing was sent.
    Rejected(Rejection),
}

impl SourceOutcome {
    /// `true` if the command reached the instrument.
    pub fn is_applied(&self) -> bool {
        matches!(self, SourceOutcome::Applied)
    }

    /// `true` if the command was held back.
    pub fn is_rejected(&self) -> bool {
        !self.is_applied()
    }

    /// Combine two outcomes, keeping the first rejection.
    pub fn and(self, other: SourceOutcome) -> SourceOutcome {
        match self {
            SourceOutcome::Applied => other,
            rejected => rejected,
        }
    }
}

/// Interlock table holding, per channel, the last limit configured on it.
///
/// A channel is armed iff an entry is present.
#[derive(Debug, Clone)]
pub struct Interlock<L> {
    limits: Vec<Option<L>>,
}

impl<L> Interlock<L> {
    /// Create an interlock with every channel unarmed.
    pub fn new(channel_count: u8) -> Self {
        Self {
            limits: (0..channel_count).map(|_| None).collect(),
        }
    }

    /// Number of channels, numbered `1..=channel_count`.
    pub fn channel_count(&self) -> u8 {
        // Construction bounds the length to u8.
        self.limits.len() as u8
    }

    fn index(&self, channel: u8) -> InstrumentResult<usize> {
        if channel == 0 || usize::from(channel) > self.limits.len() {
            return Err(InstrumentError::InvalidChannel {
                channel,
                channel_count: self.channel_count(),
            });
        }
        Ok(usize::from(channel) - 1)
    }

    /// Check that `channel` exists on this instrument.
    pub fn validate(&self, channel: u8) -> InstrumentResult<()> {
        self.index(channel).map(|_| ())
    }

    /// Record `limit` for `channel` and mark it armed. Re-arming replaces the
    /// stored limit; the channel stays armed.
    pub fn arm(&mut self, channel: u8, limit: L) -> InstrumentResult<()> {
        let idx = self.index(channel)?;
        self.limits[idx] = Some(limit);
        Ok(())
    }

    /// Whether `channel` has a limit configured.
    pub fn is_armed(&self, channel: u8) -> InstrumentResult<bool> {
        let idx = self.index(channel)?;
        Ok(self.limits[idx].is_some())
    }

    /// Limit last configured on `channel`, if armed.
    pub fn limit(&self, channel: u8) -> InstrumentResult<Option<&L>> {
        let idx = self.index(channel)?;
        Ok(self.limits[idx].as_ref())
    }

    /// Channels that are currently armed, in ascending order.
    pub fn armed_channels(&self) -> impl Iterator<Item = u8> + '_ {
        self.limits
            .iter()
            .enumerate()
            .filter(|(_, limit)| limit.is_some())
            .map(|(idx, _)| idx as u8 + 1)
    }
}

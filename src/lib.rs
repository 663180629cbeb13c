//! Core library for the lab_instruments toolkit.
//!
//! Thin wrappers over VISA-connected bench instruments (Keithley 2230G power
//! supply, Keithley 2600B SourceMeter, Tektronix AFG3000 function generator)
//! plus an FPGA front-panel loader. Every source-capable wrapper refuses to
//! source voltage or current on a channel until that channel's protective
//! limit has been configured; see [`interlock`].

pub mod config;
pub mod discovery;
pub mod error;
pub mod fpga;
pub mod instrument;
pub mod interlock;
pub mod transport;

pub use error::{InstrumentError, InstrumentResult, TransportError};
pub use interlock::{Interlock, Rejection, SourceOutcome};

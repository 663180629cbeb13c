//! Configuration using Figment
//!
//! Configuration is loaded from (in order of precedence):
//! 1. Environment variables prefixed with `LABINST_` (nested keys separated
//!    by `__`, e.g. `LABINST_VISA__TIMEOUT_MS=2500`)
//! 2. TOML configuration file (default: `config/lab.toml`)
//! 3. Built-in defaults
//!
//! # Example
//!
//! ```toml
//! log_level = "info"
//!
//! [visa]
//! timeout_ms = 5000
//!
//! [[instruments]]
//! id = "smu"
//! kind = "source_meter"
//! resource = "GPIB0::1::INSTR"
//!
//! [fpga]
//! bitfile = "fpga/toplevel.bit"
//! ```

use crate::fpga::FpgaSettings;
use crate::transport::VisaSettings;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/lab.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "LABINST_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File or environment could not be parsed
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// Parsed values are inconsistent
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// VISA session settings
    pub visa: VisaSettings,
    /// Instruments on the bench
    #[serde(default)]
    pub instruments: Vec<InstrumentEntry>,
    /// FPGA module, if one is attached
    #[serde(default)]
    pub fpga: Option<FpgaSettings>,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            visa: VisaSettings::default(),
            instruments: Vec::new(),
            fpga: None,
        }
    }
}

/// Which wrapper drives an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    /// Keithley 2230G
    PowerSupply,
    /// Keithley 2600B
    SourceMeter,
    /// Tektronix AFG3000
    FunctionGenerator,
}

/// One instrument on the bench.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentEntry {
    /// Unique instrument identifier
    pub id: String,
    /// Wrapper used to drive it
    pub kind: InstrumentKind,
    /// VISA resource string (e.g. "GPIB0::1::INSTR")
    pub resource: String,
    /// Skipped by `identify` when false
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl LabConfig {
    /// Load configuration from `config/lab.toml` and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error: defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(LabConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - VISA timeout is non-zero
    /// - Instrument IDs are non-empty and unique
    /// - Every instrument has a resource string
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.visa.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "visa.timeout_ms must be greater than zero".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        for instrument in &self.instruments {
            if instrument.id.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "Instrument id cannot be empty".to_string(),
                ));
            }
            if !ids.insert(&instrument.id) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate instrument ID: '{}'",
                    instrument.id
                )));
            }
            if instrument.resource.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Instrument '{}': 'resource' cannot be empty",
                    instrument.id
                )));
            }
        }

        Ok(())
    }

    /// Instruments with `enabled = true`.
    pub fn enabled_instruments(&self) -> Vec<&InstrumentEntry> {
        self.instruments.iter().filter(|i| i.enabled).collect()
    }

    /// Look up an instrument by id.
    pub fn instrument(&self, id: &str) -> Option<&InstrumentEntry> {
        self.instruments.iter().find(|i| i.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use std::io::Write;

    const BENCH: &str = r#"
log_level = "debug"

[visa]
timeout_ms = 2000

[[instruments]]
id = "psu"
kind = "power_supply"
resource = "GPIB0::3::INSTR"

[[instruments]]
id = "smu"
kind = "source_meter"
resource = "GPIB0::1::INSTR"

[[instruments]]
id = "afg"
kind = "function_generator"
resource = "GPIB0::11::INSTR"
enabled = false

[fpga]
bitfile = "fpga/toplevel.bit"
serial = "1234000ABC"
"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_bench_file() {
        let file = write_config(BENCH);
        let config = LabConfig::load_from(file.path()).unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.visa.timeout_ms, 2000);
        assert_eq!(config.visa.write_terminator, "\n");
        assert_eq!(config.instruments.len(), 3);
        assert_eq!(config.instrument("smu").unwrap().kind, InstrumentKind::SourceMeter);
        assert_eq!(config.enabled_instruments().len(), 2);

        let fpga = config.fpga.unwrap();
        assert_eq!(fpga.bitfile, Path::new("fpga/toplevel.bit"));
        assert_eq!(fpga.serial.as_deref(), Some("1234000ABC"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LabConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, LabConfig::default());
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("lab.toml", BENCH)?;
            jail.set_env("LABINST_LOG_LEVEL", "warn");
            jail.set_env("LABINST_VISA__TIMEOUT_MS", "2500");

            let config = LabConfig::load_from("lab.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.log_level, "warn");
            assert_eq!(config.visa.timeout_ms, 2500);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_log_level() {
        let file = write_config("log_level = \"loud\"\n");
        assert!(matches!(
            LabConfig::load_from(file.path()),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_duplicate_instrument_ids() {
        let file = write_config(
            r#"
[[instruments]]
id = "smu"
kind = "source_meter"
resource = "GPIB0::1::INSTR"

[[instruments]]
id = "smu"
kind = "source_meter"
resource = "GPIB0::2::INSTR"
"#,
        );
        let err = LabConfig::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("Duplicate instrument ID: 'smu'"));
    }

    #[test]
    fn test_empty_resource_and_zero_timeout() {
        let mut config = LabConfig::default();
        config.instruments.push(InstrumentEntry {
            id: "psu".into(),
            kind: InstrumentKind::PowerSupply,
            resource: " ".into(),
            enabled: true,
        });
        assert!(config.validate().is_err());

        let mut config = LabConfig::default();
        config.visa.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_kind_is_load_error() {
        let file = write_config(
            r#"
[[instruments]]
id = "scope"
kind = "oscilloscope"
resource = "TCPIP0::192.168.1.100::INSTR"
"#,
        );
        assert!(matches!(
            LabConfig::load_from(file.path()),
            Err(ConfigError::LoadError(_))
        ));
    }
}

//! Loading of the monitor's physical base address.
//!
//! The address lives in a one-line text file, written by the operator with
//! something like `echo 17000000 > /etc/config_sesam`.

use std::path::{Path, PathBuf};

use crate::error::{Result, SesamError};

/// Where the base address record is read from unless overridden.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/config_sesam";

/// Printed after any configuration error.
pub const REMEDIATION: &str =
    "Please type in your terminal 'echo [hex addr sesam_monitor] > /etc/config_sesam'";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Physical address of the monitor's register window.
    pub base_address: u64,
}

impl DeviceConfig {
    /// Reads and validates the record at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let config_err = |reason: String| SesamError::Config {
            path: PathBuf::from(path),
            reason,
        };
        let text = std::fs::read_to_string(path)
            .map_err(|e| config_err(format!("cannot read file: {e}")))?;
        let config = Self::parse(&text).map_err(config_err)?;
        tracing::debug!(
            path = %path.display(),
            base_address = %format_args!("{:#x}", config.base_address),
            "loaded monitor address"
        );
        Ok(config)
    }

    /// Parses the leading hexadecimal number of `text`.
    ///
    /// Leading whitespace and a `0x` prefix are skipped, and parsing stops at
    /// the first character that is not a hex digit. Zero is rejected.
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let text = text.trim_start();
        let text = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        let end = text
            .find(|c: char| !c.is_ascii_hexdigit())
            .unwrap_or(text.len());
        let digits = &text[..end];
        if digits.is_empty() {
            return Err(String::from("file is empty or not in the right format"));
        }
        let base_address = u64::from_str_radix(digits, 16)
            .map_err(|e| format!("invalid address '{digits}': {e}"))?;
        if base_address == 0 {
            return Err(String::from("the monitor base address is zero"));
        }
        Ok(Self { base_address })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_hex() {
        assert_eq!(DeviceConfig::parse("40000000").unwrap().base_address, 0x4000_0000);
    }

    #[test]
    fn parse_prefixed_with_newline() {
        assert_eq!(DeviceConfig::parse("0x40000000\n").unwrap().base_address, 0x4000_0000);
        assert_eq!(DeviceConfig::parse("0X1f\n").unwrap().base_address, 0x1f);
    }

    #[test]
    fn parse_skips_leading_whitespace_and_trailing_text() {
        assert_eq!(DeviceConfig::parse("  17000000 # monitor").unwrap().base_address, 0x1700_0000);
    }

    #[test]
    fn reject_empty_record() {
        assert!(DeviceConfig::parse("").is_err());
        assert!(DeviceConfig::parse("\n").is_err());
    }

    #[test]
    fn reject_non_hex_record() {
        assert!(DeviceConfig::parse("monitor").is_err());
        assert!(DeviceConfig::parse("0x").is_err());
    }

    #[test]
    fn reject_zero_address() {
        assert_eq!(
            DeviceConfig::parse("0x0").unwrap_err(),
            "the monitor base address is zero"
        );
    }

    #[test]
    fn reject_overflowing_address() {
        assert!(DeviceConfig::parse("1ffffffffffffffff").is_err());
    }

    #[test]
    fn load_missing_file_is_a_config_error() {
        let missing = Path::new("/nonexistent/config_sesam");
        let err = DeviceConfig::load(missing).unwrap_err();
        assert!(matches!(err, SesamError::Config { ref path, .. } if path == missing));
        assert!(err.remediation().is_some());
    }

    #[test]
    fn load_reads_the_record() {
        let path = std::env::temp_dir().join(format!("sesam-config-{}", std::process::id()));
        std::fs::write(&path, "0x17000000\n").unwrap();
        let config = DeviceConfig::load(&path).unwrap();
        assert_eq!(config.base_address, 0x1700_0000);
        std::fs::remove_file(&path).unwrap();
    }
}

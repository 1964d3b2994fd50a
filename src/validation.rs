//! Validation of CLI arguments before they reach the launcher.

use anyhow::{bail, Result};
use std::time::Duration;

use crate::config::Mode;

/// Upper bound on ranks per job; each rank is a process plus its checkpoints.
pub const MAX_RANKS: u32 = 1024;

/// Validates a rank count for `run -n`.
pub fn validate_rank_count(n: u32) -> Result<()> {
    if n == 0 {
        bail!("Rank count must be at least 1");
    }
    if n > MAX_RANKS {
        bail!("Rank count {n} exceeds the maximum of {MAX_RANKS}");
    }
    Ok(())
}

/// Parses a timeout in seconds; fractions are allowed.
pub fn parse_timeout(s: &str) -> Result<Duration> {
    let secs: f64 = match s.trim().parse() {
        Ok(v) => v,
        Err(_) => bail!("Timeout must be a number of seconds, got '{s}'"),
    };
    if !secs.is_finite() || secs <= 0.0 {
        bail!("Timeout must be a positive number of seconds");
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Clap value parser for `-n`.
pub fn clap_rank_count_validator(s: &str) -> Result<u32, String> {
    let n: u32 = s.parse().map_err(|_| format!("'{s}' is not a rank count"))?;
    validate_rank_count(n).map_err(|e| e.to_string())?;
    Ok(n)
}

/// Clap value parser for `--timeout`.
pub fn clap_timeout_validator(s: &str) -> Result<Duration, String> {
    parse_timeout(s).map_err(|e| e.to_string())
}

/// Clap value parser for `--mode`.
pub fn clap_mode_validator(s: &str) -> Result<Mode, String> {
    s.parse().map_err(|e: crate::error::ConfigError| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_count_bounds() {
        assert!(validate_rank_count(1).is_ok());
        assert!(validate_rank_count(MAX_RANKS).is_ok());
        assert!(validate_rank_count(0).is_err());
        assert!(validate_rank_count(MAX_RANKS + 1).is_err());
    }

    #[test]
    fn test_clap_rank_count_validator() {
        assert_eq!(clap_rank_count_validator("4"), Ok(4));
        assert!(clap_rank_count_validator("four").is_err());
        assert!(clap_rank_count_validator("-1").is_err());
        assert!(clap_rank_count_validator("0").is_err());
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_timeout("0.5").unwrap(), Duration::from_millis(500));
        assert!(parse_timeout("0").is_err());
        assert!(parse_timeout("-3").is_err());
        assert!(parse_timeout("soon").is_err());
        assert!(parse_timeout("inf").is_err());
    }

    #[test]
    fn test_clap_mode_validator() {
        assert_eq!(clap_mode_validator("trace-only"), Ok(Mode::TraceOnly));
        assert_eq!(clap_mode_validator("Checkpoint"), Ok(Mode::Checkpoint));
        let err = clap_mode_validator("bogus").unwrap_err();
        assert!(err.contains("bogus"));
    }
}

/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Pure conversions for the textual size and rate values carried by a
//! workload request.
//!
//! Both the orchestrator (to build iperf arguments) and the estimator (to
//! match historical bitrates and size the transfer) consume the parsed values,
//! so the parsing happens exactly once, at enqueue time.
//!
//! | Input | Function | Result |
//! |---|---|---|
//! | `"200K"` | [`parse_size_to_bytes`] | `204_800` |
//! | `"1G"` | [`parse_size_to_bytes`] | `1_073_741_824` |
//! | `"2.4M"` | [`parse_bandwidth_to_mbps`] | `2.4` |
//! | `"200K"` | [`parse_bandwidth_to_mbps`] | `0.2` |

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Binary multiple used for data amounts (`K` = 1024 bytes).
const BINARY_KILO: f64 = 1024.0;

/// Decimal multiple used for rates (`K` = 1000 bits/sec).
const DECIMAL_KILO: f64 = 1000.0;

static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]*\.?[0-9]+)\s*([kmg]?)b?$").expect("size pattern is valid")
});

static RATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]*\.?[0-9]+)\s*([kmg]?)$").expect("rate pattern is valid")
});

/// Which kind of quantity failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Size,
    Bandwidth,
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Quantity::Size => f.write_str("size"),
            Quantity::Bandwidth => f.write_str("bandwidth"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnitError {
    /// The string does not match `<number>[unit]`.
    #[error("invalid {quantity} format: '{input}'")]
    InvalidFormat { quantity: Quantity, input: String },
}

impl UnitError {
    fn invalid(quantity: Quantity, input: &str) -> Self {
        UnitError::InvalidFormat {
            quantity,
            input: input.to_string(),
        }
    }
}

/// Convert a size string such as `"200K"`, `"5M"`, `"1G"`, `"200 kb"` or
/// `"1024"` into bytes.
///
/// Case-insensitive and whitespace tolerant.  Units are binary (1024-based);
/// a bare number is bytes.  Fractional results are truncated; values that do
/// not fit in a `u64` are rejected.
pub fn parse_size_to_bytes(input: &str) -> Result<u64, UnitError> {
    let normalised = input.trim().to_ascii_lowercase();
    let caps = SIZE_RE
        .captures(&normalised)
        .ok_or_else(|| UnitError::invalid(Quantity::Size, input))?;

    let value: f64 = caps[1]
        .parse()
        .map_err(|_| UnitError::invalid(Quantity::Size, input))?;

    let multiplier = match &caps[2] {
        "k" => BINARY_KILO,
        "m" => BINARY_KILO.powi(2),
        "g" => BINARY_KILO.powi(3),
        _ => 1.0,
    };

    let bytes = value * multiplier;
    // `u64::MAX as f64` rounds up to 2^64, so equality is already out of range.
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(UnitError::invalid(Quantity::Size, input));
    }
    Ok(bytes as u64)
}

/// Convert an iperf-style bandwidth string such as `"2.4M"`, `"200K"` or
/// `"1G"` into Mbps.  A bare number is taken to already be in Mbps.
pub fn parse_bandwidth_to_mbps(input: &str) -> Result<f64, UnitError> {
    let normalised = input.trim().to_ascii_lowercase();
    let caps = RATE_RE
        .captures(&normalised)
        .ok_or_else(|| UnitError::invalid(Quantity::Bandwidth, input))?;

    let value: f64 = caps[1]
        .parse()
        .map_err(|_| UnitError::invalid(Quantity::Bandwidth, input))?;

    let mbps = match &caps[2] {
        "k" => value / DECIMAL_KILO,
        "g" => value * DECIMAL_KILO,
        _ => value,
    };
    if !mbps.is_finite() {
        return Err(UnitError::invalid(Quantity::Bandwidth, input));
    }
    Ok(mbps)
}

/// Bytes expressed in binary megabytes (MiB), the unit reported as
/// `data_amount_mb` on an execution result.
pub fn bytes_to_mib(bytes: u64) -> f64 {
    bytes as f64 / BINARY_KILO.powi(2)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    // ── parse_size_to_bytes ───────────────────────────────────────────────────

    #[test]
    fn size_binary_units() {
        assert_eq!(parse_size_to_bytes("200K").unwrap(), 204_800);
        assert_eq!(parse_size_to_bytes("5M").unwrap(), 5 * 1024 * 1024);
        assert_eq!(parse_size_to_bytes("1G").unwrap(), 1_073_741_824);
    }

    #[test]
    fn size_bare_number_is_bytes() {
        assert_eq!(parse_size_to_bytes("1024").unwrap(), 1024);
        assert_eq!(parse_size_to_bytes("200").unwrap(), 200);
    }

    #[test]
    fn size_is_case_and_space_insensitive() {
        assert_eq!(parse_size_to_bytes(" 200 k ").unwrap(), 204_800);
        assert_eq!(parse_size_to_bytes("200KB").unwrap(), 204_800);
        assert_eq!(parse_size_to_bytes("50m").unwrap(), 52_428_800);
    }

    #[test]
    fn size_fractional_value_is_truncated() {
        assert_eq!(parse_size_to_bytes("1.5K").unwrap(), 1536);
        assert_eq!(parse_size_to_bytes("0.5").unwrap(), 0);
    }

    #[test]
    fn size_invalid_input_is_rejected() {
        for bad in ["abc", "", "12X", "1.2.3M", "M", "-5M"] {
            let err = parse_size_to_bytes(bad).unwrap_err();
            assert!(
                matches!(
                    err,
                    UnitError::InvalidFormat {
                        quantity: Quantity::Size,
                        ..
                    }
                ),
                "'{bad}' should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn size_beyond_u64_is_rejected() {
        assert!(parse_size_to_bytes("99999999999G").is_err());
        assert!(parse_size_to_bytes(&"9".repeat(400)).is_err());
        // 16 EiB is exactly 2^64 bytes.
        assert!(parse_size_to_bytes("17179869184G").is_err());
        assert_eq!(parse_size_to_bytes("17179869183G").unwrap(), 17_179_869_183 << 30);
    }

    // ── parse_bandwidth_to_mbps ───────────────────────────────────────────────

    #[test]
    fn bandwidth_units_normalise_to_mbps() {
        assert!(approx(parse_bandwidth_to_mbps("2.4M").unwrap(), 2.4));
        assert!(approx(parse_bandwidth_to_mbps("200K").unwrap(), 0.2));
        assert!(approx(parse_bandwidth_to_mbps("1G").unwrap(), 1000.0));
    }

    #[test]
    fn bandwidth_bare_number_is_mbps() {
        assert!(approx(parse_bandwidth_to_mbps("2.4").unwrap(), 2.4));
        assert!(approx(parse_bandwidth_to_mbps(" 10 m").unwrap(), 10.0));
    }

    #[test]
    fn bandwidth_rejects_byte_suffix_and_garbage() {
        for bad in ["2.4MB", "fast", "", "1e3M"] {
            assert!(
                parse_bandwidth_to_mbps(bad).is_err(),
                "'{bad}' should be rejected"
            );
        }
    }

    #[test]
    fn bandwidth_overflowing_to_infinity_is_rejected() {
        let huge = "9".repeat(400);
        assert_eq!(
            parse_bandwidth_to_mbps(&huge).unwrap_err(),
            UnitError::InvalidFormat {
                quantity: Quantity::Bandwidth,
                input: huge.clone(),
            }
        );
        assert!(parse_bandwidth_to_mbps(&format!("{huge}G")).is_err());
    }

    #[test]
    fn error_message_names_quantity_and_input() {
        let err = parse_bandwidth_to_mbps("fast").unwrap_err();
        assert_eq!(err.to_string(), "invalid bandwidth format: 'fast'");
    }

    // ── bytes_to_mib ──────────────────────────────────────────────────────────

    #[test]
    fn bytes_to_mib_uses_binary_megabytes() {
        assert!(approx(bytes_to_mib(52_428_800), 50.0));
        assert!(approx(bytes_to_mib(0), 0.0));
    }
}

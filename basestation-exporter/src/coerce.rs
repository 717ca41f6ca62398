//! Conversion of string telemetry fields into numeric sample values.
//!
//! The device sends every field as a string and there is no schema telling
//! which ones are hex identifiers and which are decimal measurements. The
//! class of the *first* character decides for the whole string:
//!
//! - an ASCII decimal digit: parse the string as a decimal float (`"12.5"` -> `12.5`)
//! - anything else: parse the string as a base-16 signed integer (`"AA"` -> `170`)
//!
//! A hex value starting with a digit (`"1A"`) therefore lands on the decimal
//! path and fails, and a leading space or sign also selects the hex path.

use std::num::{ParseFloatError, ParseIntError};

use thiserror::Error;
use tracing::warn;

/// Coercion errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoerceError {
    #[error("invalid hex value {input:?}: {source}")]
    Hex {
        input: String,
        #[source]
        source: ParseIntError,
    },
    #[error("invalid decimal value {input:?}: {source}")]
    Decimal {
        input: String,
        #[source]
        source: ParseFloatError,
    },
    #[error("decimal value {input:?} out of range")]
    Range { input: String },
}

/// Coerce a telemetry string into a number, reporting parse failures.
///
/// The empty string yields `0.0`.
pub fn try_coerce(input: &str) -> Result<f64, CoerceError> {
    let Some(first) = input.chars().next() else {
        return Ok(0.0);
    };

    if first.is_ascii_digit() {
        let value = input
            .parse::<f64>()
            .map_err(|source| CoerceError::Decimal {
                input: input.to_string(),
                source,
            })?;

        // Overflow parses as infinity; treat it as a failed parse.
        if value.is_finite() {
            Ok(value)
        } else {
            Err(CoerceError::Range {
                input: input.to_string(),
            })
        }
    } else {
        i64::from_str_radix(input, 16)
            .map(|v| v as f64)
            .map_err(|source| CoerceError::Hex {
                input: input.to_string(),
                source,
            })
    }
}

/// Coerce a telemetry string into a number.
///
/// Never fails: a malformed value is logged and exported as `0.0`.
pub fn coerce(input: &str) -> f64 {
    match try_coerce(input) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Convert error");
            0.0
        }
    }
}

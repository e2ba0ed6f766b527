//! # Reading Validation
//!
//! One decoded line either becomes a [`Reading`] or is rejected with a
//! typed reason. Rejection is the expected path under line noise, so it
//! carries no side effects; the next line is simply the next attempt.

use crate::Reading;
use thiserror::Error;

/// Separates the current-force field from the device-max field on the wire.
pub const FIELD_SEPARATOR: char = '@';

/// Why a line was rejected. The `Display` text is what reaches the
/// observability hook.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("no field separator")]
    MissingSeparator,
    #[error("more than one field separator")]
    ExtraSeparator,
    #[error("unparsable number: {0:?}")]
    BadNumber(String),
    #[error("non-finite value: {0:?}")]
    NonFinite(String),
}

/// Validate one decoded line into a [`Reading`].
///
/// Accepts exactly `<current>@<max>` with both fields finite decimals.
/// Negative values pass: a garbled-but-parsable line is data as far as the
/// wire is concerned; NaN and infinities never do.
pub fn parse_reading(line: &str) -> Result<Reading, ParseError> {
    let line = line.trim();

    let Some((current, max)) = line.split_once(FIELD_SEPARATOR) else {
        return Err(ParseError::MissingSeparator);
    };
    if max.contains(FIELD_SEPARATOR) {
        return Err(ParseError::ExtraSeparator);
    }

    Ok(Reading {
        current: parse_field(current)?,
        max: parse_field(max)?,
    })
}

fn parse_field(field: &str) -> Result<f64, ParseError> {
    let value: f64 = field
        .parse()
        .map_err(|_| ParseError::BadNumber(field.to_string()))?;
    if !value.is_finite() {
        return Err(ParseError::NonFinite(field.to_string()));
    }
    Ok(value)
}

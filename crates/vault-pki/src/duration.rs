//! Backend duration strings.
//!
//! The backend accepts durations such as `"87600h"`, `"30m"`, `"45s"` or
//! `"1h30m"`. Rendering always picks the largest unit that represents the
//! value exactly, so `Duration::from_secs(87600 * 3600)` becomes `"87600h"`.

use std::time::Duration;

use crate::error::{Error, Result};

/// Renders a duration as a backend duration string.
///
/// Sub-second precision is dropped.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs != 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// Parses a backend duration string.
///
/// Accepts bare seconds (`"300"`) or a sequence of `<number><unit>` segments
/// with units `h`, `m`, `s` and `ms` (`"1h30m"`, `"250ms"`).
///
/// # Errors
///
/// Returns `InvalidRequest` for empty input, unknown units, or overflow.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::invalid_request("duration cannot be empty"));
    }

    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total_ms: u64 = 0;
    let mut digits = String::new();
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let (unit, millis) = match ch {
            'h' => ("h", 3_600_000),
            'm' if chars.next_if_eq(&'s').is_some() => ("ms", 1),
            'm' => ("m", 60_000),
            's' => ("s", 1_000),
            other => {
                return Err(Error::invalid_request(format!(
                    "invalid duration '{input}': unknown unit '{other}'"
                )));
            }
        };
        if digits.is_empty() {
            return Err(Error::invalid_request(format!(
                "invalid duration '{input}': unit '{unit}' without a number"
            )));
        }
        let value: u64 = digits
            .parse()
            .map_err(|e| Error::invalid_request(format!("invalid duration '{input}': {e}")))?;
        total_ms = value
            .checked_mul(millis)
            .and_then(|segment| total_ms.checked_add(segment))
            .ok_or_else(|| Error::invalid_request(format!("duration '{input}' overflows")))?;
        digits.clear();
    }

    if !digits.is_empty() {
        return Err(Error::invalid_request(format!(
            "invalid duration '{input}': trailing number without a unit"
        )));
    }

    Ok(Duration::from_millis(total_ms))
}

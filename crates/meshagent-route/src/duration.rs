//! Ejection-interval parsing
//!
//! Intervals are written Go-style (`10s`, `1m30s`, `500ms`, `1h`) and are
//! emitted the way Istio expects protobuf durations: whole seconds as `Ns`,
//! anything finer as `Nms`.

use std::time::Duration;

/// Parse a compound duration such as `1m30s` or `250ms`.
///
/// Every component needs a unit (`h`, `m`, `s`, `ms`); a bare number is
/// rejected, as is a zero total.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let input = s.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return Err(format!("invalid duration '{}': expected a number", input));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid duration '{}': number out of range", input))?;
        rest = &rest[digits..];

        let unit_len = rest.chars().take_while(|c| c.is_ascii_alphabetic()).count();
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let part = match unit {
            "h" => Duration::from_secs(value.saturating_mul(3600)),
            "m" => Duration::from_secs(value.saturating_mul(60)),
            "s" => Duration::from_secs(value),
            "ms" => Duration::from_millis(value),
            "" => return Err(format!("invalid duration '{}': missing unit", input)),
            other => {
                return Err(format!(
                    "invalid duration '{}': unknown unit '{}', expected h, m, s or ms",
                    input, other
                ))
            }
        };
        total = total.saturating_add(part);
    }

    if total.is_zero() {
        return Err(format!("invalid duration '{}': must be positive", input));
    }
    Ok(total)
}

/// Format a duration for Istio (`30s`, `1500ms`)
pub fn format_duration(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

/// Parse then re-format, normalizing `1m30s` to `90s`
pub fn normalize_duration(s: &str) -> Result<String, String> {
    parse_duration(s).map(format_duration)
}

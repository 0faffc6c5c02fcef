//! Short duration strings (`30s`, `5m`, `1h`, `7d`) as used by range
//! deletes and Flux relative ranges.

use std::time::Duration;

/// Parses `<n><unit>` with unit `s`, `m`, `h` or `d`.
///
/// # Errors
///
/// Returns a message naming the rejected input.
pub fn parse_range(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("range `{input}` has no unit (use s, m, h or d)"))?;
    let (digits, unit) = input.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("range `{input}` must start with a positive integer"))?;
    if amount == 0 {
        return Err(format!("range `{input}` must be > 0"));
    }
    let secs = match unit {
        "s" => amount,
        "m" => amount * 60,
        "h" => amount * 3_600,
        "d" => amount * 86_400,
        other => return Err(format!("unsupported range unit `{other}` in `{input}`")),
    };
    Ok(Duration::from_secs(secs))
}

/// Renders a duration with the largest whole unit, e.g. `3600s` -> `1h`.
#[must_use]
pub fn format_range(duration: Duration) -> String {
    let secs = duration.as_secs().max(1);
    if secs % 86_400 == 0 {
        format!("{}d", secs / 86_400)
    } else if secs % 3_600 == 0 {
        format!("{}h", secs / 3_600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

use chrono::Duration;

use crate::{Result, VpsError};

/// Parses a duration string like `30s`, `5m`, `3h`, `1d`, `2M`, `1y`.
/// A bare number is taken as days.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(VpsError::InvalidTimeFormat(input.to_string()));
    }

    if let Ok(days) = input.parse::<i64>() {
        return Ok(Duration::days(days));
    }

    let (digits, unit) = input.split_at(input.len() - 1);
    let value: i64 = digits
        .parse()
        .map_err(|_| VpsError::InvalidTimeFormat(input.to_string()))?;

    let seconds = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "M" => 2_592_000,
        "y" => 31_536_000,
        _ => return Err(VpsError::InvalidTimeFormat(input.to_string())),
    };

    Ok(Duration::seconds(value * seconds))
}

/// Parses a unit-suffixed memory quantity ("512m", "2g") into bytes.
/// A bare number is taken as bytes.
pub fn parse_mem_bytes(input: &str) -> Result<i64> {
    let input = input.trim();
    if input.is_empty() {
        return Err(VpsError::InvalidTimeFormat(input.to_string()));
    }

    if let Ok(bytes) = input.parse::<i64>() {
        return Ok(bytes);
    }

    let (digits, unit) = input.split_at(input.len() - 1);
    let value: i64 = digits
        .parse()
        .map_err(|_| VpsError::InvalidTimeFormat(input.to_string()))?;

    let multiplier = match unit {
        "k" | "K" => 1_024,
        "m" | "M" => 1_024 * 1_024,
        "g" | "G" => 1_024 * 1_024 * 1_024,
        _ => return Err(VpsError::InvalidTimeFormat(input.to_string())),
    };

    Ok(value * multiplier)
}

/// Parses a CPU count ("1", "0.5") into Docker nano-CPU units.
pub fn parse_cpu_nanos(input: &str) -> Result<i64> {
    let cores: f64 = input
        .trim()
        .parse()
        .map_err(|_| VpsError::InvalidTimeFormat(input.to_string()))?;
    if !cores.is_finite() || cores <= 0.0 {
        return Err(VpsError::InvalidTimeFormat(input.to_string()));
    }
    Ok((cores * 1_000_000_000.0) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::seconds(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::minutes(5));
        assert_eq!(parse_duration("3h").unwrap(), Duration::hours(3));
        assert_eq!(parse_duration("1d").unwrap(), Duration::days(1));
        assert_eq!(parse_duration("2M").unwrap(), Duration::seconds(2 * 2_592_000));
        assert_eq!(parse_duration("1y").unwrap(), Duration::seconds(31_536_000));
    }

    #[test]
    fn test_bare_number_means_days() {
        assert_eq!(parse_duration("7").unwrap(), Duration::days(7));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for bad in ["", "d", "1w", "abc", "-"] {
            assert!(
                matches!(parse_duration(bad), Err(VpsError::InvalidTimeFormat(_))),
                "expected rejection for {bad:?}"
            );
        }
    }

    #[test]
    fn test_parse_mem_bytes() {
        assert_eq!(parse_mem_bytes("2g").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_mem_bytes("512m").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_mem_bytes("1024").unwrap(), 1024);
        assert!(parse_mem_bytes("2t").is_err());
    }

    #[test]
    fn test_parse_cpu_nanos() {
        assert_eq!(parse_cpu_nanos("1").unwrap(), 1_000_000_000);
        assert_eq!(parse_cpu_nanos("0.5").unwrap(), 500_000_000);
        assert!(parse_cpu_nanos("zero").is_err());
        assert!(parse_cpu_nanos("-1").is_err());
    }
}

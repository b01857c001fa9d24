//! Bandwidth strings and human byte sizes

use crate::{PipeError, PipeResult};

const SI_UNITS: [&str; 7] = ["B", "kB", "MB", "GB", "TB", "PB", "EB"];

/// Parse a bandwidth cap of the form `<size>/s` or `<size>ps` (e.g. `10MBps`, `1KB/s`).
///
/// The empty string means unlimited and parses to 0.
pub fn parse_bandwidth(input: &str) -> PipeResult<u64> {
    if input.is_empty() {
        return Ok(0);
    }

    let invalid = || PipeError::InvalidBandwidth(input.to_string());
    let bytes = input.as_bytes();
    if bytes.len() < 4 {
        return Err(invalid());
    }
    if bytes[bytes.len() - 1] != b's' {
        return Err(invalid());
    }
    if !matches!(bytes[bytes.len() - 2], b'/' | b'p') {
        return Err(invalid());
    }

    parse_bytes(&input[..input.len() - 2]).map_err(|_| invalid())
}

/// Parse a human byte size such as `10MB`, `1.5 KiB` or `512`.
///
/// Decimal units (`kB`, `MB`, ...) are powers of 1000, binary units
/// (`KiB`, `MiB`, ...) powers of 1024. Units are case-insensitive.
pub fn parse_bytes(input: &str) -> PipeResult<u64> {
    let invalid = || PipeError::InvalidBandwidth(input.to_string());

    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let number: f64 = number.replace(',', "").parse().map_err(|_| invalid())?;
    let multiplier = unit_multiplier(&unit.trim().to_ascii_lowercase()).ok_or_else(invalid)?;

    let value = number * multiplier as f64;
    if !value.is_finite() || value >= u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(value as u64)
}

fn unit_multiplier(unit: &str) -> Option<u64> {
    const K: u64 = 1000;
    const KI: u64 = 1024;
    let multiplier = match unit {
        "" | "b" => 1,
        "k" | "kb" => K,
        "ki" | "kib" => KI,
        "m" | "mb" => K.pow(2),
        "mi" | "mib" => KI.pow(2),
        "g" | "gb" => K.pow(3),
        "gi" | "gib" => KI.pow(3),
        "t" | "tb" => K.pow(4),
        "ti" | "tib" => KI.pow(4),
        "p" | "pb" => K.pow(5),
        "pi" | "pib" => KI.pow(5),
        "e" | "eb" => K.pow(6),
        "ei" | "eib" => KI.pow(6),
        _ => return None,
    };
    Some(multiplier)
}

/// Format a byte count with SI units, e.g. `10 MB` or `1.5 kB`
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 10 {
        return format!("{} B", bytes);
    }

    let mut exponent = 0;
    let mut divisor: u64 = 1;
    while bytes / divisor >= 1000 && exponent < SI_UNITS.len() - 1 {
        divisor *= 1000;
        exponent += 1;
    }

    let value = (bytes as f64 / divisor as f64 * 10.0 + 0.5).floor() / 10.0;
    if value < 10.0 {
        format!("{:.1} {}", value, SI_UNITS[exponent])
    } else {
        format!("{:.0} {}", value, SI_UNITS[exponent])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bandwidth_suffixes() {
        assert_eq!(parse_bandwidth("10MBps").unwrap(), 10_000_000);
        assert_eq!(parse_bandwidth("1KB/s").unwrap(), 1_000);
        assert_eq!(parse_bandwidth("1Kbps").unwrap(), 1_000);
        assert_eq!(parse_bandwidth("1GB/s").unwrap(), 1_000_000_000);
        assert_eq!(parse_bandwidth("2MiB/s").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_bandwidth("100Bps").unwrap(), 100);
    }

    #[test]
    fn test_parse_bandwidth_empty_is_unlimited() {
        assert_eq!(parse_bandwidth("").unwrap(), 0);
    }

    #[test]
    fn test_parse_bandwidth_rejects_malformed() {
        for input in ["10MB", "1/s", "abc", "10MB/x", "10MBpx", "xxMBps", "10QBps"] {
            assert!(
                matches!(parse_bandwidth(input), Err(PipeError::InvalidBandwidth(_))),
                "{:?} should be rejected",
                input
            );
        }
    }

    #[test]
    fn test_parse_bytes_units() {
        assert_eq!(parse_bytes("512").unwrap(), 512);
        assert_eq!(parse_bytes("1.5 kB").unwrap(), 1_500);
        assert_eq!(parse_bytes("1KiB").unwrap(), 1_024);
        assert_eq!(parse_bytes("1,000 B").unwrap(), 1_000);
        assert_eq!(parse_bytes("3m").unwrap(), 3_000_000);
        assert!(parse_bytes("").is_err());
        assert!(parse_bytes("MB").is_err());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(9), "9 B");
        assert_eq!(format_bytes(82), "82 B");
        assert_eq!(format_bytes(1_000), "1.0 kB");
        assert_eq!(format_bytes(1_500), "1.5 kB");
        assert_eq!(format_bytes(10_000_000), "10 MB");
        assert_eq!(format_bytes(1_000_000_000), "1.0 GB");
    }
}

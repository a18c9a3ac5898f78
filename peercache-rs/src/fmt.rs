//! Provides parsing and formatting helpers for byte sizes and durations.
//!
//! Sizes and durations in the config (e.g. `max_memory: 64m` or `timeout: 5s`) are parsed using
//! these helpers. The formatting functions are used when reporting metrics.
use std::fmt::Write;
use std::time::Duration;

use anyhow::Context;
use yaml_rust::Yaml;

const SIZE_UNITS: [&str; 6] = ["Bytes", "KiB", "MiB", "GiB", "TiB", "PiB"];

/// Writes a duration given in microseconds using the most concise unit.
///
/// # Examples
///
/// ```
/// # use peercache::fmt::format_micros;
/// let mut result = String::new();
/// format_micros(8_192, &mut result).unwrap();
/// assert_eq!(result, "8.19 ms");
/// ```
pub fn format_micros(micros: i32, f: &mut dyn std::fmt::Write) -> std::fmt::Result {
    match micros {
        0..=999 => write!(f, "{} us", micros),
        1_000..=9_999 => write!(f, "{:.2} ms", micros as f32 / 1_000.),
        10_000..=99_999 => write!(f, "{:.1} ms", micros as f32 / 1_000.),
        100_000..=999_999 => write!(f, "{} ms", micros / 1_000),
        1_000_000..=9_999_999 => write!(f, "{:.2} s", micros as f32 / 1_000_000.),
        10_000_000..=99_999_999 => write!(f, "{:.1} s", micros as f32 / 1_000_000.),
        _ => write!(f, "{} s", micros / 1_000_000),
    }
}

/// Formats a given size in bytes using the most concise unit.
///
/// # Examples
///
/// ```
/// assert_eq!(peercache::fmt::format_size(0), "0 bytes");
/// assert_eq!(peercache::fmt::format_size(1), "1 byte");
/// assert_eq!(peercache::fmt::format_size(100), "100 bytes");
/// assert_eq!(peercache::fmt::format_size(8_734), "8.53 KiB");
/// assert_eq!(peercache::fmt::format_size(87_340), "85.3 KiB");
/// assert_eq!(peercache::fmt::format_size(873_400), "853 KiB");
/// assert_eq!(peercache::fmt::format_size(8_734_000), "8.33 MiB");
/// assert_eq!(peercache::fmt::format_size(8_734_000_000), "8.13 GiB");
/// ```
pub fn format_size(size_in_bytes: usize) -> String {
    match size_in_bytes {
        1 => return "1 byte".to_owned(),
        0..=1023 => return format!("{} bytes", size_in_bytes),
        _ => (),
    }

    let mut magnitude = 0;
    let mut size = size_in_bytes as f32;
    while size > 1024. && magnitude < SIZE_UNITS.len() - 1 {
        size /= 1024.;
        magnitude += 1;
    }

    let mut result = String::new();
    let _ = if size <= 10. {
        write!(result, "{:.2} {}", size, SIZE_UNITS[magnitude])
    } else if size <= 100. {
        write!(result, "{:.1} {}", size, SIZE_UNITS[magnitude])
    } else {
        write!(result, "{:.0} {}", size, SIZE_UNITS[magnitude])
    };

    result
}

/// Parses a size from a given string.
///
/// This string can have the following suffixes:
/// * **b** or **B**: the value is given in bytes (same as no suffix)
/// * **k** or **K**: treats the value as KiB
/// * **m** or **M**: treats the value as MiB
/// * **g** or **G**: treats the value as GiB
/// * **t** or **T**: treats the value as TiB
///
/// # Examples
///
/// ```
/// assert_eq!(peercache::fmt::parse_size("100").unwrap(), 100);
/// assert_eq!(peercache::fmt::parse_size("100b").unwrap(), 100);
/// assert_eq!(peercache::fmt::parse_size("8k").unwrap(), 8192);
/// assert_eq!(peercache::fmt::parse_size("64 M").unwrap(), 64 * 1024 * 1024);
///
/// // Invalid suffixes, decimal or negative numbers result in an error...
/// assert_eq!(peercache::fmt::parse_size("3 Y").is_err(), true);
/// assert_eq!(peercache::fmt::parse_size("1.2g").is_err(), true);
/// assert_eq!(peercache::fmt::parse_size("-1").is_err(), true);
/// ```
pub fn parse_size(str: impl AsRef<str>) -> anyhow::Result<usize> {
    lazy_static::lazy_static! {
        static ref NUMBER_AND_SUFFIX: regex::Regex =
            regex::Regex::new(r"^ *(\d+) *([bBkKmMgGtT]?) *$").unwrap();
    }

    let captures = NUMBER_AND_SUFFIX.captures(str.as_ref()).ok_or_else(|| {
        anyhow::anyhow!(
            "Cannot parse '{}' into a size expression. \
             Expected a positive number and optionally 'b', 'k', 'm', 'g' or 't' as suffix.",
            str.as_ref()
        )
    })?;

    let number = captures[1]
        .parse::<usize>()
        .with_context(|| format!("Size '{}' is out of range.", str.as_ref()))?;
    let exponent = match &captures[2] {
        "k" | "K" => 1,
        "m" | "M" => 2,
        "g" | "G" => 3,
        "t" | "T" => 4,
        _ => 0,
    };

    number
        .checked_mul(1024_usize.pow(exponent))
        .ok_or_else(|| anyhow::anyhow!("Size '{}' is out of range.", str.as_ref()))
}

/// Parses a duration from a given string.
///
/// This string can have the following suffixes:
/// * **ms** or **MS**: treats the value as milliseconds (same as no suffix)
/// * **s** or **S**: treats the value as seconds
/// * **m** or **M**: treats the value as minutes
/// * **h** or **H**: treats the value as hours
/// * **d** or **D**: treats the value as days
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// assert_eq!(peercache::fmt::parse_duration("100 ms").unwrap(), Duration::from_millis(100));
/// assert_eq!(peercache::fmt::parse_duration("5s").unwrap(), Duration::from_secs(5));
/// assert_eq!(peercache::fmt::parse_duration("3 M").unwrap(), Duration::from_secs(3 * 60));
/// assert_eq!(peercache::fmt::parse_duration("1.2s").is_err(), true);
/// ```
pub fn parse_duration(str: impl AsRef<str>) -> anyhow::Result<Duration> {
    lazy_static::lazy_static! {
        static ref NUMBER_AND_SUFFIX: regex::Regex =
            regex::Regex::new(r"^ *(\d+) *((ms|s|m|h|d|MS|S|M|H|D)?) *$").unwrap();
    }

    let captures = NUMBER_AND_SUFFIX.captures(str.as_ref()).ok_or_else(|| {
        anyhow::anyhow!(
            "Cannot parse '{}' into a duration expression. \
             Expected a positive number and optionally 'ms', 's', 'm', 'h' or 'd' as suffix.",
            str.as_ref()
        )
    })?;

    let number = captures[1]
        .parse::<u64>()
        .with_context(|| format!("Duration '{}' is out of range.", str.as_ref()))?;
    Ok(match &captures[2] {
        "s" | "S" => Duration::from_secs(number),
        "m" | "M" => Duration::from_secs(number * 60),
        "h" | "H" => Duration::from_secs(number * 60 * 60),
        "d" | "D" => Duration::from_secs(number * 60 * 60 * 24),
        _ => Duration::from_millis(number),
    })
}

/// Reads a size setting which is either given as plain number of bytes or as size expression.
///
/// Returns the given default if the setting is absent.
///
/// # Examples
///
/// ```
/// # use yaml_rust::Yaml;
/// # use peercache::fmt::size_setting;
/// assert_eq!(size_setting(&Yaml::Integer(512), 0).unwrap(), 512);
/// assert_eq!(size_setting(&Yaml::String("2k".to_owned()), 0).unwrap(), 2048);
/// assert_eq!(size_setting(&Yaml::BadValue, 42).unwrap(), 42);
/// assert_eq!(size_setting(&Yaml::Integer(-1), 0).is_err(), true);
/// ```
pub fn size_setting(value: &Yaml, default_value: usize) -> anyhow::Result<usize> {
    match value {
        Yaml::BadValue | Yaml::Null => Ok(default_value),
        Yaml::Integer(number) => usize::try_from(*number)
            .map_err(|_| anyhow::anyhow!("A size must not be negative (found {}).", number)),
        Yaml::String(expression) => parse_size(expression),
        other => Err(anyhow::anyhow!(
            "Expected a size expression but found {:?}.",
            other
        )),
    }
}

/// Reads a duration setting which is either given in milliseconds or as duration expression.
///
/// Returns the given default if the setting is absent.
pub fn duration_setting(value: &Yaml, default_value: Duration) -> anyhow::Result<Duration> {
    match value {
        Yaml::BadValue | Yaml::Null => Ok(default_value),
        Yaml::Integer(millis) => u64::try_from(*millis)
            .map(Duration::from_millis)
            .map_err(|_| anyhow::anyhow!("A duration must not be negative (found {}).", millis)),
        Yaml::String(expression) => parse_duration(expression),
        other => Err(anyhow::anyhow!(
            "Expected a duration expression but found {:?}.",
            other
        )),
    }
}

#[cfg(test)]
mod tests {
    use crate::fmt::{duration_setting, format_micros, parse_size};
    use std::time::Duration;
    use yaml_rust::Yaml;

    #[test]
    fn micros_are_formatted_concisely() {
        let format = |micros| {
            let mut result = String::new();
            format_micros(micros, &mut result).unwrap();
            result
        };

        assert_eq!(format(100), "100 us");
        assert_eq!(format(32_768), "32.8 ms");
        assert_eq!(format(128_123), "128 ms");
        assert_eq!(format(1_128_123), "1.13 s");
        assert_eq!(format(101_000_000), "101 s");
    }

    #[test]
    fn oversized_sizes_are_rejected() {
        assert_eq!(parse_size("99999999999999999999999").is_err(), true);
        assert_eq!(parse_size(format!("{}t", usize::MAX)).is_err(), true);
    }

    #[test]
    fn durations_settings_are_parsed() {
        let default_value = Duration::from_secs(5);
        assert_eq!(
            duration_setting(&Yaml::BadValue, default_value).unwrap(),
            default_value
        );
        assert_eq!(
            duration_setting(&Yaml::Integer(250), default_value).unwrap(),
            Duration::from_millis(250)
        );
        assert_eq!(
            duration_setting(&Yaml::String("2s".to_owned()), default_value).unwrap(),
            Duration::from_secs(2)
        );
        assert_eq!(
            duration_setting(&Yaml::Boolean(true), default_value).is_err(),
            true
        );
    }
}

//! Provides helpers to parse and format byte sizes.
//!
//! Cache sizes are specified in the system config like `max_memory: 64m` and reported in
//! log messages and statistics in a human readable form.
use std::fmt::Write;

/// Formats a given size in bytes into the given writer.
///
/// This function determines the ideal unit (ranging from bytes to petabytes) to provide
/// a concise representation. [format_size](format_size) directly returns a String.
pub fn format_bytes(size_in_bytes: usize, f: &mut dyn Write) -> std::fmt::Result {
    if size_in_bytes == 1 {
        return write!(f, "1 byte");
    } else if size_in_bytes < 1024 {
        return write!(f, "{} bytes", size_in_bytes);
    }

    let units = ["KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut unit = 0;
    let mut size = size_in_bytes as f64 / 1024.;
    while size >= 1024. && unit < units.len() - 1 {
        size /= 1024.;
        unit += 1;
    }

    if size < 10. {
        write!(f, "{:.2} {}", size, units[unit])
    } else if size < 100. {
        write!(f, "{:.1} {}", size, units[unit])
    } else {
        write!(f, "{:.0} {}", size, units[unit])
    }
}

/// Formats a given size in bytes.
///
/// # Examples
///
/// ```
/// assert_eq!(peercache::fmt::format_size(0), "0 bytes");
/// assert_eq!(peercache::fmt::format_size(1), "1 byte");
/// assert_eq!(peercache::fmt::format_size(100), "100 bytes");
/// assert_eq!(peercache::fmt::format_size(2048), "2.00 KiB");
/// assert_eq!(peercache::fmt::format_size(8_734), "8.53 KiB");
/// assert_eq!(peercache::fmt::format_size(87_340), "85.3 KiB");
/// assert_eq!(peercache::fmt::format_size(873_400), "853 KiB");
/// assert_eq!(peercache::fmt::format_size(64 * 1024 * 1024), "64.0 MiB");
/// ```
pub fn format_size(size_in_bytes: usize) -> String {
    let mut result = String::new();
    let _ = format_bytes(size_in_bytes, &mut result);

    result
}

/// Parses a size in bytes from a given string.
///
/// This string can have the following suffixes:
/// * **b** or **B**: treats the value as bytes (same as no suffix)
/// * **k** or **K**: treats the value as KiB
/// * **m** or **M**: treats the value as MiB
/// * **g** or **G**: treats the value as GiB
/// * **t** or **T**: treats the value as TiB
///
/// Returns an **Err** if either a non-integer value is given, if an unknown suffix was provided
/// or if the value doesn't fit into a **usize**.
///
/// # Examples
///
/// ```
/// assert_eq!(peercache::fmt::parse_size("0").unwrap(), 0);
/// assert_eq!(peercache::fmt::parse_size("100b").unwrap(), 100);
/// assert_eq!(peercache::fmt::parse_size("2k").unwrap(), 2048);
/// assert_eq!(peercache::fmt::parse_size("8 M").unwrap(), 8 * 1024 * 1024);
/// assert_eq!(peercache::fmt::parse_size(" 1g ").unwrap(), 1024 * 1024 * 1024);
///
/// // An invalid suffix results in an error...
/// assert_eq!(peercache::fmt::parse_size("3 Y").is_err(), true);
///
/// // Decimal or negative numbers result in an error...
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

    let number = captures[1].parse::<usize>()?;
    let factor: usize = match &captures[2] {
        "k" | "K" => 1 << 10,
        "m" | "M" => 1 << 20,
        "g" | "G" => 1 << 30,
        "t" | "T" => 1 << 40,
        _ => 1,
    };

    number
        .checked_mul(factor)
        .ok_or_else(|| anyhow::anyhow!("The size '{}' is too large.", str.as_ref()))
}

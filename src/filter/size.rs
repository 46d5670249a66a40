use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SizeError {
    #[error("Unparsable size: {0:?}")]
    UnparsableSize(String),
}

/// Parses a human-readable size ("1.2 GB", "700MB", "523 KiB") into megabytes.
///
/// Thousands separators and whitespace are ignored and the unit may omit its
/// trailing `b` ("1.5 G"). Binary units are read as their decimal spelling, so
/// `GiB` and `GB` both scale by 1024: tracker pages mix the two notations for
/// the same quantity and the size ceilings in site configs were written
/// against that reading.
///
/// # Examples
///
/// ```
/// use leechfeed::filter::parse_size;
///
/// assert_eq!(parse_size("700MB").unwrap(), 700.0);
/// assert_eq!(parse_size("2 GiB").unwrap(), 2048.0);
/// assert!(parse_size("bogus").is_err());
/// ```
pub fn parse_size(text: &str) -> Result<f64, SizeError> {
    let unparsable = || SizeError::UnparsableSize(text.to_string());

    let mut normalized: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect::<String>()
        .to_lowercase();

    if let Some(stem) = normalized.strip_suffix("ib") {
        normalized = format!("{stem}b");
    }
    if !normalized.ends_with('b') {
        normalized.push('b');
    }

    let split = normalized.len().checked_sub(2).ok_or_else(unparsable)?;
    if !normalized.is_char_boundary(split) {
        return Err(unparsable());
    }
    let (number, unit) = normalized.split_at(split);

    let value: f64 = number
        .parse()
        .ok()
        .filter(|v: &f64| v.is_finite() && *v >= 0.0)
        .ok_or_else(unparsable)?;

    match unit {
        "kb" => Ok(value / 1024.0),
        "mb" => Ok(value),
        "gb" => Ok(value * 1024.0),
        _ => Err(unparsable()),
    }
}

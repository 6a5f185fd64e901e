//! Utility functions used by Gosling.

use regex::Regex;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::GoslingError;

lazy_static::lazy_static! {
    static ref TIMESPAN: Regex =
        Regex::new(r"((?P<hours>\d+?)h)?((?P<minutes>\d+?)m)?((?P<seconds>\d+?)s)?")
            .expect("timespan regex is valid");
}

/// Parse a string representing a time span and return the number of seconds.
///
/// Can be specified as an integer, indicating seconds. Or can use integers
/// together with one or more of "h", "m", and "s", in that order, indicating
/// "hours", "minutes", and "seconds".
///
/// Valid formats include: 20, 20s, 3m, 2h, 1h20m, 3h30m10s, etc.
///
/// # Example
/// ```rust
/// use gosling::util;
///
/// // 1 hour 2 minutes and 3 seconds is 3,723 seconds.
/// assert_eq!(util::parse_timespan("1h2m3s"), 3_723);
///
/// // 45 seconds is 45 seconds.
/// assert_eq!(util::parse_timespan("45"), 45);
///
/// // Invalid value is 0 seconds.
/// assert_eq!(util::parse_timespan("foo"), 0);
/// ```
pub fn parse_timespan(time_str: &str) -> usize {
    match usize::from_str(time_str) {
        // If an integer is passed in, assume it's seconds
        Ok(t) => {
            trace!("{} is integer: {} seconds", time_str, t);
            t
        }
        // Otherwise use a regex to extract hours, minutes and seconds from string.
        Err(_) => {
            let time_matches = match TIMESPAN.captures(time_str) {
                Some(time_matches) => time_matches,
                None => return 0,
            };
            let capture = |name: &str| -> usize {
                time_matches
                    .name(name)
                    .and_then(|value| usize::from_str(value.as_str()).ok())
                    .unwrap_or(0)
            };
            let hours = capture("hours");
            let minutes = capture("minutes");
            let seconds = capture("seconds");
            let total = hours * 60 * 60 + minutes * 60 + seconds;
            trace!(
                "{} hours {} minutes {} seconds: {} seconds",
                hours,
                minutes,
                seconds,
                total
            );
            total
        }
    }
}

/// Convert optional string to f32, otherwise return None.
///
/// # Example
/// ```rust
/// use gosling::util;
///
/// // No decimal returns a proper float.
/// assert_eq!(util::get_float_from_string(Some("1".to_string())), Some(1.0));
///
/// // Leading decimal returns a proper float.
/// assert_eq!(util::get_float_from_string(Some(".1".to_string())), Some(0.1));
///
/// // Invalid number with too many decimals returns None.
/// assert_eq!(util::get_float_from_string(Some("1.1.1".to_string())), None);
///
/// // No number returns None.
/// assert_eq!(util::get_float_from_string(None), None);
/// ```
pub fn get_float_from_string(string: Option<String>) -> Option<f32> {
    match string {
        Some(s) => match s.parse::<f32>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("failed to convert {} to float: {}", s, e);
                None
            }
        },
        None => None,
    }
}

/// Truncate strings when they're too long to display.
///
/// If a string is longer than the specified max length, this function removes extra
/// the characters and replaces the last two with a double-period ellipsis.
///
/// # Example
/// ```rust
/// use gosling::util;
///
/// // All but 7 characters are truncated, with ".." appended.
/// assert_eq!(util::truncate_string("this is a long string", 9), "this is..");
///
/// // All characters are returned as the string is less than 15 characters long.
/// assert_eq!(util::truncate_string("shorter string", 15), "shorter string");
/// ```
pub fn truncate_string(str_to_truncate: &str, max_length: usize) -> String {
    if str_to_truncate.char_indices().count() > max_length {
        match str_to_truncate.char_indices().nth(max_length.saturating_sub(2)) {
            None => str_to_truncate.to_string(),
            Some((idx, _)) => format!("{}..", &str_to_truncate[..idx]),
        }
    } else {
        str_to_truncate.to_string()
    }
}

/// Helper function to determine if a URL can be load tested.
///
/// The URL must parse, use the `http` or `https` scheme, and name a host.
///
/// # Example
/// ```rust
/// use gosling::util;
///
/// // Hostname is a valid URL.
/// assert!(util::is_valid_url("http://localhost/").is_ok());
///
/// // URL with path is a valid URL.
/// assert!(util::is_valid_url("https://example.com/foo").is_ok());
///
/// // Protocol is required.
/// assert!(util::is_valid_url("example.com/").is_err());
///
/// // Only HTTP(S) can be load tested.
/// assert!(util::is_valid_url("file:///path/to/file").is_err());
/// ```
pub fn is_valid_url(url: &str) -> Result<Url, String> {
    if url.trim().is_empty() {
        return Err("url is empty".to_string());
    }
    let parsed = Url::parse(url).map_err(|parse_error| parse_error.to_string())?;
    match parsed.scheme() {
        "http" | "https" => (),
        scheme => return Err(format!("unsupported scheme {:?}", scheme)),
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err("url has no host".to_string());
    }
    Ok(parsed)
}

/// Helper to convert a float number of seconds into a [`Duration`], rejecting
/// negative, non-finite and overflowing values.
pub(crate) fn seconds_to_duration(option: &str, seconds: f32) -> Result<Duration, GoslingError> {
    Duration::try_from_secs_f32(seconds).map_err(|e| GoslingError::InvalidOption {
        option: option.to_string(),
        value: seconds.to_string(),
        detail: format!("{} must be a positive number of seconds: {}", option, e),
    })
}

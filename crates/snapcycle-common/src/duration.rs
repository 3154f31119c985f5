//! Parsing of Go-style duration annotations (`"24h"`, `"1h30m"`, `"90s"`)

use std::time::Duration;

use crate::Error;

/// Parse a duration annotation value.
///
/// The key is only used for error context. Empty values are rejected so
/// callers can distinguish "annotation absent" (leave prior value) from
/// "annotation present but malformed" (abort the update).
pub fn parse_annotation(key: &str, value: &str) -> Result<Duration, Error> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::annotation(key, value, "empty duration"));
    }

    humantime::parse_duration(trimmed).map_err(|e| Error::annotation(key, value, e.to_string()))
}

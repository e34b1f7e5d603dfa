//! Repository implementations using SeaORM
//!
//! Rows carry timestamps as fixed-precision RFC 3339 strings and lists as JSON
//! arrays; both are converted to domain types here and nowhere else.

pub mod change_request_repository;
pub mod device_repository;
pub mod queue_entry_repository;

pub use change_request_repository::SeaOrmChangeRequestRepository;
pub use device_repository::SeaOrmDeviceRepository;
pub use queue_entry_repository::SeaOrmQueueEntryRepository;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::domain::DomainError;

/// Microsecond precision, always `Z`, so string order matches time order
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DomainError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DomainError::Internal(format!("malformed timestamp '{}': {}", value, e)))
}

pub(crate) fn parse_optional_timestamp(
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, DomainError> {
    value.map(parse_timestamp).transpose()
}

pub(crate) fn encode_list(values: &[String]) -> Result<String, DomainError> {
    Ok(serde_json::to_string(values)?)
}

pub(crate) fn decode_list(value: &str) -> Result<Vec<String>, DomainError> {
    if value.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamps_sort_lexically() {
        let earlier = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 59).unwrap();
        let later = earlier + chrono::Duration::microseconds(1);
        assert!(format_timestamp(earlier) < format_timestamp(later));
        assert_eq!(parse_timestamp(&format_timestamp(later)).unwrap(), later);
    }

    #[test]
    fn test_empty_list_column_decodes_to_empty() {
        assert!(decode_list("").unwrap().is_empty());
        assert!(matches!(
            decode_list("not json"),
            Err(DomainError::Internal(_))
        ));
    }
}

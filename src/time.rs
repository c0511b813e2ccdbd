//! Timestamp rendering.
//!
//! Records keep `DateTime<Utc>` truncated to whole milliseconds; these helpers
//! produce the two textual forms used at the edges: ISO-8601 with milliseconds
//! for display, reports and serialized records, and a compact form safe for
//! file names.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::Serializer;

/// Current time truncated to millisecond precision.
#[must_use]
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Renders a timestamp as ISO-8601 with millisecond precision (`2024-05-01T12:00:00.123Z`).
#[must_use]
pub fn iso_millis(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `serialize_with` helper writing a timestamp in [`iso_millis`] form.
pub(crate) fn serialize_millis<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&iso_millis(*at))
}

/// Renders a timestamp without separators that are awkward in file names.
#[must_use]
pub fn file_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%S%.3fZ").to_string().replace('.', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    fn sample() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 45).unwrap() + chrono::Duration::milliseconds(7)
    }

    #[test]
    fn iso_millis_keeps_three_fraction_digits() {
        assert_eq!(iso_millis(sample()), "2024-05-01T12:30:45.007Z");
    }

    #[test]
    fn now_millis_has_no_sub_millisecond_part() {
        assert_eq!(now_millis().timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn file_stamp_has_no_colons_or_dots() {
        let stamp = file_stamp(sample());
        assert_eq!(stamp, "20240501T123045007Z");
        assert!(!stamp.contains(':'));
    }
}

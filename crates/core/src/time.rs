use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

/// A simple clock abstraction for deterministic time in services and tests.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    #[default]
    Default,
    Fixed(DateTime<Utc>),
}

impl Clock {
    /// Returns a clock that uses the current system time.
    #[must_use]
    pub fn default_clock() -> Self {
        Self::Default
    }

    /// Returns a clock fixed at the given timestamp.
    #[must_use]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }

    /// Returns the current time according to the clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::Default => Utc::now(),
            Clock::Fixed(t) => *t,
        }
    }

    /// Calendar date of `now()` in UTC.
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// If this is a fixed clock, advance it by the given duration.
    ///
    /// Has no effect on `Clock::Default`.
    pub fn advance(&mut self, delta: Duration) {
        if let Clock::Fixed(t) = self {
            *t += delta;
        }
    }
}

/// Deterministic timestamp for tests and examples (2023-11-14T22:13:20Z).
pub const FIXED_TEST_TIMESTAMP: i64 = 1_700_000_000;

/// Returns a deterministic `DateTime<Utc>` for tests and doc examples.
///
/// # Panics
///
/// Panics if the fixed timestamp cannot be represented.
#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(FIXED_TEST_TIMESTAMP, 0)
        .expect("fixed timestamp should be valid")
}

/// Returns a `Clock` fixed at the deterministic test timestamp.
#[must_use]
pub fn fixed_clock() -> Clock {
    Clock::fixed(fixed_now())
}

//
// ─── TIMEZONE CONVERSION ───────────────────────────────────────────────────────
//
// The backend stores UTC; users enter and read local wall-clock times.
//

/// Parse an `HH:MM` wall-clock time.
#[must_use]
pub fn parse_hhmm(time: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(time.trim(), "%H:%M").ok()
}

/// Convert a local date and `HH:MM` time at the given offset into UTC.
///
/// Returns `None` when the time cannot be parsed.
#[must_use]
pub fn local_to_utc(date: NaiveDate, time: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let time = parse_hhmm(time)?;
    offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|local| local.with_timezone(&Utc))
}

#[must_use]
pub fn utc_to_local_date(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    at.with_timezone(&offset).date_naive()
}

/// Local `HH:MM` for a UTC instant.
#[must_use]
pub fn utc_to_local_time(at: DateTime<Utc>, offset: FixedOffset) -> String {
    at.with_timezone(&offset).format("%H:%M").to_string()
}

#[must_use]
pub fn utc_to_local_date_time(at: DateTime<Utc>, offset: FixedOffset) -> (NaiveDate, String) {
    (utc_to_local_date(at, offset), utc_to_local_time(at, offset))
}

/// Serde helpers for backend timestamps.
///
/// The backend emits both RFC 3339 strings and naive ISO strings
/// (`2025-01-14T08:00:00.123456`); naive values are taken as UTC.
pub mod serde_utc {
    use super::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Parse either an RFC 3339 timestamp or a naive ISO timestamp in UTC.
    #[must_use]
    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
            return Some(at.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    /// # Errors
    ///
    /// Fails if the serializer rejects the string.
    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&at.to_rfc3339())
    }

    /// # Errors
    ///
    /// Fails when the value is not a string in either accepted format.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    pub mod option {
        use super::{DateTime, Deserialize, Deserializer, Serializer, Utc};

        /// # Errors
        ///
        /// Fails if the serializer rejects the value.
        pub fn serialize<S: Serializer>(at: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
            match at {
                Some(at) => s.serialize_some(&at.to_rfc3339()),
                None => s.serialize_none(),
            }
        }

        /// # Errors
        ///
        /// Fails when a present value is not a valid timestamp.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw = Option::<String>::deserialize(d)?;
            raw.map(|raw| {
                super::parse(&raw)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
            })
            .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beijing() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    #[test]
    fn local_to_utc_shifts_by_offset() {
        let date = NaiveDate::from_ymd_opt(2025, 10, 21).unwrap();
        let utc = local_to_utc(date, "15:00", beijing()).unwrap();
        assert_eq!(utc.to_rfc3339(), "2025-10-21T07:00:00+00:00");
    }

    #[test]
    fn local_to_utc_rejects_bad_time() {
        let date = NaiveDate::from_ymd_opt(2025, 10, 21).unwrap();
        assert!(local_to_utc(date, "25:99", beijing()).is_none());
    }

    #[test]
    fn utc_to_local_crosses_midnight() {
        let at = serde_utc::parse("2025-10-21T20:30:00Z").unwrap();
        let (date, time) = utc_to_local_date_time(at, beijing());
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 10, 22).unwrap());
        assert_eq!(time, "04:30");
    }

    #[test]
    fn naive_timestamps_are_read_as_utc() {
        let at = serde_utc::parse("2025-01-14T08:00:00.123456").unwrap();
        assert_eq!(at.timestamp(), 1_736_841_600);
    }

    #[test]
    fn fixed_clock_advances() {
        let mut clock = fixed_clock();
        clock.advance(Duration::days(1));
        assert_eq!(clock.now(), fixed_now() + Duration::days(1));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2023, 11, 15).unwrap());
    }
}

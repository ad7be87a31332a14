//! Delivery cadence and next-trigger computation
//!
//! [`next_trigger`] is pure: the same frequency and start instant always produce the
//! same result. The time zone is a type parameter so callers pick local time in
//! production and a fixed offset in tests.

use chrono::{DateTime, Duration, NaiveTime, TimeZone};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

/// Hour of day (local) at which newsletters are delivered
pub const DELIVERY_HOUR: u32 = 9;

/// User-chosen delivery cadence
///
/// Deserialization is lenient: an unknown or missing label becomes [`Frequency::Weekly`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Every day
    Daily,
    /// Every seven days
    #[default]
    Weekly,
    /// Every three days
    Biweekly,
}

impl Frequency {
    /// Parse a cadence label, falling back to weekly for anything unrecognised
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "daily" => Frequency::Daily,
            "weekly" => Frequency::Weekly,
            "biweekly" => Frequency::Biweekly,
            _ => Frequency::Weekly,
        }
    }

    /// Wire/database label
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Biweekly => "biweekly",
        }
    }

    /// Time between two deliveries
    ///
    /// Biweekly is three days, matching the cadence existing subscribers already get.
    pub fn interval(&self) -> Duration {
        match self {
            Frequency::Daily => Duration::days(1),
            Frequency::Weekly => Duration::days(7),
            Frequency::Biweekly => Duration::days(3),
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Frequency {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let label = Option::<String>::deserialize(deserializer)?;
        Ok(label
            .as_deref()
            .map(Frequency::from_label)
            .unwrap_or_default())
    }
}

/// Compute when the next newsletter after `from` should be delivered
///
/// Adds the frequency interval to `from` and moves the time of day to
/// [`DELIVERY_HOUR`]:00 in `from`'s time zone. When that wall-clock time does not
/// exist on the target day (a DST gap) the un-normalized `from + interval` is returned.
pub fn next_trigger<Tz: TimeZone>(frequency: Frequency, from: &DateTime<Tz>) -> DateTime<Tz> {
    let shifted = from.clone() + frequency.interval();
    let delivery = NaiveTime::from_hms_opt(DELIVERY_HOUR, 0, 0).unwrap_or(NaiveTime::MIN);
    let local = shifted.date_naive().and_time(delivery);

    shifted
        .timezone()
        .from_local_datetime(&local)
        .earliest()
        .unwrap_or(shifted)
}

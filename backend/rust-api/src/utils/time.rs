use chrono::{DateTime, NaiveDate, Utc};
use mongodb::bson::DateTime as BsonDateTime;

pub fn chrono_to_bson(dt: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(dt.timestamp_millis())
}

/// UTC calendar day of a timestamp
pub fn utc_day(dt: DateTime<Utc>) -> NaiveDate {
    dt.date_naive()
}

/// Whole calendar days from `earlier` to `later` (negative if reversed)
pub fn calendar_days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> i64 {
    (utc_day(later) - utc_day(earlier)).num_days()
}

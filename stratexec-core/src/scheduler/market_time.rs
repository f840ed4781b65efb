//! Named daily time points and per-market trading hours.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::{MarketType, SessionMarket};

/// When during the trading day a scheduled callback fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimePoint {
    BeforeOpen,
    Open,
    Close,
    AfterClose,
    /// Explicit local wall-clock time, written `HH:MM`.
    At(NaiveTime),
}

#[derive(Debug, Error, PartialEq)]
#[error("unknown time point '{0}' (expected before_open, open, close, after_close or HH:MM)")]
pub struct TimePointError(pub String);

impl FromStr for TimePoint {
    type Err = TimePointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "before_open" => Ok(TimePoint::BeforeOpen),
            "open" => Ok(TimePoint::Open),
            "close" => Ok(TimePoint::Close),
            "after_close" => Ok(TimePoint::AfterClose),
            other => NaiveTime::parse_from_str(other, "%H:%M")
                .map(TimePoint::At)
                .map_err(|_| TimePointError(s.to_string())),
        }
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimePoint::BeforeOpen => f.write_str("before_open"),
            TimePoint::Open => f.write_str("open"),
            TimePoint::Close => f.write_str("close"),
            TimePoint::AfterClose => f.write_str("after_close"),
            TimePoint::At(t) => write!(f, "{}", t.format("%H:%M")),
        }
    }
}

impl TryFrom<String> for TimePoint {
    type Error = TimePointError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimePoint> for String {
    fn from(tp: TimePoint) -> Self {
        tp.to_string()
    }
}

/// Local wall-clock hours of one market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketHours {
    pub before_open: NaiveTime,
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub after_close: NaiveTime,
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
}

impl MarketHours {
    pub fn for_market(market: MarketType) -> Self {
        match market {
            MarketType::Session(SessionMarket::AShare) => Self {
                before_open: hm(9, 25),
                open: hm(9, 30),
                close: hm(15, 0),
                after_close: hm(15, 5),
            },
            MarketType::Session(SessionMarket::Us) | MarketType::Session(SessionMarket::HongKong) => Self {
                before_open: hm(9, 25),
                open: hm(9, 30),
                close: hm(16, 0),
                after_close: hm(16, 5),
            },
            // Logical day boundaries for venues that never close.
            MarketType::Continuous => Self {
                before_open: hm(0, 0),
                open: hm(0, 0),
                close: hm(23, 59),
                after_close: hm(23, 59),
            },
        }
    }

    pub fn local_time(&self, point: TimePoint) -> NaiveTime {
        match point {
            TimePoint::BeforeOpen => self.before_open,
            TimePoint::Open => self.open,
            TimePoint::Close => self.close,
            TimePoint::AfterClose => self.after_close,
            TimePoint::At(t) => t,
        }
    }
}

/// The UTC instant of `point` on local date `date` in `market`.
///
/// Ambiguous local times (DST fall-back) resolve to the earlier instant;
/// nonexistent ones (spring-forward gap) yield `None`.
pub fn time_point_instant(market: MarketType, date: NaiveDate, point: TimePoint) -> Option<DateTime<Utc>> {
    let local = date.and_time(MarketHours::for_market(market).local_time(point));
    market
        .timezone()
        .from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Local calendar date of `instant` in `market`'s timezone.
pub fn local_date(market: MarketType, instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&market.timezone()).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_and_clock_points() {
        assert_eq!("open".parse::<TimePoint>().unwrap(), TimePoint::Open);
        assert_eq!("BEFORE_OPEN".parse::<TimePoint>().unwrap(), TimePoint::BeforeOpen);
        assert_eq!("10:30".parse::<TimePoint>().unwrap(), TimePoint::At(hm(10, 30)));
        assert!("lunch".parse::<TimePoint>().is_err());
        assert_eq!(TimePoint::At(hm(9, 5)).to_string(), "09:05");
    }

    #[test]
    fn a_share_open_in_utc() {
        let market = MarketType::Session(SessionMarket::AShare);
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let open = time_point_instant(market, date, TimePoint::Open).unwrap();
        assert_eq!(open.to_rfc3339(), "2024-03-04T01:30:00+00:00");
    }

    #[test]
    fn us_open_tracks_daylight_saving() {
        let market = MarketType::Session(SessionMarket::Us);
        let winter = time_point_instant(market, NaiveDate::from_ymd_opt(2024, 1, 8).unwrap(), TimePoint::Open).unwrap();
        let summer = time_point_instant(market, NaiveDate::from_ymd_opt(2024, 7, 8).unwrap(), TimePoint::Open).unwrap();
        assert_eq!(winter.format("%H:%M").to_string(), "14:30");
        assert_eq!(summer.format("%H:%M").to_string(), "13:30");
    }

    #[test]
    fn continuous_open_is_midnight_utc() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let open = time_point_instant(MarketType::Continuous, date, TimePoint::Open).unwrap();
        assert_eq!(open.to_rfc3339(), "2024-06-01T00:00:00+00:00");
    }
}

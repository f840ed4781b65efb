//! Trading-day calendar for session markets.
//!
//! A day is a trading day when it is not a weekend day and not listed as a
//! holiday for the market. Continuous markets trade every calendar day.
//!
//! Holiday files are JSON keyed by market. Each market takes either a plain
//! date map or a table with a `holidays` list and optional `weekends`
//! (0 = Monday .. 6 = Sunday):
//!
//! ```json
//! {
//!   "A_STOCK": {"2025-01-01": "New Year"},
//!   "US_STOCK": {"holidays": ["2025-01-09"], "weekends": [5, 6]}
//! }
//! ```
//!
//! [`TradeCalendar::load_or_builtin`] merges a file over the embedded 2024
//! tables. Unknown markets or fields are parse errors.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate, Weekday};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::domain::{MarketType, SessionMarket};

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("failed to read calendar {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse calendar: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Holidays and weekend days of one session market.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MarketCalendar {
    pub holidays: BTreeMap<NaiveDate, String>,
    /// Weekend days, 0 = Monday. `None`: Saturday and Sunday.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekends: Option<Vec<u8>>,
}

impl MarketCalendar {
    fn is_weekend(&self, date: NaiveDate) -> bool {
        match &self.weekends {
            Some(days) => days.contains(&(date.weekday().num_days_from_monday() as u8)),
            None => matches!(date.weekday(), Weekday::Sat | Weekday::Sun),
        }
    }

    fn merge(&mut self, other: MarketCalendar) {
        self.holidays.extend(other.holidays);
        if other.weekends.is_some() {
            self.weekends = other.weekends;
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HolidaySet {
    Listed(Vec<NaiveDate>),
    Described(BTreeMap<NaiveDate, String>),
}

impl From<HolidaySet> for BTreeMap<NaiveDate, String> {
    fn from(set: HolidaySet) -> Self {
        match set {
            HolidaySet::Listed(dates) => dates.into_iter().map(|d| (d, String::new())).collect(),
            HolidaySet::Described(map) => map,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MarketTable {
    #[serde(default)]
    holidays: Option<HolidaySet>,
    #[serde(default)]
    weekends: Option<Vec<u8>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MarketEntry {
    Table(MarketTable),
    Dated(BTreeMap<NaiveDate, String>),
}

impl<'de> Deserialize<'de> for MarketCalendar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entry = MarketEntry::deserialize(deserializer).map_err(|_| {
            D::Error::custom("expected a date map or {\"holidays\": [...], \"weekends\": [...]}")
        })?;
        match entry {
            MarketEntry::Dated(holidays) => Ok(Self { holidays, weekends: None }),
            MarketEntry::Table(table) => {
                if let Some(bad) = table.weekends.iter().flatten().find(|d| **d > 6) {
                    return Err(D::Error::custom(format!("weekend day {bad} out of range 0..=6")));
                }
                Ok(Self {
                    holidays: table.holidays.map(Into::into).unwrap_or_default(),
                    weekends: table.weekends,
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TradeCalendar {
    markets: HashMap<SessionMarket, MarketCalendar>,
}

impl Default for TradeCalendar {
    fn default() -> Self {
        Self::builtin()
    }
}

/// (market, [(month, day_from, day_to)]) for 2024.
const HOLIDAYS_2024: [(SessionMarket, &[(u32, u32, u32)]); 3] = [
    (
        SessionMarket::AShare,
        &[(1, 1, 1), (2, 10, 17), (4, 4, 6), (5, 1, 5), (6, 10, 10), (9, 15, 17), (10, 1, 7)],
    ),
    (
        SessionMarket::Us,
        &[
            (1, 1, 1),
            (1, 15, 15),
            (2, 19, 19),
            (3, 29, 29),
            (5, 27, 27),
            (6, 19, 19),
            (7, 4, 4),
            (9, 2, 2),
            (11, 28, 28),
            (12, 25, 25),
        ],
    ),
    (
        SessionMarket::HongKong,
        &[
            (1, 1, 1),
            (2, 10, 13),
            (3, 29, 29),
            (4, 1, 1),
            (4, 4, 4),
            (5, 1, 1),
            (5, 15, 15),
            (6, 10, 10),
            (7, 1, 1),
            (9, 18, 18),
            (10, 1, 1),
            (10, 11, 11),
            (12, 25, 26),
        ],
    ),
];

impl TradeCalendar {
    /// Calendar with no holidays (weekends still close session markets).
    pub fn empty() -> Self {
        Self { markets: HashMap::new() }
    }

    /// The embedded 2024 holiday tables.
    pub fn builtin() -> Self {
        let mut cal = Self::empty();
        for (market, ranges) in HOLIDAYS_2024 {
            for &(month, from, to) in ranges {
                for day in from..=to {
                    if let Some(date) = NaiveDate::from_ymd_opt(2024, month, day) {
                        cal.add_holiday(market, date, "");
                    }
                }
            }
        }
        cal
    }

    /// Parse a holiday file on its own, without the builtin tables.
    pub fn from_json(json: &str) -> Result<Self, CalendarError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, CalendarError> {
        let json = std::fs::read_to_string(path).map_err(|source| CalendarError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Builtin tables, with the file at `path` merged over them when it
    /// loads. A bad file is logged and ignored.
    pub fn load_or_builtin(path: Option<&Path>) -> Self {
        let mut cal = Self::builtin();
        match path.map(Self::from_json_file) {
            Some(Ok(extra)) => cal.merge(extra),
            Some(Err(e)) => tracing::warn!(error = %e, "ignoring calendar file, using builtin trade calendar"),
            None => {}
        }
        cal
    }

    /// Add `other`'s holidays; its weekend sets replace ours.
    pub fn merge(&mut self, other: TradeCalendar) {
        for (market, table) in other.markets {
            self.markets.entry(market).or_default().merge(table);
        }
    }

    pub fn add_holiday(&mut self, market: SessionMarket, date: NaiveDate, description: impl Into<String>) {
        self.markets.entry(market).or_default().holidays.insert(date, description.into());
    }

    pub fn is_holiday(&self, market: SessionMarket, date: NaiveDate) -> bool {
        self.markets.get(&market).is_some_and(|m| m.holidays.contains_key(&date))
    }

    pub fn is_trading_day(&self, market: MarketType, date: NaiveDate) -> bool {
        match market {
            MarketType::Continuous => true,
            MarketType::Session(m) => match self.markets.get(&m) {
                Some(table) => !table.is_weekend(date) && !table.holidays.contains_key(&date),
                None => !matches!(date.weekday(), Weekday::Sat | Weekday::Sun),
            },
        }
    }

    /// Trading days in `[start, end]`, inclusive.
    pub fn trading_days(&self, market: MarketType, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| self.is_trading_day(market, *d))
            .collect()
    }

    pub fn to_json(&self) -> Result<String, CalendarError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

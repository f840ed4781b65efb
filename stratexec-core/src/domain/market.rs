//! Market classification: session-based exchanges vs continuously-trading venues.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Exchanges with discrete trading sessions and a holiday calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SessionMarket {
    #[serde(rename = "A_STOCK")]
    AShare,
    #[serde(rename = "US_STOCK")]
    Us,
    #[serde(rename = "HK_STOCK")]
    HongKong,
}

impl SessionMarket {
    pub fn timezone(self) -> Tz {
        match self {
            SessionMarket::AShare => chrono_tz::Asia::Shanghai,
            SessionMarket::Us => chrono_tz::America::New_York,
            SessionMarket::HongKong => chrono_tz::Asia::Hong_Kong,
        }
    }
}

/// How a symbol trades. Resolved once (at scheduler registration or request
/// validation) and carried explicitly afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MarketType {
    Session(SessionMarket),
    Continuous,
}

#[derive(Debug, Error, PartialEq)]
pub enum MarketTypeError {
    #[error("unknown market type '{0}' (expected A_STOCK, US_STOCK, HK_STOCK or CRYPTO)")]
    Unknown(String),
}

impl MarketType {
    /// Classify a symbol by its exchange suffix.
    ///
    /// `.XSHE`/`.XSHG` are A-shares, `.US` US equities, `.HK` Hong Kong.
    /// Everything else (trading pairs such as `BTCUSDT`, `BTC.USDT`) is
    /// treated as continuously trading.
    pub fn detect(symbol: &str) -> Self {
        match symbol.rsplit_once('.').map(|(_, suffix)| suffix.to_ascii_uppercase()) {
            Some(s) if s == "XSHE" || s == "XSHG" => MarketType::Session(SessionMarket::AShare),
            Some(s) if s == "US" => MarketType::Session(SessionMarket::Us),
            Some(s) if s == "HK" => MarketType::Session(SessionMarket::HongKong),
            _ => MarketType::Continuous,
        }
    }

    /// Explicit override wins; an unparseable override is an error rather
    /// than a silent fallback to detection.
    pub fn resolve(symbol: &str, explicit: Option<&str>) -> Result<Self, MarketTypeError> {
        match explicit.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => s.parse(),
            None => Ok(Self::detect(symbol)),
        }
    }

    pub fn is_continuous(self) -> bool {
        matches!(self, MarketType::Continuous)
    }

    /// Session markets trade in whole shares; continuous venues allow fractions.
    pub fn trades_whole_units(self) -> bool {
        !self.is_continuous()
    }

    pub fn timezone(self) -> Tz {
        match self {
            MarketType::Session(m) => m.timezone(),
            MarketType::Continuous => Tz::UTC,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MarketType::Session(SessionMarket::AShare) => "A_STOCK",
            MarketType::Session(SessionMarket::Us) => "US_STOCK",
            MarketType::Session(SessionMarket::HongKong) => "HK_STOCK",
            MarketType::Continuous => "CRYPTO",
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketType {
    type Err = MarketTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A_STOCK" | "ASHARE" | "CN" => Ok(MarketType::Session(SessionMarket::AShare)),
            "US_STOCK" | "US" => Ok(MarketType::Session(SessionMarket::Us)),
            "HK_STOCK" | "HK" => Ok(MarketType::Session(SessionMarket::HongKong)),
            "CRYPTO" | "CONTINUOUS" => Ok(MarketType::Continuous),
            _ => Err(MarketTypeError::Unknown(s.to_string())),
        }
    }
}

impl TryFrom<String> for MarketType {
    type Error = MarketTypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MarketType> for String {
    fn from(m: MarketType) -> Self {
        m.as_str().to_string()
    }
}

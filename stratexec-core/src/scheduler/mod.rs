//! Daily scheduled callbacks (`run_daily`).
//!
//! A task is (callback, time point, reference symbol). Its market type is
//! resolved once, at registration. On each market-data exec the dispatcher
//! asks which tasks are due at the trigger instant:
//!
//! - convert the instant into the market's timezone,
//! - for the local date and the previous local date, build the time point's
//!   instant,
//! - the task is due when `0 <= now - point < tolerance` and that date is a
//!   trading day (always true for continuous markets).
//!
//! The tolerance is one exec tick: the period of the request's timeframe,
//! capped at 24h. Checking the previous date lets daily bars that close
//! after local midnight still pick up the session they belong to.

pub mod calendar;
pub mod market_time;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::domain::{parse_timeframe, MarketType};
use crate::strategy::ContextFn;

pub use calendar::{CalendarError, MarketCalendar, TradeCalendar};
pub use market_time::{time_point_instant, MarketHours, TimePoint, TimePointError};

/// Tolerance used when the request timeframe is missing or unparseable.
pub const DEFAULT_TOLERANCE_MINUTES: i64 = 60;

/// Due-window width for a request with bars of `timeframe`.
pub fn schedule_tolerance(timeframe: Option<&str>) -> Duration {
    let max = Duration::hours(24);
    timeframe
        .and_then(parse_timeframe)
        .map(|d| d.min(max))
        .unwrap_or_else(|| Duration::minutes(DEFAULT_TOLERANCE_MINUTES))
}

/// Whether `point` in `market` falls inside `[now - tolerance, now]` on a
/// trading day.
pub fn is_due(
    market: MarketType,
    point: TimePoint,
    now: DateTime<Utc>,
    tolerance: Duration,
    calendar: &TradeCalendar,
) -> bool {
    let today = market_time::local_date(market, now);
    [Some(today), today.pred_opt()]
        .into_iter()
        .flatten()
        .filter(|date| calendar.is_trading_day(market, *date))
        .filter_map(|date| time_point_instant(market, date, point))
        .any(|at| {
            let delta = now - at;
            delta >= Duration::zero() && delta < tolerance
        })
}

#[derive(Clone)]
pub struct ScheduledTask {
    pub name: String,
    pub time_point: TimePoint,
    pub reference_symbol: String,
    pub market: MarketType,
    callback: Arc<ContextFn>,
}

impl ScheduledTask {
    pub fn callback(&self) -> &ContextFn {
        self.callback.as_ref()
    }

    pub fn is_due(&self, now: DateTime<Utc>, tolerance: Duration, calendar: &TradeCalendar) -> bool {
        is_due(self.market, self.time_point, now, tolerance, calendar)
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("name", &self.name)
            .field("time_point", &self.time_point)
            .field("reference_symbol", &self.reference_symbol)
            .field("market", &self.market)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a task. Registering the same (name, time point) twice keeps the
    /// first registration and returns false.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        callback: Arc<ContextFn>,
        time_point: TimePoint,
        reference_symbol: impl Into<String>,
        market: MarketType,
    ) -> bool {
        let name = name.into();
        if self.tasks.iter().any(|t| t.name == name && t.time_point == time_point) {
            return false;
        }
        let reference_symbol = reference_symbol.into();
        tracing::debug!(%name, %time_point, %reference_symbol, %market, "scheduled task registered");
        self.tasks.push(ScheduledTask { name, time_point, reference_symbol, market, callback });
        true
    }

    /// Tasks due at `now`, ordered by local time of their time point, then
    /// by registration order.
    pub fn due_tasks(
        &self,
        now: DateTime<Utc>,
        tolerance: Duration,
        calendar: &TradeCalendar,
    ) -> Vec<&ScheduledTask> {
        let mut due: Vec<&ScheduledTask> =
            self.tasks.iter().filter(|t| t.is_due(now, tolerance, calendar)).collect();
        due.sort_by_key(|t| MarketHours::for_market(t.market).local_time(t.time_point));
        due
    }

    pub fn tasks(&self) -> &[ScheduledTask] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

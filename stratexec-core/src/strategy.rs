//! Strategy modules: the callback table a strategy exposes to the engine.
//!
//! A strategy is a named set of optional callbacks plus named free functions
//! that can be scheduled with `run_daily`. Only `initialize` is mandatory.
//!
//! ```ignore
//! let module = StrategyModule::new("dual_ma")
//!     .initialize(|setup| {
//!         setup.set("fast", 5);
//!         setup.run_daily("rebalance", "open", "BTCUSDT")?;
//!         Ok(())
//!     })
//!     .function("rebalance", |ctx| Ok(()))
//!     .handle_bar(|ctx, bar| Ok(()));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::context::{Context, ContextError};
use crate::domain::{Bar, MarketType, MarketTypeError, Order};
use crate::exec::RiskEvent;
use crate::registry::{Attributes, RegistryError};
use crate::scheduler::{Scheduler, TimePoint, TimePointError};

pub type StrategyResult = Result<(), StrategyError>;

pub type ContextFn = dyn Fn(&Context) -> StrategyResult + Send + Sync;
pub type InitFn = dyn Fn(&mut Setup<'_>) -> StrategyResult + Send + Sync;
pub type BarFn = dyn Fn(&Context, &Bar) -> StrategyResult + Send + Sync;
pub type OrderFn = dyn Fn(&Context, &Order) -> StrategyResult + Send + Sync;
pub type RiskFn = dyn Fn(&Context, &RiskEvent) -> StrategyResult + Send + Sync;

/// Errors raised by strategy code. Caught at the dispatcher boundary and
/// reported in the exec response.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("unknown scheduled function '{0}'")]
    UnknownFunction(String),

    #[error(transparent)]
    TimePoint(#[from] TimePointError),

    #[error(transparent)]
    MarketType(#[from] MarketTypeError),

    #[error("{0}")]
    Failed(String),
}

impl StrategyError {
    pub fn msg(msg: impl Into<String>) -> Self {
        StrategyError::Failed(msg.into())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("strategy '{0}' has no initialize callback")]
    MissingInitialize(String),
}

#[derive(Clone)]
pub struct StrategyModule {
    name: String,
    pub(crate) initialize: Option<Arc<InitFn>>,
    pub(crate) handle_bar: Option<Arc<BarFn>>,
    pub(crate) on_order: Option<Arc<OrderFn>>,
    pub(crate) on_risk_event: Option<Arc<RiskFn>>,
    pub(crate) before_trading: Option<Arc<ContextFn>>,
    pub(crate) functions: BTreeMap<String, Arc<ContextFn>>,
}

impl StrategyModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initialize: None,
            handle_bar: None,
            on_order: None,
            on_risk_event: None,
            before_trading: None,
            functions: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initialize<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Setup<'_>) -> StrategyResult + Send + Sync + 'static,
    {
        self.initialize = Some(Arc::new(f));
        self
    }

    pub fn handle_bar<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context, &Bar) -> StrategyResult + Send + Sync + 'static,
    {
        self.handle_bar = Some(Arc::new(f));
        self
    }

    pub fn on_order<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context, &Order) -> StrategyResult + Send + Sync + 'static,
    {
        self.on_order = Some(Arc::new(f));
        self
    }

    pub fn on_risk_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context, &RiskEvent) -> StrategyResult + Send + Sync + 'static,
    {
        self.on_risk_event = Some(Arc::new(f));
        self
    }

    /// Runs once per trading day at `before_open` of the primary symbol.
    pub fn before_trading<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context) -> StrategyResult + Send + Sync + 'static,
    {
        self.before_trading = Some(Arc::new(f));
        self
    }

    /// A named free function, schedulable from `initialize` via `run_daily`.
    pub fn function<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Context) -> StrategyResult + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
        self
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Check the module can be loaded.
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.initialize.is_none() {
            return Err(LoadError::MissingInitialize(self.name.clone()));
        }
        Ok(())
    }
}

impl fmt::Debug for StrategyModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyModule")
            .field("name", &self.name)
            .field("initialize", &self.initialize.is_some())
            .field("handle_bar", &self.handle_bar.is_some())
            .field("on_order", &self.on_order.is_some())
            .field("on_risk_event", &self.on_risk_event.is_some())
            .field("before_trading", &self.before_trading.is_some())
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Handle given to `initialize`: scheduling plus a settings bag that outlives
/// the call and is readable from every later exec via [`Context::setting`].
pub struct Setup<'a> {
    context: &'a Context,
    scheduler: &'a mut Scheduler,
    functions: &'a BTreeMap<String, Arc<ContextFn>>,
    settings: &'a mut Attributes,
}

impl<'a> Setup<'a> {
    pub(crate) fn new(
        context: &'a Context,
        scheduler: &'a mut Scheduler,
        functions: &'a BTreeMap<String, Arc<ContextFn>>,
        settings: &'a mut Attributes,
    ) -> Self {
        Self { context, scheduler, functions, settings }
    }

    /// The exec call that triggered setup.
    pub fn context(&self) -> &Context {
        self.context
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.context.param(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.settings.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.settings.get(key)
    }

    /// Schedule the named function daily at `time` (`before_open`, `open`,
    /// `close`, `after_close` or `HH:MM`) in the market of
    /// `reference_symbol`. An empty reference symbol means the request's
    /// primary symbol.
    pub fn run_daily(&mut self, function: &str, time: &str, reference_symbol: &str) -> Result<bool, StrategyError> {
        let point: TimePoint = time.parse()?;
        self.run_daily_at(function, point, reference_symbol)
    }

    pub fn run_daily_at(
        &mut self,
        function: &str,
        point: TimePoint,
        reference_symbol: &str,
    ) -> Result<bool, StrategyError> {
        let callback = self
            .functions
            .get(function)
            .cloned()
            .ok_or_else(|| StrategyError::UnknownFunction(function.to_string()))?;
        let symbol = if reference_symbol.is_empty() {
            self.context
                .request()
                .primary_market_data()
                .map(|m| m.symbol.clone())
                .unwrap_or_default()
        } else {
            reference_symbol.to_string()
        };
        let market = MarketType::resolve(&symbol, self.context.request().market_type_override())?;
        Ok(self.scheduler.register(function, callback, point, symbol, market))
    }
}

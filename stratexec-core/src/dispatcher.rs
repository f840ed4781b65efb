//! Lifecycle dispatcher — turns one exec request into strategy callbacks.
//!
//! Lifecycle of a loaded strategy:
//!
//! ```text
//! UNLOADED ──load()──► LOADED ──first successful initialize──► READY
//! ```
//!
//! `load` fails when the module has no `initialize`. `initialize` runs on the
//! first exec call and never again once it succeeds; a failed `initialize`
//! leaves the strategy LOADED so the next call retries it.
//!
//! Per call:
//! 1. Validate the request and build the [`Context`].
//! 2. Register the execution scope in the thread-local registry.
//! 3. Run `initialize` if not yet READY.
//! 4. Dispatch by trigger kind:
//!    - market data: due scheduled tasks (in time-point order), then `handle_bar`
//!    - order status: `on_order` once per changed order
//!    - risk event: `on_risk_event`
//! 5. Clear the registry (guard drop, also on panic) and render the response.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::context::{Context, ContextError};
use crate::domain::{MarketType, Order};
use crate::exec::{timeout_duration, ExecRequest, ExecResponse, ExecStatus, RiskEvent, TriggerKind};
use crate::log::{LogSink, StrategyLog};
use crate::registry::{self, Attributes, ExecutionScope};
use crate::scheduler::{Scheduler, TimePoint, TradeCalendar};
use crate::strategy::{LoadError, Setup, StrategyError, StrategyModule, StrategyResult};

/// Name under which `before_trading` is scheduled.
pub const BEFORE_TRADING_TASK: &str = "before_trading";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Loaded,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    Loaded,
    Ready,
    /// `initialize` has failed and not yet succeeded.
    Failed(String),
}

pub struct Dispatcher {
    module: Arc<StrategyModule>,
    state: LifecycleState,
    scheduler: Scheduler,
    settings: Attributes,
    calendar: Arc<TradeCalendar>,
    config: EngineConfig,
    log_sink: LogSink,
    init_runs: u32,
    last_init_error: Option<String>,
}

impl Dispatcher {
    /// UNLOADED → LOADED.
    pub fn load(
        module: impl Into<Arc<StrategyModule>>,
        config: EngineConfig,
        calendar: Arc<TradeCalendar>,
    ) -> Result<Self, LoadError> {
        let module = module.into();
        module.validate()?;
        tracing::info!(strategy = module.name(), "strategy loaded");
        Ok(Self {
            module,
            state: LifecycleState::Loaded,
            scheduler: Scheduler::new(),
            settings: Attributes::new(),
            calendar,
            log_sink: config.log_sink(),
            config,
            init_runs: 0,
            last_init_error: None,
        })
    }

    pub fn with_log_sink(mut self, sink: LogSink) -> Self {
        self.log_sink = sink;
        self
    }

    pub fn strategy_name(&self) -> &str {
        self.module.name()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn health(&self) -> Health {
        match (self.state, &self.last_init_error) {
            (LifecycleState::Ready, _) => Health::Ready,
            (LifecycleState::Loaded, Some(e)) => Health::Failed(e.clone()),
            (LifecycleState::Loaded, None) => Health::Loaded,
        }
    }

    /// Number of successful `initialize` runs (0 or 1).
    pub fn init_runs(&self) -> u32 {
        self.init_runs
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn settings(&self) -> &Attributes {
        &self.settings
    }

    /// Run one exec call. Never panics on strategy failure: errors and panics
    /// are reported in the response.
    pub fn execute(&mut self, request: ExecRequest) -> ExecResponse {
        let exec_id = request.exec_id.clone();
        if let Err(e) = request.validate() {
            tracing::warn!(%exec_id, error = %e, "exec request rejected");
            return ExecResponse::failed(exec_id, e.to_string());
        }

        let timeout = request
            .max_timeout
            .or(self.config.default_timeout_secs)
            .and_then(timeout_duration);
        tracing::debug!(%exec_id, trigger = ?request.trigger, strategy = self.module.name(), "dispatching");

        let context = Context::new(request, self.settings.clone(), timeout);
        let log = StrategyLog::new(self.module.name(), self.log_sink.clone());
        let scope = Rc::new(ExecutionScope::new(context, log));

        let guard = match registry::register(Rc::clone(&scope)) {
            Ok(guard) => guard,
            Err(e) => return ExecResponse::failed(exec_id, e.to_string()),
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_callbacks(scope.context())));
        drop(guard);

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(format!("strategy panicked: {}", panic_message(payload.as_ref()))),
        };
        if self.state == LifecycleState::Loaded {
            self.last_init_error.clone_from(&error);
        }

        let ctx = scope.context();
        let timed_out = ctx.deadline_exceeded();
        let elapsed_ms = u64::try_from(ctx.elapsed().as_millis()).unwrap_or(u64::MAX);
        let output = ctx.drain();

        let (status, events, error_message) = if timed_out {
            let timeout_ms = ctx.timeout().map_or(0, |t| t.as_millis());
            let msg = ContextError::DeadlineExceeded { timeout_ms }.to_string();
            (ExecStatus::Failed, Vec::new(), Some(msg))
        } else {
            match error {
                None => (ExecStatus::Success, output.events, None),
                Some(e) if output.events.is_empty() => (ExecStatus::Failed, output.events, Some(e)),
                Some(e) => (ExecStatus::PartialSuccess, output.events, Some(e)),
            }
        };

        match &error_message {
            Some(e) => tracing::warn!(%exec_id, ?status, error = %e, "exec finished with error"),
            None => tracing::debug!(%exec_id, events = events.len(), elapsed_ms, "exec finished"),
        }

        ExecResponse {
            exec_id,
            status,
            events,
            error_message,
            warnings: output.warnings,
            decisions: output.decisions,
            elapsed_ms,
        }
    }

    fn run_callbacks(&mut self, ctx: &Context) -> StrategyResult {
        if self.state == LifecycleState::Loaded {
            self.run_initialize(ctx)?;
        }
        ctx.check_deadline()?;

        match ctx.trigger() {
            TriggerKind::MarketData => self.dispatch_market_data(ctx),
            TriggerKind::OrderStatus => self.dispatch_order_status(ctx),
            TriggerKind::RiskEvent => self.dispatch_risk_event(ctx),
        }
    }

    fn run_initialize(&mut self, ctx: &Context) -> StrategyResult {
        let Some(init) = self.module.initialize.clone() else {
            let err = LoadError::MissingInitialize(self.module.name().to_string());
            return Err(StrategyError::msg(err.to_string()));
        };

        // Registrations only take effect if initialize succeeds.
        let mut scheduler = Scheduler::new();
        let mut settings = Attributes::new();
        {
            let mut setup = Setup::new(ctx, &mut scheduler, &self.module.functions, &mut settings);
            init(&mut setup)?;
        }

        if let Some(before_trading) = &self.module.before_trading {
            match ctx.request().primary_market_data() {
                Some(md) => {
                    let market = MarketType::resolve(&md.symbol, ctx.request().market_type_override())?;
                    scheduler.register(
                        BEFORE_TRADING_TASK,
                        Arc::clone(before_trading),
                        TimePoint::BeforeOpen,
                        md.symbol.clone(),
                        market,
                    );
                }
                None => ctx.warn("before_trading not scheduled: request has no market data"),
            }
        }

        self.scheduler = scheduler;
        self.settings = settings;
        ctx.set_settings(self.settings.clone());
        self.state = LifecycleState::Ready;
        self.init_runs += 1;
        self.last_init_error = None;
        tracing::info!(
            strategy = self.module.name(),
            scheduled = self.scheduler.len(),
            "strategy initialized"
        );
        Ok(())
    }

    fn dispatch_market_data(&self, ctx: &Context) -> StrategyResult {
        let primary = ctx.request().primary_market_data();
        let tolerance = self.config.tolerance_for(primary.map(|m| m.timeframe.as_str()));
        for task in self.scheduler.due_tasks(ctx.current_dt(), tolerance, &self.calendar) {
            ctx.check_deadline()?;
            tracing::debug!(exec_id = %ctx.exec_id(), task = %task.name, point = %task.time_point, "running scheduled task");
            (task.callback())(ctx)?;
        }

        let Some(handle_bar) = &self.module.handle_bar else {
            return Ok(());
        };
        match primary.and_then(|m| m.latest_bar()) {
            Some(bar) => {
                ctx.check_deadline()?;
                handle_bar(ctx, bar)
            }
            None => {
                ctx.warn("market-data trigger without bars: handle_bar skipped");
                Ok(())
            }
        }
    }

    fn dispatch_order_status(&self, ctx: &Context) -> StrategyResult {
        let Some(on_order) = &self.module.on_order else {
            return Ok(());
        };
        let changed = &ctx.request().trigger_detail.orders;
        let orders: &[Order] = if changed.is_empty() {
            // Gateways that omit the changed order: report the oldest open one.
            let open = ctx.incomplete_orders();
            &open[..open.len().min(1)]
        } else {
            changed
        };
        if orders.is_empty() {
            ctx.warn("order-status trigger without orders: on_order skipped");
        }
        for order in orders {
            ctx.check_deadline()?;
            on_order(ctx, order)?;
        }
        Ok(())
    }

    fn dispatch_risk_event(&self, ctx: &Context) -> StrategyResult {
        let Some(on_risk_event) = &self.module.on_risk_event else {
            return Ok(());
        };
        let event = ctx.request().trigger_detail.risk_event.clone().unwrap_or_else(|| RiskEvent {
            event_type: "UNKNOWN".to_string(),
            remark: String::new(),
            symbol: None,
        });
        on_risk_event(ctx, &event)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

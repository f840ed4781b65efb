//! StratExec Core — strategy execution engine.
//!
//! One exec call takes a snapshot request (trigger, market data, account,
//! orders), runs the loaded strategy's callbacks against it and returns the
//! order operations the strategy asked for:
//! - Domain types (bars, orders, accounts, market types, ids)
//! - Exec request/response wire types
//! - Per-call [`context::Context`] with order helpers and data access
//! - Thread-local [`registry`] plus [`compat`] free functions
//! - Lifecycle [`dispatcher`] and daily [`scheduler`] with trading calendars
//! - Multi-strategy [`service`] with exec id idempotency

pub mod compat;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod domain;
pub mod exec;
pub mod log;
pub mod registry;
pub mod rng;
pub mod scheduler;
pub mod service;
pub mod strategy;

pub use config::EngineConfig;
pub use context::{Context, ContextError, OrderRequest, PriceQuery};
pub use dispatcher::{Dispatcher, Health, LifecycleState};
pub use exec::{ExecRequest, ExecResponse, ExecStatus};
pub use service::ExecService;
pub use strategy::{Setup, StrategyError, StrategyModule, StrategyResult};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything that crosses threads in the service
    /// is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::Order>();
        require_sync::<domain::Order>();
        require_send::<domain::Account>();
        require_sync::<domain::Account>();
        require_send::<domain::MarketType>();
        require_sync::<domain::MarketType>();
        require_send::<domain::StrategyKey>();
        require_sync::<domain::StrategyKey>();

        // Wire types
        require_send::<ExecRequest>();
        require_sync::<ExecRequest>();
        require_send::<ExecResponse>();
        require_sync::<ExecResponse>();

        // Engine types
        require_send::<StrategyModule>();
        require_sync::<StrategyModule>();
        require_send::<Dispatcher>();
        require_send::<ExecService>();
        require_sync::<ExecService>();
        require_send::<EngineConfig>();
        require_sync::<EngineConfig>();
        require_send::<scheduler::TradeCalendar>();
        require_sync::<scheduler::TradeCalendar>();
        require_send::<rng::RngHierarchy>();
        require_sync::<rng::RngHierarchy>();
    }

    /// Strategy code reaches the context only through `&Context`; the type
    /// itself must stay on the exec thread.
    #[test]
    fn callbacks_take_shared_context() {
        fn _check(module: &StrategyModule, ctx: &Context, bar: &domain::Bar) -> StrategyResult {
            match &module.handle_bar {
                Some(f) => f(ctx, bar),
                None => Ok(()),
            }
        }
    }
}

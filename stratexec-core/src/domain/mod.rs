//! Domain types shared by the exec path and the backtest driver.

pub mod account;
pub mod bar;
pub mod ids;
pub mod market;
pub mod order;
pub mod timeframe;

pub use account::{Account, AccountError, Balance, Position, PositionSide};
pub use bar::Bar;
pub use ids::{ExecId, OrderId, StrategyKey, UniqueId};
pub use market::{MarketType, MarketTypeError, SessionMarket};
pub use order::{Order, OrderError, OrderKind, OrderSide, OrderStatus, TimeInForce};
pub use timeframe::parse_timeframe;

/// Symbol type alias
pub type Symbol = String;

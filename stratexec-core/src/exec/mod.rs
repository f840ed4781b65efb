//! Exec call wire types.

pub mod request;
pub mod response;

pub use request::{
    timeout_duration, ExecRequest, MarketDataContext, RequestError, RiskEvent, TriggerDetail, TriggerKind,
};
pub use response::{Decision, ExecResponse, ExecStatus, OrderOp, OrderOpEvent};

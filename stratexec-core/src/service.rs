//! Exec service — many strategies, many accounts, one entry point.
//!
//! Each (account, strategy) pair gets its own [`Dispatcher`], created lazily
//! on first request and serialized behind a mutex so lifecycle state and
//! `initialize` stay per-pair. Different pairs run in parallel; the service is
//! `Send + Sync` and [`ExecService::execute_batch`] fans requests out over the
//! rayon pool.
//!
//! Responses are remembered per pair by exec id: a retried request returns
//! the first response without re-running strategy code.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use rayon::prelude::*;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::dispatcher::{Dispatcher, Health};
use crate::domain::{ExecId, StrategyKey};
use crate::exec::{ExecRequest, ExecResponse};
use crate::log::LogSink;
use crate::scheduler::TradeCalendar;
use crate::strategy::{LoadError, StrategyModule};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("unknown strategy '{0}'")]
    UnknownStrategy(String),

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Bounded exec id → response memory, oldest evicted first.
#[derive(Debug, Default)]
struct ResponseCache {
    capacity: usize,
    order: VecDeque<ExecId>,
    responses: BTreeMap<ExecId, ExecResponse>,
}

impl ResponseCache {
    fn new(capacity: usize) -> Self {
        Self { capacity, ..Self::default() }
    }

    fn get(&self, id: &ExecId) -> Option<&ExecResponse> {
        self.responses.get(id)
    }

    fn insert(&mut self, response: ExecResponse) {
        if self.capacity == 0 || self.responses.contains_key(&response.exec_id) {
            return;
        }
        while self.order.len() >= self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.responses.remove(&old);
            }
        }
        self.order.push_back(response.exec_id.clone());
        self.responses.insert(response.exec_id.clone(), response);
    }
}

struct Slot {
    dispatcher: Dispatcher,
    cache: ResponseCache,
}

pub struct ExecService {
    modules: BTreeMap<String, Arc<StrategyModule>>,
    slots: DashMap<StrategyKey, Arc<Mutex<Slot>>>,
    config: EngineConfig,
    calendar: Arc<TradeCalendar>,
    log_sink: LogSink,
}

impl ExecService {
    pub fn new(config: EngineConfig) -> Self {
        let calendar = config.load_calendar();
        Self::with_calendar(config, calendar)
    }

    pub fn with_calendar(config: EngineConfig, calendar: Arc<TradeCalendar>) -> Self {
        Self {
            modules: BTreeMap::new(),
            slots: DashMap::new(),
            log_sink: config.log_sink(),
            config,
            calendar,
        }
    }

    pub fn with_log_sink(mut self, sink: LogSink) -> Self {
        self.log_sink = sink;
        self
    }

    /// Make `module` available under its name. Fails when the module has no
    /// `initialize`.
    pub fn register_strategy(&mut self, module: StrategyModule) -> Result<(), LoadError> {
        module.validate()?;
        tracing::info!(strategy = module.name(), "strategy registered");
        self.modules.insert(module.name().to_string(), Arc::new(module));
        Ok(())
    }

    pub fn strategies(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Run one request. The request's `strategy_id` selects the module and,
    /// with `account_id`, the dispatcher instance.
    pub fn execute(&self, request: ExecRequest) -> ExecResponse {
        let key = StrategyKey::new(request.account_id.clone(), request.strategy_id.clone());
        let slot = match self.slot(&key) {
            Ok(slot) => slot,
            Err(e) => return ExecResponse::failed(request.exec_id, e.to_string()),
        };
        // A panic inside the dispatcher is already caught; poisoning only
        // means a previous holder unwound while not in strategy code.
        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(cached) = slot.cache.get(&request.exec_id) {
            tracing::debug!(exec_id = %request.exec_id, %key, "replaying cached response");
            return cached.clone();
        }
        let response = slot.dispatcher.execute(request);
        slot.cache.insert(response.clone());
        response
    }

    /// Run requests in parallel, preserving input order in the output.
    pub fn execute_batch(&self, requests: Vec<ExecRequest>) -> Vec<ExecResponse> {
        requests.into_par_iter().map(|r| self.execute(r)).collect()
    }

    /// Lifecycle health of a pair, if it has received any request.
    pub fn health(&self, key: &StrategyKey) -> Option<Health> {
        let slot = self.slots.get(key)?.value().clone();
        let slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        Some(slot.dispatcher.health())
    }

    /// Drop a pair's dispatcher; its next request initializes afresh.
    pub fn unload(&self, key: &StrategyKey) -> bool {
        self.slots.remove(key).is_some()
    }

    fn slot(&self, key: &StrategyKey) -> Result<Arc<Mutex<Slot>>, ServiceError> {
        if let Some(slot) = self.slots.get(key) {
            return Ok(slot.value().clone());
        }
        let module = self
            .modules
            .get(&key.strategy)
            .cloned()
            .ok_or_else(|| ServiceError::UnknownStrategy(key.strategy.clone()))?;
        let entry = self.slots.entry(key.clone()).or_try_insert_with(|| {
            let dispatcher = Dispatcher::load(module, self.config.clone(), Arc::clone(&self.calendar))?
                .with_log_sink(self.log_sink.clone());
            Ok::<_, ServiceError>(Arc::new(Mutex::new(Slot {
                dispatcher,
                cache: ResponseCache::new(self.config.idempotency_cache_size),
            })))
        })?;
        Ok(entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Account, Bar};
    use crate::exec::{ExecStatus, MarketDataContext};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(exec_id: &str, account: &str, strategy: &str) -> ExecRequest {
        let bar = Bar {
            open_time: 0,
            close_time: 59_999,
            open: 10.0,
            high: 10.0,
            low: 10.0,
            close: 10.0,
            volume: 1.0,
        };
        let mut req = ExecRequest::market_data(exec_id, vec![MarketDataContext::new("BTCUSDT", "1m", vec![bar])]);
        req.account_id = account.into();
        req.strategy_id = strategy.into();
        req.account = Account::with_cash("USDT", 1_000.0);
        req
    }

    fn counting_service(calls: Arc<AtomicUsize>) -> ExecService {
        let mut svc = ExecService::with_calendar(EngineConfig::default(), Arc::new(TradeCalendar::builtin()))
            .with_log_sink(LogSink::Discard);
        svc.register_strategy(
            StrategyModule::new("buyer")
                .initialize(|_| Ok(()))
                .handle_bar(move |ctx, _| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    ctx.order_buy("BTCUSDT", 1.0, None)?;
                    Ok(())
                }),
        )
        .unwrap();
        svc
    }

    #[test]
    fn unknown_strategy_fails_response() {
        let svc = counting_service(Arc::new(AtomicUsize::new(0)));
        let resp = svc.execute(request("e1", "acc", "nope"));
        assert_eq!(resp.status, ExecStatus::Failed);
        assert!(resp.error_message.unwrap().contains("unknown strategy"));
    }

    #[test]
    fn repeated_exec_id_replays_response() {
        let calls = Arc::new(AtomicUsize::new(0));
        let svc = counting_service(Arc::clone(&calls));
        let first = svc.execute(request("e1", "acc", "buyer"));
        let again = svc.execute(request("e1", "acc", "buyer"));
        assert_eq!(first, again);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Same exec id on another account is a different call.
        svc.execute(request("e1", "other", "buyer"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn batch_preserves_order_and_isolates_pairs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let svc = counting_service(Arc::clone(&calls));
        let reqs: Vec<_> = (0..32).map(|i| request(&format!("e{i}"), &format!("acc{}", i % 4), "buyer")).collect();
        let resps = svc.execute_batch(reqs);
        assert_eq!(resps.len(), 32);
        for (i, r) in resps.iter().enumerate() {
            assert_eq!(r.exec_id.0, format!("e{i}"));
            assert!(r.is_success());
            assert_eq!(r.events.len(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 32);
        assert_eq!(svc.health(&StrategyKey::new("acc0", "buyer")), Some(Health::Ready));
        assert_eq!(svc.health(&StrategyKey::new("acc9", "buyer")), None);
    }

    #[test]
    fn cache_evicts_oldest() {
        let mut cache = ResponseCache::new(2);
        for id in ["a", "b", "c"] {
            cache.insert(ExecResponse::failed(ExecId::new(id), "x"));
        }
        assert!(cache.get(&ExecId::new("a")).is_none());
        assert!(cache.get(&ExecId::new("c")).is_some());
    }

    #[test]
    fn register_rejects_module_without_initialize() {
        let mut svc = ExecService::with_calendar(EngineConfig::default(), Arc::new(TradeCalendar::empty()));
        assert!(svc.register_strategy(StrategyModule::new("bare")).is_err());
        assert_eq!(svc.strategies().count(), 0);
    }
}

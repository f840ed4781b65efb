//! Per-thread registry of the active execution scope.
//!
//! The dispatcher registers an [`ExecutionScope`] (context, `g`, `log`)
//! before running strategy callbacks and the returned [`RegistryGuard`]
//! clears it on drop, including during unwinding. Helper functions in
//! [`crate::compat`] reach the active context through [`current`].
//!
//! The slot is thread-local: concurrent exec calls on different threads never
//! observe each other's scope.

use std::cell::{Ref, RefCell, RefMut};
use std::marker::PhantomData;
use std::rc::Rc;

use thiserror::Error;

use crate::context::Context;
use crate::log::StrategyLog;

/// Free-form attribute bag (`g`), fresh for every exec call.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no active execution context on this thread")]
    NoActiveContext,

    #[error("an execution context is already active on this thread")]
    AlreadyActive,
}

/// Everything strategy code can reach during one exec call.
pub struct ExecutionScope {
    context: Context,
    g: RefCell<Attributes>,
    log: StrategyLog,
}

impl ExecutionScope {
    pub fn new(context: Context, log: StrategyLog) -> Self {
        Self { context, g: RefCell::new(Attributes::new()), log }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn log(&self) -> &StrategyLog {
        &self.log
    }

    pub fn g(&self) -> Ref<'_, Attributes> {
        self.g.borrow()
    }

    pub fn g_mut(&self) -> RefMut<'_, Attributes> {
        self.g.borrow_mut()
    }
}

thread_local! {
    static ACTIVE: RefCell<Option<Rc<ExecutionScope>>> = const { RefCell::new(None) };
}

/// Clears the thread's registry slot when dropped.
#[must_use = "dropping the guard immediately clears the registry"]
pub struct RegistryGuard {
    // Tied to the registering thread.
    _not_send: PhantomData<Rc<()>>,
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        clear();
    }
}

/// Bind `scope` to the calling thread.
pub fn register(scope: Rc<ExecutionScope>) -> Result<RegistryGuard, RegistryError> {
    ACTIVE.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_some() {
            return Err(RegistryError::AlreadyActive);
        }
        *slot = Some(scope);
        Ok(RegistryGuard { _not_send: PhantomData })
    })
}

/// The scope bound to the calling thread.
pub fn current() -> Result<Rc<ExecutionScope>, RegistryError> {
    ACTIVE.with(|slot| slot.borrow().clone().ok_or(RegistryError::NoActiveContext))
}

/// Unbind unconditionally.
pub fn clear() {
    ACTIVE.with(|slot| {
        slot.borrow_mut().take();
    });
}

pub fn is_active() -> bool {
    ACTIVE.with(|slot| slot.borrow().is_some())
}

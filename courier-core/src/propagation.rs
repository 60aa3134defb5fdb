//! Correlation propagation across execution boundaries.
//!
//! Two storage slots exist:
//!
//! - a thread-local slot for blocking code, installed with [`enter`] or
//!   [`restore`] and torn down by dropping the returned [`ContextGuard`];
//! - a task-local slot for async code, installed with [`scope`] or [`bind`]
//!   and re-applied by the runtime every time the future is polled, whichever
//!   worker thread polls it.
//!
//! Crossing a boundary always goes through a value: the submitting side calls
//! [`snapshot`] (or [`decorate`] / [`bind`], which do it for you), and the
//! executing side restores it before doing any work.
//!
//! ```
//! use courier_core::{propagation, CorrelationContext};
//!
//! let ctx = CorrelationContext::with_id("req-1");
//! let _guard = propagation::enter(&ctx);
//!
//! let job = propagation::decorate(|| propagation::current().map(|c| c.correlation_id().to_string()));
//! let seen = std::thread::spawn(job).join().unwrap();
//! assert_eq!(seen.as_deref(), Some("req-1"));
//! ```

use crate::{ContextSnapshot, CorrelationContext};
use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;

thread_local! {
    static ACTIVE: RefCell<Option<CorrelationContext>> = const { RefCell::new(None) };
}

tokio::task_local! {
    static TASK_CONTEXT: Option<CorrelationContext>;
}

/// The context active for the current execution unit.
///
/// A task-local scope takes precedence over the thread-local slot, so async
/// code never observes whatever a previous task left on a runtime thread.
pub fn current() -> Option<CorrelationContext> {
    if let Ok(scoped) = TASK_CONTEXT.try_with(Clone::clone) {
        return scoped;
    }
    ACTIVE.try_with(|slot| slot.borrow().clone()).ok().flatten()
}

/// Capture the active values for handoff. Empty when nothing is active.
pub fn snapshot() -> ContextSnapshot {
    current()
        .map(|ctx| ctx.to_snapshot())
        .unwrap_or_default()
}

/// Install a snapshot on the current thread.
///
/// A snapshot without a usable id installs "no correlation id" rather than
/// failing. Dropping the guard reinstates whatever was active before, which on
/// a pool thread means nothing.
pub fn restore(snapshot: &ContextSnapshot) -> ContextGuard {
    let ctx = CorrelationContext::from_snapshot(snapshot);
    if ctx.is_none() && !snapshot.is_empty() {
        tracing::debug!("Snapshot carried no correlation id, continuing without one");
    }
    install(ctx)
}

/// Install a context on the current thread.
pub fn enter(ctx: &CorrelationContext) -> ContextGuard {
    install(Some(ctx.clone()))
}

/// Remove any context from the current thread.
pub fn clear() {
    let _ = ACTIVE.try_with(|slot| slot.borrow_mut().take());
}

fn install(ctx: Option<CorrelationContext>) -> ContextGuard {
    let previous = ACTIVE.try_with(|slot| slot.replace(ctx)).ok().flatten();
    ContextGuard {
        previous,
        _not_send: PhantomData,
    }
}

/// Restores the previous thread-local context when dropped, including on unwind.
#[must_use = "the context is removed as soon as the guard is dropped"]
pub struct ContextGuard {
    previous: Option<CorrelationContext>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let _ = ACTIVE.try_with(|slot| *slot.borrow_mut() = previous);
    }
}

/// Run a blocking closure with `ctx` installed on this thread.
pub fn sync_scope<R>(ctx: &CorrelationContext, f: impl FnOnce() -> R) -> R {
    let _guard = enter(ctx);
    f()
}

/// Wrap a closure so it runs under the context active *now*, wherever it runs later.
pub fn decorate<F, R>(f: F) -> impl FnOnce() -> R + Send + 'static
where
    F: FnOnce() -> R + Send + 'static,
{
    let captured = snapshot();
    move || {
        let _guard = restore(&captured);
        f()
    }
}

/// Run a future with `ctx` as its task-local context.
pub fn scope<F: Future>(ctx: CorrelationContext, fut: F) -> impl Future<Output = F::Output> {
    TASK_CONTEXT.scope(Some(ctx), fut)
}

/// Bind a future to the context active at the time of this call.
pub fn bind<F: Future>(fut: F) -> impl Future<Output = F::Output> {
    TASK_CONTEXT.scope(current(), fut)
}

/// Spawn a task that inherits the caller's context.
pub fn spawn<F>(fut: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(bind(fut))
}

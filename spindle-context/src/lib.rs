#![deny(missing_docs)]
//! Request-scoped ambient context for the spindle kernel.
//!
//! A [`KernelContext`] travels implicitly with every operation of one
//! logical request: ids, principal, metrics, the per-request event bus,
//! the cancellation signal, the procedure-graph cursor, and channel
//! access. Storage is `tokio::task_local!`, so the context survives
//! `.await` points (including under multi-thread work-stealing
//! runtimes) without an explicit parameter on the caller's chain.
//!
//! Forking ([`KernelContext::child`] / [`fork`]) shallow-copies the
//! record: shared fields (`events`, `signal`, graph, channels) alias
//! the parent, scalar cursor fields are replaced. Sibling forks running
//! on overlapping timelines never observe each other's overrides.

mod bus;
mod context;
mod service;

pub use bus::{EventBus, EventHandler, Subscription};
pub use context::{
    ContextOverrides, KernelContext, MetricsHandle, Principal, current, emit, fork, run, run_sync,
    try_current,
};
pub use service::{ChannelEventHandler, ChannelPort, ChannelService, Unsubscribe};

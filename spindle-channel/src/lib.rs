//! Pub/sub channels, channel sessions, and the tool coordinators.
//!
//! A [`Channel`] is a named topic with synchronous FIFO delivery,
//! request/response correlation (with a short grace cache for early
//! responses), and destroy semantics that reject every pending waiter.
//! A [`ChannelSession`] groups channels under a per-request session key;
//! [`SessionChannelService`] is the in-process implementation of the
//! transport boundary trait
//! ([`ChannelService`](spindle_context::ChannelService)).
//!
//! The two coordinators sit on top: [`ConfirmationCoordinator`] parks
//! tool calls awaiting human approval (no timeout — human-in-the-loop),
//! and [`ClientToolCoordinator`] parks calls whose results are produced
//! client-side (bounded by a per-call timeout).

mod channel;
mod client_result;
mod confirmation;
mod session;

pub use channel::{Channel, DEFAULT_RESPONSE_TIMEOUT, RESPONSE_CACHE_TTL};
pub use client_result::{ClientToolCoordinator, DEFAULT_CLIENT_TIMEOUT};
pub use confirmation::ConfirmationCoordinator;
pub use session::{ChannelSession, SessionChannelService};

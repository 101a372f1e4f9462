#![deny(missing_docs)]
//! Callable middleware-pipeline procedures for the spindle kernel.
//!
//! A [`Procedure`] wraps a handler with input validation, a timeout, an
//! ordered middleware chain, and execution tracking. Composition
//! methods ([`Procedure::use_mw`], [`Procedure::pipe`],
//! [`Procedure::with_timeout`], [`Procedure::with_context`],
//! [`Procedure::with_handle`]) each return a new procedure and leave
//! the original untouched.
//!
//! Middleware follows the axum `from_fn` shape: each middleware gets
//! the args, the call [`Envelope`], and a consumed-on-use [`Next`];
//! passing transformed args to `next.run` rewrites the input for the
//! rest of the chain.

mod handle;
mod middleware;
mod procedure;
mod validator;

pub use handle::{ExecutionHandle, HandleInvocation};
pub use middleware::{
    Envelope, HandlerFn, Next, Pipeline, ProcedureMiddleware, ProcedureResult, SourceType,
    middleware_fn,
};
pub use procedure::{HandledProcedure, Procedure, ProcedureBuilder};
pub use validator::Validator;

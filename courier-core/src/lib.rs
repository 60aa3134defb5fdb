//! Correlation context and failure taxonomy for Courier
//!
//! This crate holds the pieces every other Courier crate agrees on:
//!
//! - **Correlation** - [`CorrelationContext`], an immutable request-scoped id,
//!   and [`ContextSnapshot`], its plain-value form for crossing boundaries
//! - **Propagation** - thread-local and task-local storage with explicit
//!   snapshot/restore/clear, plus helpers that decorate closures and futures
//! - **Inbound middleware** - [`CorrelationLayer`], a `tower` layer that
//!   inherits or generates the id and echoes it on the response
//! - **Failure taxonomy** - [`FailureKind`], the closed set of failure kinds
//!
//! # Quick Start
//!
//! ```
//! use courier_core::{propagation, CorrelationContext};
//!
//! # async fn example() {
//! let ctx = CorrelationContext::ensure(None);
//! let id = ctx.correlation_id().to_string();
//!
//! let seen = propagation::scope(ctx, async {
//!     propagation::current().map(|c| c.correlation_id().to_string())
//! })
//! .await;
//!
//! assert_eq!(seen, Some(id));
//! # }
//! ```

pub mod correlation;
pub mod failure;
pub mod layer;
pub mod propagation;

pub use correlation::{CORRELATION_ID_KEY, ContextSnapshot, CorrelationContext, headers};
pub use failure::FailureKind;
pub use layer::{CorrelationLayer, CorrelationService};
pub use propagation::ContextGuard;

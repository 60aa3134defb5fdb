//! Audit records for outbound calls
//!
//! This crate turns each finished logical call into one redacted, structured
//! audit record and delivers it without blocking the caller.
//!
//! # Features
//!
//! - **Audit Events** - One [`AuditEvent`] per logical call, with every [`CallAttempt`]
//! - **Data Masking** - Sensitive fields and PII shapes masked before delivery
//! - **Truncation** - Body summaries capped at a configured length
//! - **Non-blocking Delivery** - Bounded queue drained by a background worker
//! - **Multiple Sinks** - File, memory, log stream, fan-out
//!
//! # Quick Start
//!
//! ```no_run
//! use courier_audit::*;
//!
//! # async fn example() {
//! let pipeline = AuditPipeline::builder()
//!     .sink(FileSink::new("audit.log"))
//!     .config(&AuditConfig::default())
//!     .spawn();
//!
//! pipeline.record(
//!     AuditEvent::new("GET", "https://api.example.com/users")
//!         .correlation_id("abc-123")
//!         .final_outcome(AttemptOutcome::Success)
//!         .status_code(200),
//! );
//! pipeline.flush().await;
//! # }
//! ```

pub mod config;
pub mod event;
pub mod masking;
pub mod pipeline;
pub mod sink;

pub use config::*;
pub use event::*;
pub use masking::*;
pub use pipeline::*;
pub use sink::*;

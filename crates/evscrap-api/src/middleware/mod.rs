//! # Middleware Stack
//!
//! Tower middleware for the API layer:
//! - [`request_context`]: correlation ids, per-request span and completion log.
//! - [`tracing_layer`]: `TraceLayer` for HTTP-level spans.

pub mod request_context;
pub mod tracing_layer;

//! Structured logging support.

pub mod trace_context;

pub use trace_context::{generate_trace_id, RequestSpan, TraceContext};

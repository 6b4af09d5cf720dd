//! Request correlation
//!
//! Generates short trace ids and carries per-request context so every log
//! line for a request can be tied together.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, info_span, Span};

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Short, unique trace id: 6 hex characters.
pub fn generate_trace_id() -> String {
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);
    let mixed = counter.wrapping_add(timestamp);
    format!("{:06x}", mixed & 0xFFFFFF)
}

/// Correlation data for a single request.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
    pub method: String,
    pub path: String,
    /// JSON-RPC method when the body carried one.
    pub rpc_method: Option<String>,
    /// Authenticated subject, once known.
    pub subject: Option<String>,
    pub started_at: std::time::Instant,
}

impl TraceContext {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            trace_id: generate_trace_id(),
            method: method.to_string(),
            path: path.to_string(),
            rpc_method: None,
            subject: None,
            started_at: std::time::Instant::now(),
        }
    }

    pub fn with_rpc_method(mut self, method: Option<String>) -> Self {
        self.rpc_method = method;
        self
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Subject truncated for log lines.
    pub fn short_subject(&self) -> &str {
        self.subject
            .as_deref()
            .map(|s| &s[..s.len().min(16)])
            .unwrap_or("anon")
    }
}

/// Span and entry/exit lines for request logging.
pub struct RequestSpan;

impl RequestSpan {
    pub fn enter(ctx: &TraceContext) -> Span {
        info_span!(
            "request",
            trace_id = %ctx.trace_id,
            method = %ctx.method,
            path = %ctx.path,
        )
    }

    pub fn log_entry(ctx: &TraceContext) {
        match ctx.rpc_method.as_deref() {
            Some(rpc) => info!(
                trace_id = %ctx.trace_id,
                "→ {} {} {} subject={}",
                ctx.method,
                ctx.path,
                rpc,
                ctx.short_subject()
            ),
            None => info!(trace_id = %ctx.trace_id, "→ {} {}", ctx.method, ctx.path),
        }
    }

    pub fn log_exit(ctx: &TraceContext, status: u16) {
        info!(trace_id = %ctx.trace_id, "← {} ({}ms)", status, ctx.elapsed_ms());
    }
}

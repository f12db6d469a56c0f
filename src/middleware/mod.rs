//! HTTP middleware
//!
//! Request tracing with per-request correlation ids.

mod tracing;

pub use tracing::{request_tracing, TraceId, TRACE_ID_HEADER};

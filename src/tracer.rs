//! Thin facade over `tracing` (§9 Design Notes): lets tests assert that a
//! `DecodingError`/`UnexpectedReadError` was surfaced "once via a tracer"
//! (§7) without parsing log output.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub trait Tracer: Send + Sync {
    fn connection_error(&self, peer: &str, message: &str);
}

pub struct TracingTracer;

impl Tracer for TracingTracer {
    fn connection_error(&self, peer: &str, message: &str) {
        tracing::error!(peer, message, "connection terminated");
    }
}

#[derive(Default)]
pub struct CountingTracer {
    count: AtomicUsize,
}

impl CountingTracer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fired_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Tracer for CountingTracer {
    fn connection_error(&self, peer: &str, message: &str) {
        self.count.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(peer, message, "connection terminated (test tracer)");
    }
}

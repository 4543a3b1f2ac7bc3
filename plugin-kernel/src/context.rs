//! # Invocation Context
//!
//! The per-call record threaded through the governance kernel and the
//! routing proxy. Pooled per-thread (a stack, so nested calls push/pop
//! without allocating) and scrubbed on return so nothing retains a pooled
//! context's large fields across unrelated calls.

use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use plugin_kernel_sdk::routing::Labels;
use plugin_kernel_sdk::AccessType;

/// The kind of boundary a call crosses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceType {
    Rpc,
    Http,
    Database,
    Cache,
    Ipc,
    Other(String),
}

/// Per-call record. Reset on each checkout from the pool; `args`,
/// `metadata`, and `labels` are explicitly cleared in `scrub` so a pooled
/// object never leaks a prior call's references into the next one.
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    pub trace_id: String,
    pub caller_plugin_id: String,
    pub target_plugin_id: String,
    pub resource_type: Option<ResourceType>,
    pub resource_id: String,
    pub operation: String,
    pub args: Option<Vec<Value>>,
    pub required_permission: String,
    pub access_type: Option<AccessType>,
    pub audit_action: String,
    pub should_audit: bool,
    pub labels: Labels,
    pub metadata: Option<HashMap<String, String>>,
    pub timeout: Option<Duration>,
}

impl InvocationContext {
    /// Reset every field to its default, ready for a new call. Keeping this
    /// as one explicit method (rather than relying on `Default::default()`
    /// at the call site) makes the reset-on-checkout contract visible at
    /// the pool boundary.
    pub fn reset(&mut self) {
        *self = InvocationContext::default();
    }

    /// Null out the large/reference-bearing fields. Called in a `finally`
    /// block at the end of every `invoke`/proxy call, independent of
    /// success or failure, so a pooled context never retains them past the
    /// call that populated them.
    pub fn scrub(&mut self) {
        self.args = None;
        self.labels = Labels::new();
        self.metadata = None;
    }

    pub fn is_scrubbed(&self) -> bool {
        self.args.is_none() && self.labels.is_empty() && self.metadata.is_none()
    }
}

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<InvocationContext>> = const { RefCell::new(Vec::new()) };
}

/// RAII guard around a pooled context: on `Drop`, the context is scrubbed
/// and pushed back onto this thread's stack for reuse, regardless of
/// whether the call returned normally, early, or via panic unwinding.
pub struct PooledContext {
    ctx: Option<InvocationContext>,
}

impl PooledContext {
    /// Pop a reset context off this thread's stack, or allocate a fresh one
    /// if the stack is empty (first call on this thread, or every pooled
    /// context already checked out by a still-running nested call).
    pub fn acquire() -> Self {
        let ctx = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());
        let mut ctx = ctx.unwrap_or_default();
        ctx.reset();
        Self { ctx: Some(ctx) }
    }
}

impl std::ops::Deref for PooledContext {
    type Target = InvocationContext;
    fn deref(&self) -> &Self::Target {
        self.ctx.as_ref().expect("context taken before drop")
    }
}

impl std::ops::DerefMut for PooledContext {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx.as_mut().expect("context taken before drop")
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            ctx.scrub();
            CONTEXT_STACK.with(|stack| stack.borrow_mut().push(ctx));
        }
    }
}

/// Per-thread nesting depth for trace propagation: incremented when a
/// nested invocation begins under an existing trace id, decremented on
/// return, cleared when it reaches zero. `invoke` must leave this exactly
/// as it found it, even nested arbitrarily deep.
thread_local! {
    static TRACE_DEPTH: std::cell::Cell<u32> = const { std::cell::Cell::new(0) };
}

pub fn trace_depth() -> u32 {
    TRACE_DEPTH.with(|d| d.get())
}

/// RAII guard incrementing trace depth on construction and decrementing on
/// drop, so depth is restored under early returns and panics alike.
pub struct TraceDepthGuard;

impl TraceDepthGuard {
    pub fn enter() -> Self {
        TRACE_DEPTH.with(|d| d.set(d.get() + 1));
        Self
    }
}

impl Drop for TraceDepthGuard {
    fn drop(&mut self) {
        TRACE_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

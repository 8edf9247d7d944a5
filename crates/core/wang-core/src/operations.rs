//! Cancellation scopes for slow, killable upstream calls
//!
//! Speech synthesis, AI completions, image work and media downloads each run
//! under their own [`CancellationToken`], independent of the guild's voice session so an
//! operation can outlive connection churn. `!kill` cancels both families.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::types::TenantId;
use crate::{Result, WangError};

/// Kind of slow call an operation wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Text-to-speech synthesis
    Speech,
    /// Generative-text completion
    Completion,
    /// Remote media download
    Download,
    /// Question about an attached image
    Vision,
    /// Image generation
    ImageGeneration,
}

impl OperationKind {
    /// Prefix used in operation ids
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Speech => "tts",
            Self::Completion => "gemini",
            Self::Download => "youtube",
            Self::Vision => "vision",
            Self::ImageGeneration => "image",
        }
    }
}

static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

/// `{kind}_{tenant}_{timestamp}` operation id.
///
/// `seq` keeps two operations started in the same millisecond apart; it is
/// not part of the rendered id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationId {
    /// What the operation does
    pub kind: OperationKind,
    /// Guild that started it
    pub tenant: TenantId,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    seq: u64,
}

impl OperationId {
    /// Fresh id stamped with the current time
    pub fn new(kind: OperationKind, tenant: TenantId) -> Self {
        Self {
            kind,
            tenant,
            timestamp: chrono::Utc::now().timestamp_millis(),
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.kind.as_str(), self.tenant, self.timestamp)
    }
}

/// Map of live operation scopes
#[derive(Default)]
pub struct OperationRegistry {
    ops: Mutex<HashMap<OperationId, CancellationToken>>,
}

impl OperationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new scope; the caller must eventually [`end`](Self::end) it
    pub fn begin(&self, id: OperationId) -> CancellationToken {
        let token = CancellationToken::new();
        debug!(operation = %id, "Operation started");
        self.ops.lock().insert(id, token.clone());
        token
    }

    /// Cancel and forget `id`. Idempotent.
    pub fn end(&self, id: &OperationId) {
        if let Some(token) = self.ops.lock().remove(id) {
            token.cancel();
            debug!(operation = %id, "Operation ended");
        }
    }

    /// Cancel and remove every operation matching `predicate`
    pub fn kill_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&OperationId) -> bool,
    {
        let mut ops = self.ops.lock();
        let doomed: Vec<OperationId> = ops.keys().filter(|id| predicate(id)).cloned().collect();
        for id in &doomed {
            if let Some(token) = ops.remove(id) {
                token.cancel();
                info!(operation = %id, "Operation killed");
            }
        }
        doomed.len()
    }

    /// Cancel and remove every operation started by `tenant`
    pub fn kill_tenant(&self, tenant: TenantId) -> usize {
        self.kill_matching(|id| id.tenant == tenant)
    }

    /// Cancel and remove everything
    pub fn kill_all(&self) -> usize {
        self.kill_matching(|_| true)
    }

    /// Number of live operations
    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }

    /// True when nothing is running
    pub fn is_empty(&self) -> bool {
        self.ops.lock().is_empty()
    }

    /// Whether `id` is still registered
    pub fn contains(&self, id: &OperationId) -> bool {
        self.ops.lock().contains_key(id)
    }

    /// Run `work` under a fresh operation scope and end the scope afterwards.
    ///
    /// `work` receives the scope's token and must pass it on to whatever
    /// network or subprocess call it makes. If the scope fires first the
    /// future is dropped and [`WangError::Cancelled`] is returned.
    pub async fn run<T, F, Fut>(&self, tenant: TenantId, kind: OperationKind, work: F) -> Result<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let id = OperationId::new(kind, tenant);
        let token = self.begin(id.clone());
        let _scope = ScopeGuard {
            registry: self,
            id: &id,
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(WangError::Cancelled),
            result = work(token.clone()) => match result {
                Err(_) if token.is_cancelled() => Err(WangError::Cancelled),
                other => other,
            },
        }
    }

    /// Spawn [`run`](Self::run) as its own task
    pub fn submit<T, F, Fut>(
        self: &Arc<Self>,
        tenant: TenantId,
        kind: OperationKind,
        work: F,
    ) -> JoinHandle<Result<T>>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let registry = Arc::clone(self);
        tokio::spawn(async move { registry.run(tenant, kind, work).await })
    }
}

/// Ends the operation on every exit path, including panics and drops
struct ScopeGuard<'a> {
    registry: &'a OperationRegistry,
    id: &'a OperationId,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.registry.end(self.id);
    }
}

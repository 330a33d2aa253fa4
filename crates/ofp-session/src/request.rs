//! Request contexts, their per-device quota and the reply future.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use ofp_wire::{MultipartReply, OfpMessage};
use thiserror::Error;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

use crate::xid::Xid;

/// Failure delivered on a request future.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("request quota exhausted")]
    QuotaExceeded,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("switch did not answer the echo keepalive; connection closed")]
    EchoTimeout,
    #[error("switch reported error type={err_type} code={code}")]
    Device { err_type: u16, code: u16 },
    #[error("write failed: {0}")]
    Write(String),
    #[error("xid {0} already has a pending request")]
    DuplicateXid(Xid),
    #[error("request abandoned before completion")]
    Cancelled,
    #[error("unexpected reply: {0}")]
    UnexpectedReply(&'static str),
}

/// Raw outcome of a correlated request before it is mapped to the caller's type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Single reply message carrying the request's xid.
    Single(OfpMessage),
    /// Every fragment of a multipart reply, in arrival order.
    Multipart(Vec<MultipartReply>),
}

/// Per-device admission control for outstanding requests.
///
/// A context holds one permit from the stack until it is closed, so the
/// number of live contexts never exceeds the quota.
#[derive(Debug)]
pub struct RequestContextStack {
    permits: Arc<Semaphore>,
    quota: usize,
    rejected: AtomicU64,
}

impl RequestContextStack {
    pub fn new(quota: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(quota)),
            quota,
            rejected: AtomicU64::new(0),
        }
    }

    /// Reserve a slot and create a fresh context, or `None` when the quota is
    /// exhausted. Never blocks.
    pub fn create_request_context<T>(&self) -> Option<RequestContext<T>> {
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => Some(RequestContext::new(permit)),
            Err(_) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(quota = self.quota, "request quota exhausted");
                None
            }
        }
    }

    pub fn quota(&self) -> usize {
        self.quota
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Contexts currently holding a slot.
    pub fn outstanding(&self) -> usize {
        self.quota.saturating_sub(self.available())
    }

    /// Creation attempts refused because the quota was exhausted.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// One outstanding request: its xid, its single-assignment result and its
/// quota slot.
///
/// Dropping a context that never received a result fails its future with
/// [`RequestError::Cancelled`] and releases the slot.
#[derive(Debug)]
pub struct RequestContext<T> {
    xid: Option<Xid>,
    result_tx: Option<oneshot::Sender<Result<T, RequestError>>>,
    result_rx: Option<oneshot::Receiver<Result<T, RequestError>>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<T> RequestContext<T> {
    fn new(permit: OwnedSemaphorePermit) -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            xid: None,
            result_tx: Some(tx),
            result_rx: Some(rx),
            permit: Some(permit),
        }
    }

    pub fn xid(&self) -> Option<Xid> {
        self.xid
    }

    pub fn set_xid(&mut self, xid: Xid) {
        self.xid = Some(xid);
    }

    /// Future observing the result. Available exactly once.
    pub fn future(&mut self) -> Option<RequestFuture<T>> {
        self.result_rx.take().map(|rx| RequestFuture { rx })
    }

    /// Complete the request. Returns `false` if a result was already set.
    pub fn set_result(&mut self, result: Result<T, RequestError>) -> bool {
        match self.result_tx.take() {
            Some(tx) => {
                // The caller may have dropped its future; nothing to notify then.
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.result_tx.is_none()
    }

    /// Release the quota slot. Further calls are no-ops.
    pub fn close(&mut self) {
        if self.permit.take().is_some() {
            trace!(xid = ?self.xid, "request context closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.permit.is_none()
    }
}

impl<T> Drop for RequestContext<T> {
    fn drop(&mut self) {
        self.close();
        self.set_result(Err(RequestError::Cancelled));
    }
}

/// Future resolving to the result of one request.
#[derive(Debug)]
pub struct RequestFuture<T> {
    rx: oneshot::Receiver<Result<T, RequestError>>,
}

impl<T> RequestFuture<T> {
    /// Non-blocking check; `None` while the request is still pending.
    pub fn try_result(&mut self) -> Option<Result<T, RequestError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(RequestError::Cancelled)),
        }
    }

    /// Block the current thread until the result is available.
    ///
    /// Must not be called from within an async runtime worker.
    pub fn blocking_wait(self) -> Result<T, RequestError> {
        self.rx
            .blocking_recv()
            .unwrap_or(Err(RequestError::Cancelled))
    }
}

impl<T> Future for RequestFuture<T> {
    type Output = Result<T, RequestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(RequestError::Cancelled)))
    }
}

/// Type-erased pending request held in a connection's correlation table.
pub(crate) trait PendingRequest: Send {
    fn xid(&self) -> Option<Xid>;
    fn complete(self: Box<Self>, outcome: Result<Reply, RequestError>);
}

struct Pending<T, F> {
    ctx: RequestContext<T>,
    map: F,
}

impl<T, F> PendingRequest for Pending<T, F>
where
    T: Send + 'static,
    F: FnOnce(Reply) -> Result<T, RequestError> + Send + 'static,
{
    fn xid(&self) -> Option<Xid> {
        self.ctx.xid()
    }

    fn complete(self: Box<Self>, outcome: Result<Reply, RequestError>) {
        let Pending { mut ctx, map } = *self;
        // The slot is free before the caller can observe the result.
        ctx.close();
        ctx.set_result(outcome.and_then(map));
    }
}

pub(crate) fn pending<T, F>(ctx: RequestContext<T>, map: F) -> Box<dyn PendingRequest>
where
    T: Send + 'static,
    F: FnOnce(Reply) -> Result<T, RequestError> + Send + 'static,
{
    Box::new(Pending { ctx, map })
}

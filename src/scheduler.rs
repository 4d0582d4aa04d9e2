// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Dependency-tracked message scheduling.
//!
//! Every inbound message carries a dependency tag. The scheduler decides,
//! per task, which earlier in-flight tasks must complete (barrier) or at
//! least begin (FIFO order) before the new task's handler may begin, then
//! runs handlers as concurrent tasks. Within the dependency relation
//! everything runs in parallel; the scheduler is the sole arbiter of
//! ordering and there is no other shared mutable state between handlers.
//!
//! Cancellation runs on a separate lane that never queues behind regular
//! work. Handle publication and cancellation both go through the lane's
//! sequenced queue, so a cancel that arrives before its target's handle is
//! published is parked and fires the moment the handle appears.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lsp_types::Uri;
use tokio::sync::{Notify, mpsc, watch};
use tracing::{debug, trace};

use crate::error::Error;
use crate::protocol::{RequestId, ResponseError, ResponseMessage};

/// Dependency class of an inbound message, derived from its method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyTag {
    /// Total barrier: initialize, shutdown, configuration and workspace
    /// changes, registration changes, index polls.
    GlobalConfig,
    /// A mutation of one document's state.
    DocumentUpdate(Uri),
    /// A read of one document's state.
    DocumentRequest(Uri),
    /// Everything else; independent of document state.
    Freestanding,
}

/// How an earlier task constrains a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Constraint {
    /// The earlier task must complete first.
    Barrier,
    /// The earlier task's handler must begin first.
    BeginOrder,
    /// No constraint.
    None,
}

fn constraint(earlier: &DependencyTag, later: &DependencyTag) -> Constraint {
    use DependencyTag::{DocumentRequest, DocumentUpdate, GlobalConfig};
    match (earlier, later) {
        (GlobalConfig, _) | (_, GlobalConfig) => Constraint::Barrier,
        (DocumentUpdate(a), DocumentUpdate(b) | DocumentRequest(b)) if a == b => {
            Constraint::Barrier
        }
        // Same-document messages keep FIFO handler-begin order even when
        // they may overlap in flight.
        (DocumentRequest(a), DocumentUpdate(b) | DocumentRequest(b)) if a == b => {
            Constraint::BeginOrder
        }
        _ => Constraint::None,
    }
}

/// Cooperative cancellation flag shared between the lane and a handler.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<CancellationInner>,
}

struct CancellationInner {
    flag: AtomicBool,
    notify: Notify,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationInner {
                flag: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                break;
            }
            notified.await;
        }
    }
}

/// Reply slot that must be used exactly once.
///
/// Dropping an unreplied handle is a bug in the handler that owned it; a
/// debug build trips an assertion, a release build sends an internal error
/// so the editor is never left hanging.
pub struct ReplyHandle {
    id: RequestId,
    out: Option<mpsc::UnboundedSender<ResponseMessage>>,
}

impl ReplyHandle {
    #[must_use]
    pub fn new(id: RequestId, out: mpsc::UnboundedSender<ResponseMessage>) -> Self {
        Self { id, out: Some(out) }
    }

    /// The id this handle replies to.
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Sends the reply, consuming the handle.
    pub fn send(mut self, result: Result<serde_json::Value, Error>) {
        let out = self.out.take().expect("reply handle used twice");
        let message = match result {
            Ok(value) => ResponseMessage::success(self.id.clone(), value),
            Err(error) => ResponseMessage::failure(self.id.clone(), ResponseError::from(error)),
        };
        if out.send(message).is_err() {
            debug!("reply for {} dropped: transport closed", self.id);
        }
    }
}

impl Drop for ReplyHandle {
    fn drop(&mut self) {
        if let Some(out) = self.out.take() {
            debug_assert!(false, "request {} dropped without a reply", self.id);
            let message = ResponseMessage::failure(
                self.id.clone(),
                ResponseError {
                    code: crate::error::CODE_INTERNAL_ERROR,
                    message: "handler dropped the request without replying".to_string(),
                    data: None,
                },
            );
            let _ = out.send(message);
        }
    }
}

enum LaneOp {
    Publish(RequestId, CancellationToken),
    Cancel(RequestId),
    Finish(RequestId),
}

/// The high-priority cancellation lane.
///
/// All record-keeping for request-id → token lives on one sequenced queue
/// so publication and cancellation cannot race incoherently.
#[derive(Clone)]
pub struct CancellationLane {
    tx: mpsc::UnboundedSender<LaneOp>,
}

impl Default for CancellationLane {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationLane {
    #[must_use]
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut tokens: HashMap<RequestId, CancellationToken> = HashMap::new();
            let mut parked: HashSet<RequestId> = HashSet::new();
            while let Some(op) = rx.recv().await {
                match op {
                    LaneOp::Publish(id, token) => {
                        if parked.remove(&id) {
                            debug!("late-binding cancel for {id}");
                            token.cancel();
                        }
                        tokens.insert(id, token);
                    }
                    LaneOp::Cancel(id) => match tokens.get(&id) {
                        Some(token) => token.cancel(),
                        None => {
                            // Either the request has not been scheduled yet
                            // or it already replied; park the cancel and let
                            // Finish clean it up in the latter case.
                            parked.insert(id);
                        }
                    },
                    LaneOp::Finish(id) => {
                        tokens.remove(&id);
                        if parked.remove(&id) {
                            debug!("dropping cancel for already-replied {id}");
                        }
                    }
                }
            }
        });
        Self { tx }
    }

    fn publish(&self, id: RequestId, token: CancellationToken) {
        let _ = self.tx.send(LaneOp::Publish(id, token));
    }

    /// Requests cancellation of `id`, bypassing the regular queue.
    pub fn cancel(&self, id: RequestId) {
        let _ = self.tx.send(LaneOp::Cancel(id));
    }

    fn finish(&self, id: RequestId) {
        let _ = self.tx.send(LaneOp::Finish(id));
    }
}

struct TaskRecord {
    task_id: u64,
    tag: DependencyTag,
    started: watch::Receiver<bool>,
    done: watch::Receiver<bool>,
}

struct SchedulerState {
    records: Mutex<Vec<TaskRecord>>,
    next_task_id: AtomicU64,
}

/// The dependency-aware task queue.
#[derive(Clone)]
pub struct MessageScheduler {
    state: Arc<SchedulerState>,
    lane: CancellationLane,
}

impl MessageScheduler {
    #[must_use]
    pub fn new(lane: CancellationLane) -> Self {
        Self {
            state: Arc::new(SchedulerState {
                records: Mutex::new(Vec::new()),
                next_task_id: AtomicU64::new(1),
            }),
            lane,
        }
    }

    #[must_use]
    pub fn cancellations(&self) -> CancellationLane {
        self.lane.clone()
    }

    /// Registers a task and returns the signals to drive and await.
    fn register(
        &self,
        tag: &DependencyTag,
    ) -> (
        u64,
        watch::Sender<bool>,
        watch::Sender<bool>,
        Vec<(Constraint, watch::Receiver<bool>, watch::Receiver<bool>)>,
    ) {
        let (started_tx, started_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        let task_id = self.state.next_task_id.fetch_add(1, Ordering::SeqCst);

        let mut records = self.state.records.lock().expect("scheduler poisoned");
        let waits = records
            .iter()
            .filter_map(|record| match constraint(&record.tag, tag) {
                Constraint::None => None,
                kind => Some((kind, record.started.clone(), record.done.clone())),
            })
            .collect();
        records.push(TaskRecord {
            task_id,
            tag: tag.clone(),
            started: started_rx,
            done: done_rx,
        });
        (task_id, started_tx, done_tx, waits)
    }

    fn unregister(state: &Arc<SchedulerState>, task_id: u64) {
        let mut records = state.records.lock().expect("scheduler poisoned");
        records.retain(|record| record.task_id != task_id);
    }

    async fn wait_constraints(
        waits: Vec<(Constraint, watch::Receiver<bool>, watch::Receiver<bool>)>,
    ) {
        for (kind, mut started, mut done) in waits {
            match kind {
                Constraint::Barrier => {
                    // A closed channel means the task is gone, which
                    // satisfies the barrier.
                    let _ = done.wait_for(|flag| *flag).await;
                }
                Constraint::BeginOrder => {
                    let _ = started.wait_for(|flag| *flag).await;
                }
                Constraint::None => {}
            }
        }
    }

    /// Schedules a notification handler.
    pub fn submit_notification<F>(&self, tag: DependencyTag, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (task_id, started_tx, done_tx, waits) = self.register(&tag);
        let state = self.state.clone();
        trace!("scheduled task {task_id} ({tag:?})");
        tokio::spawn(async move {
            Self::wait_constraints(waits).await;
            let _ = started_tx.send(true);
            work.await;
            let _ = done_tx.send(true);
            Self::unregister(&state, task_id);
        });
    }

    /// Schedules a request handler whose result answers `reply`.
    ///
    /// The cancellation token is published to the lane immediately; if the
    /// task is cancelled while queued or running, the reply is the
    /// `cancelled` failure — cancellation is always surfaced, never
    /// silently dropped.
    pub fn submit_request<F>(&self, tag: DependencyTag, reply: ReplyHandle, work: F)
    where
        F: Future<Output = Result<serde_json::Value, Error>> + Send + 'static,
    {
        let (task_id, started_tx, done_tx, waits) = self.register(&tag);
        let token = CancellationToken::new();
        let id = reply.id().clone();
        self.lane.publish(id.clone(), token.clone());
        let state = self.state.clone();
        let lane = self.lane.clone();
        trace!("scheduled request {id} as task {task_id} ({tag:?})");

        tokio::spawn(async move {
            let queued = async {
                Self::wait_constraints(waits).await;
            };
            tokio::select! {
                () = token.cancelled() => {
                    let _ = started_tx.send(true);
                    reply.send(Err(Error::Cancelled));
                    let _ = done_tx.send(true);
                    Self::unregister(&state, task_id);
                    lane.finish(id);
                    return;
                }
                () = queued => {}
            }
            let _ = started_tx.send(true);
            let result = tokio::select! {
                () = token.cancelled() => Err(Error::Cancelled),
                result = work => result,
            };
            reply.send(result);
            let _ = done_tx.send(true);
            Self::unregister(&state, task_id);
            lane.finish(id);
        });
    }

    /// Waits until every task scheduled so far has completed.
    pub async fn drain(&self) {
        let pending: Vec<watch::Receiver<bool>> = {
            let records = self.state.records.lock().expect("scheduler poisoned");
            records.iter().map(|record| record.done.clone()).collect()
        };
        if !pending.is_empty() {
            debug!("draining {} in-flight tasks", pending.len());
        }
        for mut done in pending {
            let _ = done.wait_for(|flag| *flag).await;
        }
    }

    /// Number of tasks currently registered; used by shutdown logging.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.records.lock().expect("scheduler poisoned").len()
    }
}

impl std::fmt::Debug for MessageScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageScheduler")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Classifies an LSP method into its dependency tag.
#[must_use]
pub fn tag_for_method(method: &str, document: Option<Uri>) -> DependencyTag {
    match method {
        "initialize"
        | "initialized"
        | "shutdown"
        | "exit"
        | "$/setTrace"
        | "workspace/didChangeConfiguration"
        | "workspace/didChangeWorkspaceFolders"
        | "workspace/didChangeWatchedFiles"
        | "client/registerCapability"
        | "client/unregisterCapability"
        | "workspace/_pollIndex" => DependencyTag::GlobalConfig,
        "textDocument/didOpen"
        | "textDocument/didChange"
        | "textDocument/didClose"
        | "textDocument/didSave"
        | "textDocument/willSave" => match document {
            Some(uri) => DependencyTag::DocumentUpdate(uri),
            None => DependencyTag::Freestanding,
        },
        _ if method.starts_with("textDocument/") || method == "workspace/executeCommand" => {
            match document {
                Some(uri) => DependencyTag::DocumentRequest(uri),
                None => DependencyTag::Freestanding,
            }
        }
        _ => DependencyTag::Freestanding,
    }
}

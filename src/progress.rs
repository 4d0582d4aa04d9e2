// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Work-done progress reporting to the editor.
//!
//! The manager counts active tasks and collapses them into one progress
//! token. The first active task asks the client to create the token; when
//! the counter drops back to zero the token ends. Creation is a client
//! round-trip, so bursts that begin and end while creation is in flight
//! still produce a well-formed begin/end pair. A client that refuses the
//! creation request turns further progress reporting off for good.

use std::sync::Arc;

use lsp_types::{
    NumberOrString, ProgressParams, ProgressParamsValue, WorkDoneProgress, WorkDoneProgressBegin,
    WorkDoneProgressCreateParams, WorkDoneProgressEnd,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::server::ClientHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProgressState {
    NoProgress,
    Creating,
    Created,
    Failed,
}

struct ProgressInner {
    state: ProgressState,
    active: usize,
}

/// Debounced activity counter emitting `$/progress` begin/end pairs.
pub struct WorkDoneProgressManager {
    client: Arc<dyn ClientHandle>,
    token: String,
    title: String,
    inner: Arc<Mutex<ProgressInner>>,
}

impl WorkDoneProgressManager {
    #[must_use]
    pub fn new(client: Arc<dyn ClientHandle>, token: &str, title: &str) -> Self {
        Self {
            client,
            token: token.to_string(),
            title: title.to_string(),
            inner: Arc::new(Mutex::new(ProgressInner {
                state: ProgressState::NoProgress,
                active: 0,
            })),
        }
    }

    /// Notes one more active task, creating the client token on the 0 → 1
    /// transition.
    pub async fn start_progress(&self) {
        let mut inner = self.inner.lock().await;
        inner.active += 1;
        if inner.active == 1 && inner.state == ProgressState::NoProgress {
            inner.state = ProgressState::Creating;
            drop(inner);
            self.create_token().await;
        }
    }

    /// Notes one task finished, ending the token on the 1 → 0 transition.
    pub async fn end_progress(&self) {
        let mut inner = self.inner.lock().await;
        debug_assert!(inner.active > 0, "end_progress without start_progress");
        inner.active = inner.active.saturating_sub(1);
        if inner.active == 0 && inner.state == ProgressState::Created {
            inner.state = ProgressState::NoProgress;
            drop(inner);
            self.send_end();
        }
    }

    async fn create_token(&self) {
        let params = WorkDoneProgressCreateParams {
            token: NumberOrString::String(self.token.clone()),
        };
        let created = self
            .client
            .request(
                "window/workDoneProgress/create",
                serde_json::to_value(params).expect("progress params serialize"),
            )
            .await;

        let mut inner = self.inner.lock().await;
        match created {
            Ok(_) => {
                self.send_begin();
                if inner.active == 0 {
                    // Everything finished while the client was answering;
                    // close the token right away.
                    inner.state = ProgressState::NoProgress;
                    drop(inner);
                    self.send_end();
                } else {
                    inner.state = ProgressState::Created;
                }
            }
            Err(e) => {
                // Sticky: a client that rejects creation is never asked
                // again.
                warn!("work-done progress creation failed: {e:#}");
                inner.state = ProgressState::Failed;
            }
        }
    }

    fn send_begin(&self) {
        debug!("progress begin: {}", self.title);
        self.notify(WorkDoneProgress::Begin(WorkDoneProgressBegin {
            title: self.title.clone(),
            cancellable: Some(false),
            message: None,
            percentage: None,
        }));
    }

    fn send_end(&self) {
        debug!("progress end: {}", self.title);
        self.notify(WorkDoneProgress::End(WorkDoneProgressEnd { message: None }));
    }

    fn notify(&self, progress: WorkDoneProgress) {
        let params = ProgressParams {
            token: NumberOrString::String(self.token.clone()),
            value: ProgressParamsValue::WorkDone(progress),
        };
        self.client.notify(
            "$/progress",
            serde_json::to_value(params).expect("progress params serialize"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingClient {
        refuse_create: AtomicBool,
        requests: StdMutex<Vec<String>>,
        notifications: StdMutex<Vec<(String, serde_json::Value)>>,
    }

    impl RecordingClient {
        fn progress_kinds(&self) -> Vec<String> {
            self.notifications
                .lock()
                .unwrap()
                .iter()
                .filter(|(method, _)| method == "$/progress")
                .map(|(_, params)| {
                    params["value"]["kind"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string()
                })
                .collect()
        }
    }

    #[async_trait]
    impl ClientHandle for RecordingClient {
        async fn request(
            &self,
            method: &str,
            _params: serde_json::Value,
        ) -> anyhow::Result<serde_json::Value> {
            self.requests.lock().unwrap().push(method.to_string());
            if self.refuse_create.load(Ordering::SeqCst) {
                anyhow::bail!("client refused")
            }
            Ok(serde_json::Value::Null)
        }

        fn notify(&self, method: &str, params: serde_json::Value) {
            self.notifications
                .lock()
                .unwrap()
                .push((method.to_string(), params));
        }
    }

    #[tokio::test]
    async fn test_begin_end_pair() {
        let client = Arc::new(RecordingClient::default());
        let progress = WorkDoneProgressManager::new(client.clone(), "indexing", "Indexing");

        progress.start_progress().await;
        progress.end_progress().await;

        assert_eq!(
            *client.requests.lock().unwrap(),
            vec!["window/workDoneProgress/create"]
        );
        assert_eq!(client.progress_kinds(), vec!["begin", "end"]);
    }

    #[tokio::test]
    async fn test_nested_tasks_share_one_token() {
        let client = Arc::new(RecordingClient::default());
        let progress = WorkDoneProgressManager::new(client.clone(), "indexing", "Indexing");

        progress.start_progress().await;
        progress.start_progress().await;
        progress.end_progress().await;
        // Still one active task; no end yet.
        assert_eq!(client.progress_kinds(), vec!["begin"]);
        progress.end_progress().await;
        assert_eq!(client.progress_kinds(), vec!["begin", "end"]);
        // Only one create request for the whole burst.
        assert_eq!(client.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_sticky() {
        let client = Arc::new(RecordingClient::default());
        client.refuse_create.store(true, Ordering::SeqCst);
        let progress = WorkDoneProgressManager::new(client.clone(), "indexing", "Indexing");

        progress.start_progress().await;
        progress.end_progress().await;
        progress.start_progress().await;
        progress.end_progress().await;

        // One attempt, no notifications, never retried.
        assert_eq!(client.requests.lock().unwrap().len(), 1);
        assert!(client.progress_kinds().is_empty());
    }

    #[tokio::test]
    async fn test_token_recreated_after_idle() {
        let client = Arc::new(RecordingClient::default());
        let progress = WorkDoneProgressManager::new(client.clone(), "indexing", "Indexing");

        progress.start_progress().await;
        progress.end_progress().await;
        progress.start_progress().await;
        progress.end_progress().await;

        assert_eq!(client.requests.lock().unwrap().len(), 2);
        assert_eq!(
            client.progress_kinds(),
            vec!["begin", "end", "begin", "end"]
        );
    }
}

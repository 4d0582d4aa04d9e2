// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Request dispatch: the editor-facing surface of the server.
//!
//! The transport loop hands every inbound message to [`Server::dispatch`],
//! which classifies it under a dependency tag and submits a handler to the
//! scheduler. Cancellation requests bypass the queue entirely. Handlers
//! route through the workspace registry to an adapter and reply exactly
//! once through their [`ReplyHandle`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use lsp_types::{
    CallHierarchyItem, DidChangeTextDocumentParams, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, FileChangeType, InitializeParams, InitializeResult, Position,
    PrepareRenameResponse, TypeHierarchyItem, Uri, WorkspaceFolder,
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::capabilities::{CapabilityRegistry, static_capabilities};
use crate::document::{DocumentManager, DocumentSnapshot, Language, uri_to_path};
use crate::error::Error;
use crate::hierarchy;
use crate::index::SymbolIndex;
use crate::progress::WorkDoneProgressManager;
use crate::protocol::{
    Message, NotificationMessage, RequestId, RequestMessage, ResponseMessage, frame_message,
};
use crate::rename::cross_file_rename;
use crate::scheduler::{
    CancellationLane, DependencyTag, MessageScheduler, ReplyHandle, tag_for_method,
};
use crate::service::{LanguageService, SemanticTokensQuery, ServiceRegistry, Toolchain};
use crate::workspace::{BuildSystem, Workspace, WorkspaceRegistry};

/// Server→client requests and notifications.
#[async_trait]
pub trait ClientHandle: Send + Sync {
    /// Sends a request to the editor and waits for its reply.
    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> AnyResult<serde_json::Value>;

    /// Sends a notification to the editor.
    fn notify(&self, method: &str, params: serde_json::Value);
}

/// The real client connection writing framed messages to the transport.
pub struct ClientConnection {
    next_id: AtomicI64,
    out: mpsc::UnboundedSender<String>,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<ResponseMessage>>>,
}

impl ClientConnection {
    #[must_use]
    pub fn new(out: mpsc::UnboundedSender<String>) -> Self {
        Self {
            next_id: AtomicI64::new(1),
            out,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Routes a response from the editor back to its waiting request.
    pub fn handle_response(&self, response: ResponseMessage) {
        let Some(id) = response.id.clone() else {
            warn!("client response without id");
            return;
        };
        let sender = self.pending.lock().expect("pending poisoned").remove(&id);
        match sender {
            Some(sender) => {
                let _ = sender.send(response);
            }
            None => warn!("client response for unknown request {id}"),
        }
    }
}

#[async_trait]
impl ClientHandle for ClientConnection {
    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> AnyResult<serde_json::Value> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let request = RequestMessage {
            jsonrpc: "2.0".to_string(),
            id: id.clone(),
            method: method.to_string(),
            params,
        };
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending poisoned")
            .insert(id.clone(), tx);
        self.out.send(frame_message(&request)?)?;

        let response = rx.await?;
        if let Some(error) = response.error {
            anyhow::bail!("client error {}: {}", error.code, error.message);
        }
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }

    fn notify(&self, method: &str, params: serde_json::Value) {
        let notification = NotificationMessage::new(method, params);
        match frame_message(&notification) {
            Ok(framed) => {
                let _ = self.out.send(framed);
            }
            Err(e) => error!("unserializable notification {method}: {e:#}"),
        }
    }
}

/// Produces the per-workspace collaborators when a workspace is opened.
pub type WorkspaceFactory = Arc<
    dyn Fn(&Uri) -> (Arc<dyn BuildSystem>, Option<Arc<dyn SymbolIndex>>) + Send + Sync,
>;

/// Default factory: compilation-database build system, no index.
#[must_use]
pub fn default_workspace_factory() -> WorkspaceFactory {
    Arc::new(|root: &Uri| {
        let path = uri_to_path(root).unwrap_or_else(|_| std::path::PathBuf::from("/"));
        let build: Arc<dyn BuildSystem> =
            Arc::new(crate::compile_db::CompileDatabaseBuildSystem::new(path));
        (build, None)
    })
}

/// The language server.
pub struct Server {
    documents: Arc<DocumentManager>,
    workspaces: Arc<WorkspaceRegistry>,
    services: Arc<ServiceRegistry>,
    capabilities: Arc<CapabilityRegistry>,
    scheduler: MessageScheduler,
    client: Arc<ClientConnection>,
    progress: Arc<WorkDoneProgressManager>,
    replies: mpsc::UnboundedSender<ResponseMessage>,
    workspace_factory: WorkspaceFactory,
    initialized: AtomicBool,
    shutdown_requested: AtomicBool,
    exit_tx: watch::Sender<bool>,
}

impl Server {
    /// Builds a server wired to the given outgoing channels.
    #[must_use]
    pub fn new(
        toolchains: Vec<Toolchain>,
        default_toolchain: Option<String>,
        workspace_factory: WorkspaceFactory,
        out_frames: mpsc::UnboundedSender<String>,
        replies: mpsc::UnboundedSender<ResponseMessage>,
    ) -> Arc<Self> {
        let client = Arc::new(ClientConnection::new(out_frames));
        let documents = Arc::new(DocumentManager::new());
        let workspaces = Arc::new(WorkspaceRegistry::new());
        let capabilities = Arc::new(CapabilityRegistry::new(client.clone(), false));
        let services = ServiceRegistry::new(
            toolchains,
            default_toolchain,
            documents.clone(),
            workspaces.clone(),
            capabilities.clone(),
        );
        let progress = Arc::new(WorkDoneProgressManager::new(
            client.clone(),
            "pantograph.activity",
            "Indexing",
        ));
        let (exit_tx, _) = watch::channel(false);
        Arc::new(Self {
            documents,
            workspaces,
            services,
            capabilities,
            scheduler: MessageScheduler::new(CancellationLane::new()),
            client,
            progress,
            replies,
            workspace_factory,
            initialized: AtomicBool::new(false),
            shutdown_requested: AtomicBool::new(false),
            exit_tx,
        })
    }

    /// Resolves once `exit` has been received.
    #[must_use]
    pub fn exit_signal(&self) -> watch::Receiver<bool> {
        self.exit_tx.subscribe()
    }

    /// Routes a response from the editor to the client connection.
    pub fn handle_client_response(&self, response: ResponseMessage) {
        self.client.handle_response(response);
    }

    /// Classifies and schedules one inbound message.
    pub fn dispatch(self: &Arc<Self>, message: Message) {
        match message {
            Message::Request(request) => self.dispatch_request(request),
            Message::Notification(notification) => self.dispatch_notification(notification),
            Message::Response(response) => self.handle_client_response(response),
        }
    }

    fn dispatch_request(self: &Arc<Self>, request: RequestMessage) {
        let document = extract_document_uri(&request.params);
        let tag = tag_for_method(&request.method, document.clone());
        let reply = ReplyHandle::new(request.id.clone(), self.replies.clone());
        // Only document work shows up as client-visible activity.
        let track = matches!(tag, DependencyTag::DocumentRequest(_));
        let server = self.clone();
        self.scheduler.submit_request(tag, reply, async move {
            if track {
                server.progress.start_progress().await;
            }
            let result = server
                .handle_request(&request.method, request.params, document)
                .await;
            if track {
                server.progress.end_progress().await;
            }
            result
        });
    }

    fn dispatch_notification(self: &Arc<Self>, notification: NotificationMessage) {
        // The cancellation lane never queues behind regular work.
        if notification.method == "$/cancelRequest" {
            if let Some(id) = notification.params.get("id") {
                let id: RequestId = match serde_json::from_value(id.clone()) {
                    Ok(id) => id,
                    Err(e) => {
                        warn!("unparseable cancel id: {e}");
                        return;
                    }
                };
                debug!("cancel requested for {id}");
                self.scheduler.cancellations().cancel(id);
            }
            return;
        }

        let document = extract_document_uri(&notification.params);
        let tag = tag_for_method(&notification.method, document);
        let server = self.clone();
        self.scheduler.submit_notification(tag, async move {
            if let Err(e) = server
                .handle_notification(&notification.method, notification.params)
                .await
            {
                warn!("notification {} failed: {e}", notification.method);
            }
        });
    }

    async fn handle_request(
        self: &Arc<Self>,
        method: &str,
        params: serde_json::Value,
        document: Option<Uri>,
    ) -> Result<serde_json::Value, Error> {
        match method {
            "initialize" => self.initialize(params).await,
            "shutdown" => self.shutdown().await,
            "workspace/symbol" => {
                let query = params
                    .get("query")
                    .and_then(|q| q.as_str())
                    .unwrap_or_default()
                    .to_string();
                let symbols = hierarchy::workspace_symbols(
                    &self.documents,
                    &self.workspaces.all(),
                    &query,
                )
                .await?;
                to_json(symbols)
            }
            "workspace/_pollIndex" => {
                for workspace in self.workspaces.all() {
                    if let Some(index) = &workspace.index {
                        index.poll_for_unit_changes_and_wait().await;
                    }
                }
                Ok(serde_json::Value::Null)
            }
            "callHierarchy/incomingCalls" => {
                let item: CallHierarchyItem = field(&params, "item")?;
                let workspace = self.workspaces.workspace_for(&item.uri).await?;
                to_json(hierarchy::incoming_calls(&self.documents, &workspace, &item).await?)
            }
            "callHierarchy/outgoingCalls" => {
                let item: CallHierarchyItem = field(&params, "item")?;
                let workspace = self.workspaces.workspace_for(&item.uri).await?;
                to_json(hierarchy::outgoing_calls(&self.documents, &workspace, &item).await?)
            }
            "typeHierarchy/supertypes" => {
                let item: TypeHierarchyItem = field(&params, "item")?;
                let workspace = self.workspaces.workspace_for(&item.uri).await?;
                to_json(hierarchy::supertypes(&self.documents, &workspace, &item).await?)
            }
            "typeHierarchy/subtypes" => {
                let item: TypeHierarchyItem = field(&params, "item")?;
                let workspace = self.workspaces.workspace_for(&item.uri).await?;
                to_json(hierarchy::subtypes(&self.documents, &workspace, &item).await?)
            }
            "workspace/executeCommand" => {
                let command = params
                    .get("command")
                    .and_then(|c| c.as_str())
                    .ok_or_else(|| Error::Unknown("executeCommand without command".into()))?
                    .to_string();
                let arguments = params
                    .get("arguments")
                    .and_then(|a| a.as_array())
                    .cloned()
                    .unwrap_or_default();
                let uri = document
                    .ok_or_else(|| Error::Unknown("command references no document".into()))?;
                let (_, _, adapter) = self.context_for(&uri).await?;
                adapter.execute_command(&command, arguments).await
            }
            _ if method.starts_with("textDocument/") => {
                let uri =
                    document.ok_or_else(|| Error::Unknown(format!("{method} without URI")))?;
                self.handle_document_request(method, params, &uri).await
            }
            other => Err(Error::MethodNotFound(other.to_string())),
        }
    }

    async fn handle_document_request(
        self: &Arc<Self>,
        method: &str,
        params: serde_json::Value,
        uri: &Uri,
    ) -> Result<serde_json::Value, Error> {
        let (snapshot, workspace, adapter) = self.context_for(uri).await?;
        match method {
            "textDocument/hover" => {
                to_json(adapter.hover(&snapshot, position(&params)?).await?)
            }
            "textDocument/completion" => {
                to_json(adapter.completion(&snapshot, position(&params)?).await?)
            }
            "textDocument/definition" | "textDocument/declaration" => to_json(
                hierarchy::definition(
                    &self.documents,
                    &workspace,
                    &adapter,
                    &snapshot,
                    position(&params)?,
                )
                .await?,
            ),
            "textDocument/references" => {
                let include_declaration = params
                    .pointer("/context/includeDeclaration")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                to_json(
                    hierarchy::references(
                        &self.documents,
                        &workspace,
                        &adapter,
                        &snapshot,
                        position(&params)?,
                        include_declaration,
                    )
                    .await?,
                )
            }
            "textDocument/implementation" => to_json(
                hierarchy::implementation(
                    &self.documents,
                    &workspace,
                    &adapter,
                    &snapshot,
                    position(&params)?,
                )
                .await?,
            ),
            "textDocument/documentSymbol" => to_json(adapter.document_symbols(&snapshot).await?),
            "textDocument/documentHighlight" => {
                to_json(adapter.document_highlight(&snapshot, position(&params)?).await?)
            }
            "textDocument/foldingRange" => to_json(adapter.folding_ranges(&snapshot).await?),
            "textDocument/semanticTokens/full" => to_json(
                adapter
                    .semantic_tokens(&snapshot, SemanticTokensQuery::Full)
                    .await?,
            ),
            "textDocument/semanticTokens/range" => to_json(
                adapter
                    .semantic_tokens(&snapshot, SemanticTokensQuery::Range(field(&params, "range")?))
                    .await?,
            ),
            "textDocument/semanticTokens/full/delta" => {
                let previous_result_id: String = field(&params, "previousResultId")?;
                to_json(
                    adapter
                        .semantic_tokens(
                            &snapshot,
                            SemanticTokensQuery::Delta { previous_result_id },
                        )
                        .await?,
                )
            }
            "textDocument/documentColor" => to_json(adapter.document_color(&snapshot).await?),
            "textDocument/colorPresentation" => to_json(
                adapter
                    .color_presentation(
                        &snapshot,
                        field(&params, "color")?,
                        field(&params, "range")?,
                    )
                    .await?,
            ),
            "textDocument/codeAction" => {
                to_json(adapter.code_actions(&snapshot, field(&params, "range")?).await?)
            }
            "textDocument/inlayHint" => {
                to_json(adapter.inlay_hints(&snapshot, field(&params, "range")?).await?)
            }
            "textDocument/diagnostic" => {
                to_json(adapter.document_diagnostics(&snapshot).await?)
            }
            "textDocument/rename" => {
                let new_name: String = field(&params, "newName")?;
                let edit = cross_file_rename(
                    &self.documents,
                    &workspace,
                    &adapter,
                    &snapshot,
                    position(&params)?,
                    &new_name,
                )
                .await?;
                to_json(edit)
            }
            "textDocument/prepareRename" => {
                let prepared = adapter.prepare_rename(&snapshot, position(&params)?).await?;
                to_json(prepared.map(|prepared| PrepareRenameResponse::RangeWithPlaceholder {
                    range: prepared.range,
                    placeholder: prepared.placeholder,
                }))
            }
            "textDocument/prepareCallHierarchy" => to_json(
                hierarchy::prepare_call_hierarchy(
                    &self.documents,
                    &workspace,
                    &adapter,
                    &snapshot,
                    position(&params)?,
                )
                .await?,
            ),
            "textDocument/prepareTypeHierarchy" => to_json(
                hierarchy::prepare_type_hierarchy(
                    &self.documents,
                    &workspace,
                    &adapter,
                    &snapshot,
                    position(&params)?,
                )
                .await?,
            ),
            other => Err(Error::MethodNotFound(other.to_string())),
        }
    }

    async fn handle_notification(
        self: &Arc<Self>,
        method: &str,
        params: serde_json::Value,
    ) -> Result<(), Error> {
        match method {
            "initialized" => {
                self.initialized.store(true, Ordering::SeqCst);
                let roots: Vec<std::path::PathBuf> = self
                    .workspaces
                    .all()
                    .iter()
                    .filter_map(|workspace| uri_to_path(&workspace.root).ok())
                    .collect();
                let mut languages = crate::workspace::detect_workspace_languages(&roots);
                if languages.is_empty() {
                    // Nothing on disk yet; watch everything we can serve.
                    languages = vec![
                        Language::Swift,
                        Language::C,
                        Language::Cpp,
                        Language::ObjectiveC,
                        Language::ObjectiveCpp,
                    ];
                }
                self.capabilities.register_file_watchers(&languages).await;
                Ok(())
            }
            "exit" => {
                let clean = self.shutdown_requested.load(Ordering::SeqCst);
                info!("exit received (shutdown requested: {clean})");
                let _ = self.exit_tx.send(true);
                Ok(())
            }
            "textDocument/didOpen" => self.did_open(parse(params)?).await,
            "textDocument/didChange" => self.did_change(parse(params)?).await,
            "textDocument/didClose" => self.did_close(parse(params)?).await,
            "textDocument/didSave" => {
                if let Some(uri) = extract_document_uri(&params) {
                    let (_, _, adapter) = self.context_for(&uri).await?;
                    adapter.save_document(&uri).await?;
                }
                Ok(())
            }
            "textDocument/willSave" => Ok(()),
            "workspace/didChangeWorkspaceFolders" => {
                self.workspace_folders_changed(&params).await;
                Ok(())
            }
            "workspace/didChangeWatchedFiles" => {
                self.watched_files_changed(&params).await;
                Ok(())
            }
            "workspace/didChangeConfiguration" | "$/setTrace" => Ok(()),
            other => {
                debug!("ignoring notification {other}");
                Ok(())
            }
        }
    }

    async fn initialize(
        self: &Arc<Self>,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, Error> {
        let params: InitializeParams = parse(params)?;
        let dynamic = params
            .capabilities
            .workspace
            .as_ref()
            .and_then(|w| w.did_change_watched_files.as_ref())
            .and_then(|w| w.dynamic_registration)
            .unwrap_or(false);
        self.capabilities.set_dynamic_supported(dynamic);

        let mut roots: Vec<Uri> = Vec::new();
        if let Some(folders) = params.workspace_folders {
            roots.extend(folders.into_iter().map(|folder| folder.uri));
        }
        #[allow(deprecated)]
        let root_uri = params.root_uri;
        if roots.is_empty()
            && let Some(root) = root_uri
        {
            roots.push(root);
        }
        for root in roots {
            self.open_workspace(root);
        }

        let result = InitializeResult {
            capabilities: static_capabilities(),
            server_info: Some(lsp_types::ServerInfo {
                name: "pantograph".to_string(),
                version: Some(env!("PANTOGRAPH_VERSION").to_string()),
            }),
        };
        to_json(result)
    }

    fn open_workspace(self: &Arc<Self>, root: Uri) {
        let (build_system, index) = (self.workspace_factory)(&root);
        let workspace = Arc::new(Workspace::new(root, build_system, index));
        self.workspaces.add(workspace);
    }

    async fn shutdown(self: &Arc<Self>) -> Result<serde_json::Value, Error> {
        info!(
            "shutdown requested (initialized: {}, {} tasks in flight)",
            self.initialized.load(Ordering::SeqCst),
            self.scheduler.in_flight()
        );
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.services.shutdown_all().await;
        Ok(serde_json::Value::Null)
    }

    /// Snapshot, workspace, and adapter for a document request.
    async fn context_for(
        self: &Arc<Self>,
        uri: &Uri,
    ) -> Result<(Arc<DocumentSnapshot>, Arc<Workspace>, Arc<dyn LanguageService>), Error> {
        let snapshot = self.documents.latest(uri)?;
        let workspace = self.workspaces.workspace_for(uri).await?;
        let adapter = self
            .services
            .get(uri, snapshot.language, &workspace)
            .await?;
        Ok((snapshot, workspace, adapter))
    }

    async fn did_open(self: &Arc<Self>, params: DidOpenTextDocumentParams) -> Result<(), Error> {
        let document = params.text_document;
        let language = Language::from_lsp_id(&document.language_id)
            .or_else(|| {
                uri_to_path(&document.uri)
                    .ok()
                    .and_then(|path| Language::from_path(&path))
            })
            .ok_or_else(|| {
                Error::Unknown(format!("unsupported language {}", document.language_id))
            })?;
        let snapshot = self.documents.open(
            document.uri.clone(),
            language,
            document.version,
            &document.text,
        );
        let workspace = self.workspaces.workspace_for(&document.uri).await?;
        let adapter = self
            .services
            .get(&document.uri, language, &workspace)
            .await?;
        adapter.open_document(&snapshot).await
    }

    async fn did_change(self: &Arc<Self>, params: DidChangeTextDocumentParams) -> Result<(), Error> {
        let uri = params.text_document.uri;
        let before = self.documents.latest(&uri)?;
        self.documents
            .edit(&uri, params.text_document.version, &params.content_changes)?;
        let workspace = self.workspaces.workspace_for(&uri).await?;
        let adapter = self.services.get(&uri, before.language, &workspace).await?;
        adapter
            .change_document(&before, &params.content_changes)
            .await
    }

    async fn did_close(self: &Arc<Self>, params: DidCloseTextDocumentParams) -> Result<(), Error> {
        let uri = params.text_document.uri;
        self.documents.close(&uri)?;
        let workspace = self.workspaces.workspace_for(&uri).await?;
        if let Some(kind) = workspace.document_service(&uri)
            && let Some(adapter) = workspace.adapter(kind).await
        {
            adapter.close_document(&uri).await?;
        }
        workspace.unassign_document(&uri);
        Ok(())
    }

    async fn workspace_folders_changed(self: &Arc<Self>, params: &serde_json::Value) {
        let added: Vec<WorkspaceFolder> = params
            .pointer("/event/added")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let removed: Vec<WorkspaceFolder> = params
            .pointer("/event/removed")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        for folder in removed {
            if let Some(workspace) = self.workspaces.remove(&folder.uri) {
                for (kind, adapter) in workspace.adapters().await {
                    debug!("closing {} adapter of removed workspace", kind.name());
                    adapter.shutdown().await;
                }
            }
        }
        for folder in added {
            self.open_workspace(folder.uri);
        }
    }

    async fn watched_files_changed(self: &Arc<Self>, params: &serde_json::Value) {
        let changes: Vec<lsp_types::FileEvent> = params
            .get("changes")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let database_names = crate::compile_db::database_file_names();
        let mut description_changed = false;

        for change in &changes {
            let Ok(path) = uri_to_path(&change.uri) else {
                continue;
            };
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            if database_names.contains(&name) || name == "Package.swift" {
                description_changed = true;
            } else if change.typ == FileChangeType::CREATED
                || change.typ == FileChangeType::DELETED
            {
                // New or removed sources can change routing verdicts.
                self.workspaces.invalidate_cache();
            }
        }

        if description_changed {
            self.workspaces.invalidate_cache();
            for workspace in self.workspaces.all() {
                workspace.build_system.build_description_changed().await;
            }
            // Re-register every open document with fresh settings.
            for uri in self.documents.open_uris() {
                let Ok(snapshot) = self.documents.latest(&uri) else {
                    continue;
                };
                let Ok(workspace) = self.workspaces.workspace_for(&uri).await else {
                    continue;
                };
                let Some(kind) = workspace.document_service(&uri) else {
                    continue;
                };
                let Some(adapter) = workspace.adapter(kind).await else {
                    continue;
                };
                if let Err(e) = adapter.document_updated_build_settings(&snapshot).await {
                    warn!("settings refresh failed for {}: {e}", uri.as_str());
                }
            }
        }
    }
}

fn to_json<T: serde::Serialize>(value: T) -> Result<serde_json::Value, Error> {
    serde_json::to_value(value).map_err(|e| Error::Internal(format!("unserializable reply: {e}")))
}

fn parse<T: serde::de::DeserializeOwned>(params: serde_json::Value) -> Result<T, Error> {
    serde_json::from_value(params).map_err(|e| Error::Unknown(format!("invalid params: {e}")))
}

fn field<T: serde::de::DeserializeOwned>(
    params: &serde_json::Value,
    name: &str,
) -> Result<T, Error> {
    params
        .get(name)
        .cloned()
        .ok_or_else(|| Error::Unknown(format!("missing param {name}")))
        .and_then(|value| {
            serde_json::from_value(value).map_err(|e| Error::Unknown(format!("bad {name}: {e}")))
        })
}

fn position(params: &serde_json::Value) -> Result<Position, Error> {
    let value = params
        .get("position")
        .or_else(|| params.pointer("/textDocumentPositionParams/position"))
        .cloned()
        .ok_or_else(|| Error::Unknown("missing position".to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::Unknown(format!("bad position: {e}")))
}

/// Pulls the `textDocument.uri` (or execute-command document argument)
/// out of raw params for dependency classification.
#[must_use]
pub fn extract_document_uri(params: &serde_json::Value) -> Option<Uri> {
    let raw = params
        .pointer("/textDocument/uri")
        .or_else(|| params.pointer("/arguments/0/uri"))?
        .as_str()?;
    raw.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_document_uri() {
        let params = serde_json::json!({
            "textDocument": {"uri": "file:///a.swift"},
            "position": {"line": 0, "character": 0},
        });
        assert_eq!(
            extract_document_uri(&params).unwrap().as_str(),
            "file:///a.swift"
        );

        let command = serde_json::json!({
            "command": "pantograph.applyRefactoring",
            "arguments": [{"uri": "file:///b.swift"}],
        });
        assert_eq!(
            extract_document_uri(&command).unwrap().as_str(),
            "file:///b.swift"
        );

        assert!(extract_document_uri(&serde_json::json!({})).is_none());
    }

    #[test]
    fn test_position_extraction() {
        let params = serde_json::json!({"position": {"line": 3, "character": 7}});
        assert_eq!(position(&params).unwrap(), Position::new(3, 7));
        assert!(position(&serde_json::json!({})).is_err());
    }

    #[tokio::test]
    async fn test_initialize_creates_workspaces_and_replies() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (reply_tx, _reply_rx) = mpsc::unbounded_channel();
        let server = Server::new(
            Vec::new(),
            None,
            default_workspace_factory(),
            out_tx,
            reply_tx,
        );

        let params = serde_json::json!({
            "capabilities": {},
            "workspaceFolders": [
                {"uri": "file:///w1", "name": "w1"},
                {"uri": "file:///w2", "name": "w2"},
            ],
        });
        let result = server.initialize(params).await.unwrap();
        assert_eq!(result["serverInfo"]["name"], "pantograph");
        assert!(result["capabilities"]["textDocumentSync"].is_object());
        assert_eq!(server.workspaces.all().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_method_is_method_not_found() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (reply_tx, _reply_rx) = mpsc::unbounded_channel();
        let server = Server::new(
            Vec::new(),
            None,
            default_workspace_factory(),
            out_tx,
            reply_tx,
        );
        let err = server
            .handle_request("custom/doesNotExist", serde_json::json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MethodNotFound(_)));
    }

    #[tokio::test]
    async fn test_request_for_unopened_document_fails() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (reply_tx, _reply_rx) = mpsc::unbounded_channel();
        let server = Server::new(
            Vec::new(),
            None,
            default_workspace_factory(),
            out_tx,
            reply_tx,
        );
        let err = server
            .handle_request(
                "textDocument/hover",
                serde_json::json!({
                    "textDocument": {"uri": "file:///nope.swift"},
                    "position": {"line": 0, "character": 0},
                }),
                Some("file:///nope.swift".parse().unwrap()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotOpen(_)));
    }

    #[tokio::test]
    async fn test_exit_signal_fires() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (reply_tx, _reply_rx) = mpsc::unbounded_channel();
        let server = Server::new(
            Vec::new(),
            None,
            default_workspace_factory(),
            out_tx,
            reply_tx,
        );
        let mut exit = server.exit_signal();
        assert!(!*exit.borrow());
        server
            .handle_notification("exit", serde_json::Value::Null)
            .await
            .unwrap();
        exit.changed().await.unwrap();
        assert!(*exit.borrow());
    }
}

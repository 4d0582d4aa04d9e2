// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Adapter lifecycle: creation, toolchain selection, crash recovery.
//!
//! There is at most one adapter per (backend kind, workspace). Creation
//! suspends on the backend handshake, so two concurrent tasks can both
//! build an adapter for the same pair; the workspace's insert-once table
//! decides the winner and the loser is shut down and discarded. When a
//! backend crashes, every open document routed to its adapter is reopened
//! on the replacement.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use lsp_types::Uri;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{BackendKind, CFamilyService, LanguageService, SemaService};
use crate::backend::CrashEvent;
use crate::capabilities::CapabilityRegistry;
use crate::document::{DocumentManager, Language};
use crate::error::{Error, Result};
use crate::workspace::{Workspace, WorkspaceRegistry};

/// A declared toolchain and the backend servers it ships.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub name: String,
    /// Path to the semantic backend server, when present.
    pub sema_server: Option<PathBuf>,
    /// Path to the C-family backend server, when present.
    pub cfamily_server: Option<PathBuf>,
}

impl Toolchain {
    /// The backend server binary for `kind`, if this toolchain ships one.
    #[must_use]
    pub fn server_for(&self, kind: BackendKind) -> Option<&PathBuf> {
        match kind {
            BackendKind::Sema => self.sema_server.as_ref(),
            BackendKind::CFamily => self.cfamily_server.as_ref(),
        }
    }

    /// Whether this toolchain can serve `language`.
    #[must_use]
    pub fn supports(&self, language: Language) -> bool {
        self.server_for(BackendKind::for_language(language)).is_some()
    }
}

/// Creates and tears down language-service adapters.
pub struct ServiceRegistry {
    toolchains: Vec<Toolchain>,
    default_toolchain: Option<String>,
    documents: Arc<DocumentManager>,
    workspaces: Arc<WorkspaceRegistry>,
    capabilities: Arc<CapabilityRegistry>,
    crash_tx: mpsc::UnboundedSender<CrashEvent>,
}

impl ServiceRegistry {
    /// Builds the registry and starts its crash listener.
    #[must_use]
    pub fn new(
        toolchains: Vec<Toolchain>,
        default_toolchain: Option<String>,
        documents: Arc<DocumentManager>,
        workspaces: Arc<WorkspaceRegistry>,
        capabilities: Arc<CapabilityRegistry>,
    ) -> Arc<Self> {
        let (crash_tx, crash_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            toolchains,
            default_toolchain,
            documents,
            workspaces,
            capabilities,
            crash_tx,
        });
        tokio::spawn(Self::crash_listener(Arc::downgrade(&registry), crash_rx));
        registry
    }

    /// The adapter serving `uri` in `workspace`, created on first use.
    ///
    /// # Errors
    ///
    /// Fails when no toolchain provides a backend for the language or the
    /// backend cannot be launched.
    pub async fn get(
        &self,
        uri: &Uri,
        language: Language,
        workspace: &Arc<Workspace>,
    ) -> Result<Arc<dyn LanguageService>> {
        let kind = BackendKind::for_language(language);
        workspace.assign_document(uri, kind);

        if let Some(adapter) = workspace.adapter(kind).await {
            return Ok(adapter);
        }

        let toolchain = self.pick_toolchain(language)?;
        let program = toolchain
            .server_for(kind)
            .expect("picked toolchain supports the language")
            .clone();
        info!(
            "launching {} backend from toolchain '{}' for {}",
            kind.name(),
            toolchain.name,
            workspace.root.as_str()
        );

        let adapter: Arc<dyn LanguageService> = match kind {
            BackendKind::Sema => Arc::new(
                SemaService::launch(
                    &program.to_string_lossy(),
                    &[],
                    workspace.root.clone(),
                    workspace.build_system.clone(),
                    self.crash_tx.clone(),
                )
                .await
                .map_err(Error::from)?,
            ),
            BackendKind::CFamily => Arc::new(
                CFamilyService::launch(
                    &program.to_string_lossy(),
                    &[],
                    workspace.root.clone(),
                    workspace.build_system.clone(),
                    self.crash_tx.clone(),
                )
                .await
                .map_err(Error::from)?,
            ),
        };

        // Creation suspended; someone else may have won the race.
        let (winner, installed) = workspace.install_adapter(kind, adapter.clone()).await;
        if installed {
            self.capabilities
                .register_for_service(&winner.capabilities())
                .await;
        } else {
            debug!("lost adapter creation race for {}; discarding", kind.name());
            adapter.shutdown().await;
        }
        Ok(winner)
    }

    /// Selects a toolchain for `language`: the default if it supports the
    /// language, else the first one that does.
    fn pick_toolchain(&self, language: Language) -> Result<&Toolchain> {
        if let Some(name) = &self.default_toolchain
            && let Some(toolchain) = self.toolchains.iter().find(|t| &t.name == name)
            && toolchain.supports(language)
        {
            return Ok(toolchain);
        }
        self.toolchains
            .iter()
            .find(|toolchain| toolchain.supports(language))
            .ok_or_else(|| {
                Error::Unknown(format!(
                    "no toolchain provides a backend for {}",
                    language.as_lsp_id()
                ))
            })
    }

    async fn crash_listener(
        registry: Weak<Self>,
        mut crash_rx: mpsc::UnboundedReceiver<CrashEvent>,
    ) {
        while let Some(event) = crash_rx.recv().await {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            error!(
                "{} backend crashed in {}",
                event.backend, event.workspace_root
            );
            registry.handle_crash(&event).await;
        }
    }

    async fn handle_crash(&self, event: &CrashEvent) {
        let kind = match event.backend.as_str() {
            "sema" => BackendKind::Sema,
            _ => BackendKind::CFamily,
        };
        let Some(workspace) = self
            .workspaces
            .all()
            .into_iter()
            .find(|workspace| workspace.root.as_str() == event.workspace_root)
        else {
            warn!("crash event for unknown workspace {}", event.workspace_root);
            return;
        };
        workspace.remove_adapter(kind).await;
        if let Err(e) = self.reopen_open_documents(&workspace, kind).await {
            // Leave the slot empty; the next request retries the launch.
            error!("crash recovery failed for {}: {e}", event.workspace_root);
        }
    }

    /// Re-opens every open document routed to (`workspace`, `kind`) on a
    /// fresh adapter: close first, then open with the current snapshot's
    /// language, version, and text.
    pub(crate) async fn reopen_open_documents(
        &self,
        workspace: &Arc<Workspace>,
        kind: BackendKind,
    ) -> Result<()> {
        for uri in self.documents.open_uris() {
            let Ok(routed) = self.workspaces.workspace_for(&uri).await else {
                continue;
            };
            if routed.root != workspace.root || workspace.document_service(&uri) != Some(kind) {
                continue;
            }
            let Ok(snapshot) = self.documents.latest(&uri) else {
                continue;
            };
            let adapter = match workspace.adapter(kind).await {
                Some(adapter) => adapter,
                None => self.get(&uri, snapshot.language, workspace).await?,
            };
            if let Err(e) = adapter.close_document(&uri).await {
                debug!("reopen: close of {} failed: {e}", uri.as_str());
            }
            if let Err(e) = adapter.open_document(&snapshot).await {
                warn!("reopen: open of {} failed: {e}", uri.as_str());
            } else {
                debug!("reopened {} at v{}", uri.as_str(), snapshot.version);
            }
        }
        Ok(())
    }

    /// Shuts down every adapter in every workspace.
    pub async fn shutdown_all(&self) {
        for workspace in self.workspaces.all() {
            for (kind, adapter) in workspace.adapters().await {
                info!(
                    "shutting down {} adapter for {}",
                    kind.name(),
                    workspace.root.as_str()
                );
                adapter.shutdown().await;
                workspace.remove_adapter(kind).await;
            }
        }
    }
}

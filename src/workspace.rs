// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Workspace set and URI → workspace routing.
//!
//! Routing consults each workspace's build system at most once per URI and
//! caches the verdict. The cache is cleared whenever the workspace list
//! changes or a build system reports that its file-handling capabilities
//! changed, so a URI can migrate between workspaces across those events
//! but never in between.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use lsp_types::Uri;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::document::Language;
use crate::error::{Error, Result};
use crate::index::SymbolIndex;
use crate::service::{BackendKind, LanguageService};

/// How well a build system can serve a file, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileHandlingCapability {
    /// The build system knows nothing about the file.
    Unhandled,
    /// The build system can serve the file with fallback settings.
    Fallback,
    /// The build system has real settings for the file.
    Handled,
}

/// Compiler invocation details for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSettings {
    pub compiler_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

/// The build-system collaborator, accessed per URI.
#[async_trait]
pub trait BuildSystem: Send + Sync {
    /// Compiler arguments and working directory for `uri`, if known.
    async fn build_settings(&self, uri: &Uri, language: Language) -> Option<BuildSettings>;

    /// How well this build system can serve `uri`.
    async fn file_handling_capability(&self, uri: &Uri) -> FileHandlingCapability;

    /// Invalidates cached build description after a watched file changed.
    async fn build_description_changed(&self) {}
}

/// A build system that has settings for nothing; used where a workspace is
/// opened without any build description.
pub struct NullBuildSystem;

#[async_trait]
impl BuildSystem for NullBuildSystem {
    async fn build_settings(&self, _uri: &Uri, _language: Language) -> Option<BuildSettings> {
        None
    }

    async fn file_handling_capability(&self, _uri: &Uri) -> FileHandlingCapability {
        FileHandlingCapability::Unhandled
    }
}

/// A root URI with its build system, optional index, and adapter table.
pub struct Workspace {
    pub root: Uri,
    pub build_system: Arc<dyn BuildSystem>,
    pub index: Option<Arc<dyn SymbolIndex>>,
    /// At most one adapter per backend kind; owned exclusively by this
    /// workspace and populated by the service registry.
    adapters: AsyncMutex<HashMap<BackendKind, Arc<dyn LanguageService>>>,
    /// Which backend kind serves each document. Insert-once: a document's
    /// adapter is never reassigned within a workspace.
    document_services: Mutex<HashMap<Uri, BackendKind>>,
}

impl Workspace {
    #[must_use]
    pub fn new(
        root: Uri,
        build_system: Arc<dyn BuildSystem>,
        index: Option<Arc<dyn SymbolIndex>>,
    ) -> Self {
        Self {
            root,
            build_system,
            index,
            adapters: AsyncMutex::new(HashMap::new()),
            document_services: Mutex::new(HashMap::new()),
        }
    }

    /// The adapter for `kind`, if one has been created.
    pub async fn adapter(&self, kind: BackendKind) -> Option<Arc<dyn LanguageService>> {
        self.adapters.lock().await.get(&kind).cloned()
    }

    /// Installs `adapter` for `kind` unless one exists; returns the winner.
    ///
    /// Adapter creation suspends, so two tasks can race to create the same
    /// adapter. The loser's instance is returned to the caller for
    /// shutdown-and-discard.
    pub async fn install_adapter(
        &self,
        kind: BackendKind,
        adapter: Arc<dyn LanguageService>,
    ) -> (Arc<dyn LanguageService>, bool) {
        let mut adapters = self.adapters.lock().await;
        if let Some(existing) = adapters.get(&kind) {
            (existing.clone(), false)
        } else {
            adapters.insert(kind, adapter.clone());
            (adapter, true)
        }
    }

    /// Removes the adapter for `kind`, typically after a crash.
    pub async fn remove_adapter(&self, kind: BackendKind) -> Option<Arc<dyn LanguageService>> {
        self.adapters.lock().await.remove(&kind)
    }

    /// All installed adapters.
    pub async fn adapters(&self) -> Vec<(BackendKind, Arc<dyn LanguageService>)> {
        self.adapters
            .lock()
            .await
            .iter()
            .map(|(kind, adapter)| (*kind, adapter.clone()))
            .collect()
    }

    /// Records that `uri` is served by `kind`. The first assignment wins.
    pub fn assign_document(&self, uri: &Uri, kind: BackendKind) -> BackendKind {
        let mut table = self.document_services.lock().expect("service table poisoned");
        *table.entry(uri.clone()).or_insert(kind)
    }

    /// The backend kind assigned to `uri`, if any.
    #[must_use]
    pub fn document_service(&self, uri: &Uri) -> Option<BackendKind> {
        let table = self.document_services.lock().expect("service table poisoned");
        table.get(uri).copied()
    }

    /// Drops the assignment for `uri` on close.
    pub fn unassign_document(&self, uri: &Uri) {
        let mut table = self.document_services.lock().expect("service table poisoned");
        table.remove(uri);
    }
}

/// Ordered workspace set with cached URI routing.
pub struct WorkspaceRegistry {
    workspaces: Mutex<Vec<Arc<Workspace>>>,
    cache: Mutex<HashMap<Uri, Arc<Workspace>>>,
}

impl Default for WorkspaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkspaceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            workspaces: Mutex::new(Vec::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Appends a workspace and invalidates the routing cache.
    pub fn add(&self, workspace: Arc<Workspace>) {
        info!("adding workspace {}", workspace.root.as_str());
        self.workspaces
            .lock()
            .expect("workspace list poisoned")
            .push(workspace);
        self.invalidate_cache();
    }

    /// Removes the workspace with `root`; returns it for teardown.
    pub fn remove(&self, root: &Uri) -> Option<Arc<Workspace>> {
        let mut workspaces = self.workspaces.lock().expect("workspace list poisoned");
        let position = workspaces.iter().position(|w| &w.root == root)?;
        let removed = workspaces.remove(position);
        drop(workspaces);
        info!("removed workspace {}", root.as_str());
        self.invalidate_cache();
        Some(removed)
    }

    /// All workspaces in insertion order.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Workspace>> {
        self.workspaces
            .lock()
            .expect("workspace list poisoned")
            .clone()
    }

    /// Clears the URI → workspace cache. Called on workspace-list changes
    /// and on file-handling-capability notifications.
    pub fn invalidate_cache(&self) {
        self.cache.lock().expect("routing cache poisoned").clear();
        debug!("routing cache invalidated");
    }

    /// Routes `uri` to a workspace.
    ///
    /// With one workspace, routing is unconditional. Otherwise the cached
    /// verdict is used; on a miss, every workspace's build system scores
    /// the URI and the best score wins, ties broken by insertion order.
    ///
    /// # Errors
    ///
    /// [`Error::WorkspaceNotOpen`] when no workspaces exist.
    pub async fn workspace_for(&self, uri: &Uri) -> Result<Arc<Workspace>> {
        let workspaces = self
            .workspaces
            .lock()
            .expect("workspace list poisoned")
            .clone();
        match workspaces.len() {
            0 => return Err(Error::WorkspaceNotOpen(uri.as_str().to_string())),
            1 => return Ok(workspaces[0].clone()),
            _ => {}
        }

        if let Some(hit) = self
            .cache
            .lock()
            .expect("routing cache poisoned")
            .get(uri)
            .cloned()
        {
            return Ok(hit);
        }

        let mut best: Option<(FileHandlingCapability, Arc<Workspace>)> = None;
        for workspace in &workspaces {
            let score = workspace.build_system.file_handling_capability(uri).await;
            // Strictly-greater keeps the earliest workspace on ties.
            if best.as_ref().is_none_or(|(top, _)| score > *top) {
                best = Some((score, workspace.clone()));
            }
        }
        let (score, chosen) = best.expect("non-empty workspace list");
        debug!(
            "routed {} to {} ({score:?})",
            uri.as_str(),
            chosen.root.as_str()
        );

        self.cache
            .lock()
            .expect("routing cache poisoned")
            .insert(uri.clone(), chosen.clone());
        Ok(chosen)
    }
}

/// Scans workspace roots for source files and returns the languages
/// actually present.
///
/// Respects `.gitignore` and skips hidden files, and stops early once
/// every known language has been seen. Drives file-watcher registration
/// so a pure-Swift workspace does not watch C sources.
#[must_use]
pub fn detect_workspace_languages(roots: &[std::path::PathBuf]) -> Vec<Language> {
    use std::collections::HashSet;

    const ALL: [Language; 5] = [
        Language::Swift,
        Language::C,
        Language::Cpp,
        Language::ObjectiveC,
        Language::ObjectiveCpp,
    ];
    let mut detected: HashSet<Language> = HashSet::new();

    for root in roots {
        if !root.exists() {
            continue;
        }
        let walker = ignore::WalkBuilder::new(root)
            .git_ignore(true)
            .hidden(true)
            .build();
        for entry in walker.flatten() {
            if let Some(language) = Language::from_path(entry.path()) {
                detected.insert(language);
            }
            if detected.len() == ALL.len() {
                break;
            }
        }
    }

    ALL.into_iter()
        .filter(|language| detected.contains(language))
        .collect()
}

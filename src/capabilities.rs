// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Server capabilities: the static set plus dynamic registrations.
//!
//! The static capabilities go out with the `initialize` reply. Once an
//! adapter comes up and reports what its backend can actually do, the
//! registry upgrades the relevant capabilities dynamically (completion
//! trigger characters, executable commands) and registers the file
//! watchers the build description needs.

use std::sync::Arc;
use std::sync::Mutex;

use lsp_types::{
    CallHierarchyServerCapability, CompletionOptions, DidChangeWatchedFilesRegistrationOptions,
    ExecuteCommandOptions, FileSystemWatcher, GlobPattern, HoverProviderCapability, OneOf,
    Registration, SaveOptions, ServerCapabilities, TextDocumentSyncCapability,
    TextDocumentSyncKind, TextDocumentSyncOptions, TextDocumentSyncSaveOptions,
    TypeHierarchyServerCapability, WatchKind, WorkspaceFoldersServerCapabilities,
    WorkspaceServerCapabilities,
};
use tracing::{debug, warn};

use crate::document::Language;
use crate::server::ClientHandle;
use crate::service::ServiceCapabilities;

/// Package manifest watched for build-description changes.
const PACKAGE_MANIFEST: &str = "Package.swift";

/// The capabilities pantograph always declares.
#[must_use]
pub fn static_capabilities() -> ServerCapabilities {
    ServerCapabilities {
        position_encoding: None,
        text_document_sync: Some(TextDocumentSyncCapability::Options(
            TextDocumentSyncOptions {
                open_close: Some(true),
                change: Some(TextDocumentSyncKind::INCREMENTAL),
                will_save: Some(true),
                will_save_wait_until: Some(false),
                save: Some(TextDocumentSyncSaveOptions::SaveOptions(SaveOptions {
                    include_text: Some(false),
                })),
            },
        )),
        completion_provider: Some(CompletionOptions {
            trigger_characters: Some(vec![".".to_string()]),
            ..CompletionOptions::default()
        }),
        hover_provider: Some(HoverProviderCapability::Simple(true)),
        definition_provider: Some(OneOf::Left(true)),
        declaration_provider: Some(lsp_types::DeclarationCapability::Simple(true)),
        references_provider: Some(OneOf::Left(true)),
        implementation_provider: Some(lsp_types::ImplementationProviderCapability::Simple(true)),
        document_symbol_provider: Some(OneOf::Left(true)),
        document_highlight_provider: Some(OneOf::Left(true)),
        workspace_symbol_provider: Some(OneOf::Left(true)),
        color_provider: Some(lsp_types::ColorProviderCapability::Simple(true)),
        code_action_provider: Some(lsp_types::CodeActionProviderCapability::Simple(true)),
        folding_range_provider: Some(lsp_types::FoldingRangeProviderCapability::Simple(true)),
        rename_provider: Some(OneOf::Right(lsp_types::RenameOptions {
            prepare_provider: Some(true),
            work_done_progress_options: lsp_types::WorkDoneProgressOptions::default(),
        })),
        execute_command_provider: Some(ExecuteCommandOptions {
            // Populated dynamically once a backend reports its commands.
            commands: Vec::new(),
            ..ExecuteCommandOptions::default()
        }),
        call_hierarchy_provider: Some(CallHierarchyServerCapability::Simple(true)),
        type_hierarchy_provider: Some(TypeHierarchyServerCapability::Simple(true)),
        workspace: Some(WorkspaceServerCapabilities {
            workspace_folders: Some(WorkspaceFoldersServerCapabilities {
                supported: Some(true),
                change_notifications: Some(OneOf::Left(true)),
            }),
            file_operations: None,
        }),
        ..ServerCapabilities::default()
    }
}

/// One dynamic registration made with the client.
#[derive(Debug, Clone)]
struct DynamicRegistration {
    id: String,
    method: String,
}

/// Tracks dynamic registrations on top of the static capability set.
pub struct CapabilityRegistry {
    client: Arc<dyn ClientHandle>,
    registrations: Mutex<Vec<DynamicRegistration>>,
    /// Whether the client allows dynamic registration at all. Learned from
    /// the client capabilities at initialize.
    dynamic_supported: std::sync::atomic::AtomicBool,
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new(client: Arc<dyn ClientHandle>, dynamic_supported: bool) -> Self {
        Self {
            client,
            registrations: Mutex::new(Vec::new()),
            dynamic_supported: std::sync::atomic::AtomicBool::new(dynamic_supported),
        }
    }

    /// Records whether the client supports dynamic registration.
    pub fn set_dynamic_supported(&self, supported: bool) {
        self.dynamic_supported
            .store(supported, std::sync::atomic::Ordering::SeqCst);
    }

    /// Registers `method` with the client, replacing any earlier
    /// registration for the same method.
    pub async fn register(&self, method: &str, register_options: serde_json::Value) {
        if !self
            .dynamic_supported
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            debug!("client lacks dynamic registration; keeping static {method}");
            return;
        }
        let id = format!("pantograph-{method}");
        {
            let mut registrations = self.registrations.lock().expect("registrations poisoned");
            registrations.retain(|registration| registration.method != method);
            registrations.push(DynamicRegistration {
                id: id.clone(),
                method: method.to_string(),
            });
        }
        let registration = Registration {
            id,
            method: method.to_string(),
            register_options: Some(register_options),
        };
        let params = serde_json::json!({ "registrations": [registration] });
        if let Err(e) = self.client.request("client/registerCapability", params).await {
            // Registration is an upgrade, not a requirement.
            warn!("dynamic registration of {method} failed: {e:#}");
        }
    }

    /// Methods currently registered dynamically.
    #[must_use]
    pub fn registered_methods(&self) -> Vec<String> {
        self.registrations
            .lock()
            .expect("registrations poisoned")
            .iter()
            .map(|registration| registration.method.clone())
            .collect()
    }

    /// Upgrades capabilities based on what an adapter's backend reported.
    pub async fn register_for_service(&self, capabilities: &ServiceCapabilities) {
        if !capabilities.completion_triggers.is_empty() {
            let options = CompletionOptions {
                trigger_characters: Some(capabilities.completion_triggers.clone()),
                ..CompletionOptions::default()
            };
            self.register(
                "textDocument/completion",
                serde_json::to_value(options).expect("completion options serialize"),
            )
            .await;
        }
        if !capabilities.execute_commands.is_empty() {
            let options = ExecuteCommandOptions {
                commands: capabilities.execute_commands.clone(),
                ..ExecuteCommandOptions::default()
            };
            self.register(
                "workspace/executeCommand",
                serde_json::to_value(options).expect("command options serialize"),
            )
            .await;
        }
    }

    /// Registers the file watchers the build description depends on:
    /// source files (create/delete), the package manifest (change), and
    /// compilation databases (create/change/delete).
    pub async fn register_file_watchers(&self, languages: &[Language]) {
        let mut watchers = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for language in languages {
            for extension in language.source_extensions() {
                if seen.insert(*extension) {
                    watchers.push(FileSystemWatcher {
                        glob_pattern: GlobPattern::String(format!("**/*.{extension}")),
                        kind: Some(WatchKind::Create | WatchKind::Delete),
                    });
                }
            }
        }
        watchers.push(FileSystemWatcher {
            glob_pattern: GlobPattern::String(format!("**/{PACKAGE_MANIFEST}")),
            kind: Some(WatchKind::Change),
        });
        for database in crate::compile_db::database_file_names() {
            watchers.push(FileSystemWatcher {
                glob_pattern: GlobPattern::String(format!("**/{database}")),
                kind: Some(WatchKind::Create | WatchKind::Change | WatchKind::Delete),
            });
        }
        let options = DidChangeWatchedFilesRegistrationOptions { watchers };
        self.register(
            "workspace/didChangeWatchedFiles",
            serde_json::to_value(options).expect("watcher options serialize"),
        )
        .await;
    }
}

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! The uniform capability set adapters expose to the scheduler.
//!
//! The core never talks to a backend directly; it goes through a
//! [`LanguageService`] bound to one (backend kind, workspace) pair. The
//! compile-driven adapter and the C-family adapter map these operations
//! onto their backend's payload requests in their own ways.

/// C-family backend adapter.
mod cfamily;
/// Service lifecycle and crash recovery.
mod registry;
/// Compile-driven semantic backend adapter.
mod sema;
/// Payload assembly and decoding shared by the adapters.
mod wire;

pub use cfamily::CFamilyService;
pub use registry::{ServiceRegistry, Toolchain};
pub use sema::SemaService;

use std::collections::HashMap;

use async_trait::async_trait;
use lsp_types::{
    CodeAction, CompletionItem, DocumentHighlight, DocumentSymbol, FoldingRange, Hover, Location,
    Position, Range, SemanticTokens, TextDocumentContentChangeEvent, TextEdit, Uri,
};

use crate::document::{DocumentSnapshot, Language};
use crate::error::Result;
use crate::rename::{RenameLocation, SyntacticRenameName};

/// The backend families the server multiplexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// The compile-driven semantic backend serving Swift.
    Sema,
    /// The C-family backend serving C, C++, and Objective-C.
    CFamily,
}

impl BackendKind {
    /// The backend kind that serves `language`.
    #[must_use]
    pub const fn for_language(language: Language) -> Self {
        if language.is_c_family() {
            Self::CFamily
        } else {
            Self::Sema
        }
    }

    /// Stable name for logs and crash events.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sema => "sema",
            Self::CFamily => "cfamily",
        }
    }
}

/// What an adapter reported at initialize time; drives dynamic capability
/// registration with the editor.
#[derive(Debug, Clone, Default)]
pub struct ServiceCapabilities {
    /// Whether the backend syncs documents incrementally. Anything else is
    /// fatal at adapter creation.
    pub incremental_sync: bool,
    /// Completion trigger characters beyond the static `.`.
    pub completion_triggers: Vec<String>,
    /// Commands the backend executes via `workspace/executeCommand`.
    pub execute_commands: Vec<String>,
    /// Whether the backend provides the syntactic rename-range resolver.
    pub rename_ranges: bool,
    /// Semantic token type legend, when tokens are supported.
    pub semantic_token_types: Vec<String>,
}

/// Result of a local (adapter-covered) rename.
#[derive(Debug, Clone, Default)]
pub struct LocalRename {
    /// Edits for the buffers the adapter already covers, keyed by URI.
    pub changes: HashMap<Uri, Vec<TextEdit>>,
    /// The renamed symbol's USR, when the backend resolved one.
    pub usr: Option<String>,
    /// The symbol's current compound name.
    pub old_name: Option<String>,
}

/// One symbol reported by symbol-info at a cursor.
#[derive(Debug, Clone, Default)]
pub struct SymbolDetails {
    pub name: Option<String>,
    pub usr: Option<String>,
    /// Set when the cursor names a module rather than a declaration.
    pub module_name: Option<String>,
    pub is_system: bool,
    /// The best declaration visible in the adapter's own buffers.
    pub best_local_declaration: Option<Location>,
}

/// Range plus placeholder returned by prepare-rename.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRename {
    pub range: Range,
    pub placeholder: String,
}

/// A generated textual interface for a module.
#[derive(Debug, Clone)]
pub struct InterfaceDocument {
    pub uri: Uri,
    /// Position of the requested symbol within the interface, when a USR
    /// was supplied and found.
    pub position: Option<Position>,
}

/// Semantic token query flavors.
#[derive(Debug, Clone)]
pub enum SemanticTokensQuery {
    Full,
    Range(Range),
    Delta { previous_result_id: String },
}

/// The capability set the scheduler programs against.
#[async_trait]
pub trait LanguageService: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Capabilities reported during the initialize handshake.
    fn capabilities(&self) -> ServiceCapabilities;

    /// True when this adapter can serve documents of `workspace_root`.
    fn can_handle(&self, workspace_root: &Uri) -> bool;

    // Document synchronization.
    async fn open_document(&self, snapshot: &DocumentSnapshot) -> Result<()>;
    async fn close_document(&self, uri: &Uri) -> Result<()>;
    /// Forwards edits; `changes` are relative to the text of `before`.
    async fn change_document(
        &self,
        before: &DocumentSnapshot,
        changes: &[TextDocumentContentChangeEvent],
    ) -> Result<()>;
    async fn save_document(&self, uri: &Uri) -> Result<()>;

    // Queries.
    async fn completion(
        &self,
        snapshot: &DocumentSnapshot,
        position: Position,
    ) -> Result<Vec<CompletionItem>>;
    async fn hover(&self, snapshot: &DocumentSnapshot, position: Position)
    -> Result<Option<Hover>>;
    async fn symbol_info(
        &self,
        snapshot: &DocumentSnapshot,
        position: Position,
    ) -> Result<Vec<SymbolDetails>>;
    async fn definition(
        &self,
        snapshot: &DocumentSnapshot,
        position: Position,
    ) -> Result<Vec<Location>>;
    async fn declaration(
        &self,
        snapshot: &DocumentSnapshot,
        position: Position,
    ) -> Result<Vec<Location>>;
    async fn references(
        &self,
        snapshot: &DocumentSnapshot,
        position: Position,
        include_declaration: bool,
    ) -> Result<Vec<Location>>;
    async fn implementation(
        &self,
        snapshot: &DocumentSnapshot,
        position: Position,
    ) -> Result<Vec<Location>>;
    async fn document_symbols(&self, snapshot: &DocumentSnapshot) -> Result<Vec<DocumentSymbol>>;
    async fn document_highlight(
        &self,
        snapshot: &DocumentSnapshot,
        position: Position,
    ) -> Result<Vec<DocumentHighlight>>;
    async fn folding_ranges(&self, snapshot: &DocumentSnapshot) -> Result<Vec<FoldingRange>>;
    async fn semantic_tokens(
        &self,
        snapshot: &DocumentSnapshot,
        query: SemanticTokensQuery,
    ) -> Result<SemanticTokens>;
    async fn document_color(&self, snapshot: &DocumentSnapshot)
    -> Result<Vec<lsp_types::ColorInformation>>;
    async fn color_presentation(
        &self,
        snapshot: &DocumentSnapshot,
        color: lsp_types::Color,
        range: Range,
    ) -> Result<Vec<lsp_types::ColorPresentation>>;
    async fn code_actions(
        &self,
        snapshot: &DocumentSnapshot,
        range: Range,
    ) -> Result<Vec<CodeAction>>;
    async fn inlay_hints(
        &self,
        snapshot: &DocumentSnapshot,
        range: Range,
    ) -> Result<Vec<lsp_types::InlayHint>>;
    async fn document_diagnostics(
        &self,
        snapshot: &DocumentSnapshot,
    ) -> Result<Vec<lsp_types::Diagnostic>>;
    async fn execute_command(
        &self,
        command: &str,
        arguments: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value>;

    /// Generates (or reuses) the textual interface for `module_name`.
    async fn open_interface(
        &self,
        module_name: &str,
        usr: Option<&str>,
    ) -> Result<InterfaceDocument>;

    // Rename family.
    async fn rename(
        &self,
        snapshot: &DocumentSnapshot,
        position: Position,
        new_name: &str,
    ) -> Result<LocalRename>;
    async fn prepare_rename(
        &self,
        snapshot: &DocumentSnapshot,
        position: Position,
    ) -> Result<Option<PreparedRename>>;
    /// Resolves categorized syntactic rename ranges for `locations` in
    /// `snapshot`, one entry per location in order.
    async fn edits_to_rename(
        &self,
        locations: &[RenameLocation],
        snapshot: &DocumentSnapshot,
        old_name: &str,
        new_name: &str,
    ) -> Result<Vec<SyntacticRenameName>>;

    // Out-of-band hooks.
    async fn document_updated_build_settings(&self, snapshot: &DocumentSnapshot) -> Result<()>;
    async fn document_dependencies_updated(&self, uri: &Uri) -> Result<()>;

    /// Orderly teardown of the backend connection.
    async fn shutdown(&self);
}

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Adapter for the C-family backend.
//!
//! The C-family backend serves C, C++, and Objective-C translation units
//! whose compiler arguments come from the workspace's compilation
//! database. Its capability set is narrower than the semantic backend's:
//! no module interfaces, no syntactic rename-range resolver, no color
//! support. Operations it lacks fail with `version-not-supported` so the
//! layers above can fall back or report precisely.

use std::sync::Arc;

use anyhow::{Context as _, Result as AnyResult, anyhow};
use async_trait::async_trait;
use lsp_types::{
    CodeAction, CodeActionKind, Color, ColorInformation, ColorPresentation, CompletionItem,
    Diagnostic, DocumentHighlight, DocumentSymbol, FoldingRange, Hover, HoverContents, InlayHint,
    InlayHintLabel, Location, MarkupContent, MarkupKind, Position, Range, SemanticToken,
    SemanticTokens, TextDocumentContentChangeEvent, Uri,
};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::wire;
use super::{
    BackendKind, InterfaceDocument, LanguageService, LocalRename, PreparedRename,
    SemanticTokensQuery, ServiceCapabilities, SymbolDetails,
};
use crate::backend::{BackendChannel, CrashEvent};
use crate::document::{DocumentSnapshot, LineTable};
use crate::error::{Error, Result};
use crate::payload::{Payload, WellKnownKeys};
use crate::rename::{CompoundDeclName, RenameLocation, SyntacticRenameName};
use crate::workspace::BuildSystem;

/// Per-workspace adapter over the C-family backend.
pub struct CFamilyService {
    channel: BackendChannel,
    workspace_root: Uri,
    build_system: Arc<dyn BuildSystem>,
    capabilities: ServiceCapabilities,
}

impl CFamilyService {
    /// Spawns the backend and checks the handshake.
    ///
    /// # Errors
    ///
    /// Fails when the process cannot start or does not sync incrementally.
    pub async fn launch(
        program: &str,
        args: &[String],
        workspace_root: Uri,
        build_system: Arc<dyn BuildSystem>,
        crash_tx: mpsc::UnboundedSender<CrashEvent>,
    ) -> AnyResult<Self> {
        let crash_event = CrashEvent {
            workspace_root: workspace_root.as_str().to_string(),
            backend: BackendKind::CFamily.name().to_string(),
        };
        let channel = BackendChannel::spawn(program, args, crash_event, crash_tx).await?;

        let keys = channel.keys();
        let request = wire::request(&keys, keys.request_capabilities).build();
        let response = channel
            .send(channel.fresh_handle(), request, None)
            .await
            .context("capability handshake")?;
        let incremental = response
            .get(keys.cap_incremental)
            .and_then(Payload::as_bool)
            .unwrap_or(false);
        if !incremental {
            return Err(anyhow!(
                "c-family backend does not support incremental document sync"
            ));
        }
        let capabilities = ServiceCapabilities {
            incremental_sync: true,
            completion_triggers: vec![".".to_string(), ">".to_string(), ":".to_string()],
            execute_commands: Vec::new(),
            rename_ranges: false,
            semantic_token_types: response
                .get(keys.cap_token_types)
                .and_then(Payload::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Payload::as_str)
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        };
        debug!("cfamily adapter up for {}", workspace_root.as_str());
        Ok(Self {
            channel,
            workspace_root,
            build_system,
            capabilities,
        })
    }

    fn keys(&self) -> WellKnownKeys {
        self.channel.keys()
    }

    async fn send(&self, request: Payload, text: Option<&str>) -> Result<Payload> {
        self.channel
            .send(self.channel.fresh_handle(), request, text)
            .await
            .map_err(Error::from)
    }

    async fn cursor_info(
        &self,
        snapshot: &DocumentSnapshot,
        position: Position,
    ) -> Result<Payload> {
        let keys = self.keys();
        let builder = wire::request(&keys, keys.request_cursor_info);
        let builder = wire::with_position(builder, &keys, snapshot, position)?;
        self.send(builder.build(), None).await
    }

    async fn related_ranges(
        &self,
        snapshot: &DocumentSnapshot,
        position: Position,
    ) -> Result<Vec<Range>> {
        let keys = self.keys();
        let builder = wire::request(&keys, keys.request_related_idents);
        let builder = wire::with_position(builder, &keys, snapshot, position)?;
        let response = self.send(builder.build(), None).await?;
        let results = response
            .get(keys.results)
            .and_then(Payload::as_array)
            .ok_or_else(|| Error::Internal("related idents reply has no results".to_string()))?;
        Ok(results
            .iter()
            .filter_map(|entry| wire::range_from_dict(&keys, entry, snapshot))
            .collect())
    }
}

#[async_trait]
impl LanguageService for CFamilyService {
    fn kind(&self) -> BackendKind {
        BackendKind::CFamily
    }

    fn capabilities(&self) -> ServiceCapabilities {
        self.capabilities.clone()
    }

    fn can_handle(&self, workspace_root: &Uri) -> bool {
        &self.workspace_root == workspace_root
    }

    async fn open_document(&self, snapshot: &DocumentSnapshot) -> Result<()> {
        let keys = self.keys();
        let settings = self
            .build_system
            .build_settings(&snapshot.uri, snapshot.language)
            .await;
        let args = settings
            .as_ref()
            .map(|s| s.compiler_args.clone())
            .unwrap_or_default();
        let builder = wire::request(&keys, keys.request_editor_open)
            .set(
                keys.source_file,
                Payload::String(snapshot.uri.as_str().to_string()),
            )
            .set(
                keys.compiler_args,
                Payload::Array(args.into_iter().map(Payload::String).collect()),
            )
            .set_if(
                keys.working_dir,
                settings.and_then(|s| s.working_dir).map(|dir| {
                    Payload::String(dir.display().to_string())
                }),
            );
        self.send(builder.build(), Some(&snapshot.text)).await?;
        Ok(())
    }

    async fn close_document(&self, uri: &Uri) -> Result<()> {
        let keys = self.keys();
        let request = wire::request(&keys, keys.request_editor_close)
            .set(keys.source_file, Payload::String(uri.as_str().to_string()))
            .build();
        self.send(request, None).await?;
        Ok(())
    }

    async fn change_document(
        &self,
        before: &DocumentSnapshot,
        changes: &[TextDocumentContentChangeEvent],
    ) -> Result<()> {
        let keys = self.keys();
        let mut text = before.text.to_string();
        for change in changes {
            let (offset, length) = match change.range {
                Some(range) => {
                    let table = LineTable::new(&text);
                    let start = table.offset_utf16(&text, range.start.line, range.start.character)?;
                    let end = table.offset_utf16(&text, range.end.line, range.end.character)?;
                    if start > end {
                        return Err(Error::InvalidRange(range));
                    }
                    (start, end - start)
                }
                None => (0, text.len()),
            };
            let request = wire::request(&keys, keys.request_editor_replace_text)
                .set(
                    keys.source_file,
                    Payload::String(before.uri.as_str().to_string()),
                )
                .set(keys.offset, Payload::Int(offset as i64))
                .set(keys.length, Payload::Int(length as i64))
                .build();
            self.send(request, Some(&change.text)).await?;
            text.replace_range(offset..offset + length, &change.text);
        }
        Ok(())
    }

    async fn save_document(&self, uri: &Uri) -> Result<()> {
        // Saving can invalidate preamble caches; let the backend know.
        let keys = self.keys();
        let notification = wire::request(&keys, keys.request_dependencies_updated)
            .set(keys.source_file, Payload::String(uri.as_str().to_string()))
            .build();
        self.channel
            .send_notification(notification)
            .await
            .map_err(Error::from)
    }

    async fn completion(
        &self,
        snapshot: &DocumentSnapshot,
        position: Position,
    ) -> Result<Vec<CompletionItem>> {
        let keys = self.keys();
        let builder = wire::request(&keys, keys.request_code_complete);
        let builder = wire::with_position(builder, &keys, snapshot, position)?;
        let response = self.send(builder.build(), Some(&snapshot.text)).await?;
        let results = response
            .get(keys.results)
            .and_then(Payload::as_array)
            .unwrap_or(&[]);
        Ok(wire::completion_items(&keys, &self.channel.table(), results))
    }

    async fn hover(
        &self,
        snapshot: &DocumentSnapshot,
        position: Position,
    ) -> Result<Option<Hover>> {
        let keys = self.keys();
        let info = self.cursor_info(snapshot, position).await?;
        let Some(description) = info.get(keys.description).and_then(Payload::as_str) else {
            return Ok(None);
        };
        Ok(Some(Hover {
            contents: HoverContents::Markup(MarkupContent {
                kind: MarkupKind::PlainText,
                value: description.to_string(),
            }),
            range: None,
        }))
    }

    async fn symbol_info(
        &self,
        snapshot: &DocumentSnapshot,
        position: Position,
    ) -> Result<Vec<SymbolDetails>> {
        let keys = self.keys();
        let info = self.cursor_info(snapshot, position).await?;
        Ok(vec![SymbolDetails {
            name: info
                .get(keys.name)
                .and_then(Payload::as_str)
                .map(ToString::to_string),
            usr: info
                .get(keys.usr)
                .and_then(Payload::as_str)
                .map(ToString::to_string),
            // C-family symbols never resolve to textual module interfaces.
            module_name: None,
            is_system: info
                .get(keys.is_system)
                .and_then(Payload::as_bool)
                .unwrap_or(false),
            best_local_declaration: wire::location_from_dict(&keys, &info, snapshot),
        }])
    }

    async fn definition(
        &self,
        snapshot: &DocumentSnapshot,
        position: Position,
    ) -> Result<Vec<Location>> {
        let symbols = self.symbol_info(snapshot, position).await?;
        Ok(symbols
            .into_iter()
            .filter_map(|symbol| symbol.best_local_declaration)
            .take(1)
            .collect())
    }

    async fn declaration(
        &self,
        snapshot: &DocumentSnapshot,
        position: Position,
    ) -> Result<Vec<Location>> {
        self.definition(snapshot, position).await
    }

    async fn references(
        &self,
        snapshot: &DocumentSnapshot,
        position: Position,
        _include_declaration: bool,
    ) -> Result<Vec<Location>> {
        let ranges = self.related_ranges(snapshot, position).await?;
        Ok(ranges
            .into_iter()
            .map(|range| Location {
                uri: snapshot.uri.clone(),
                range,
            })
            .collect())
    }

    async fn implementation(
        &self,
        _snapshot: &DocumentSnapshot,
        _position: Position,
    ) -> Result<Vec<Location>> {
        Ok(Vec::new())
    }

    async fn document_symbols(&self, snapshot: &DocumentSnapshot) -> Result<Vec<DocumentSymbol>> {
        let keys = self.keys();
        let request = wire::request(&keys, keys.request_hover)
            .set(
                keys.source_file,
                Payload::String(snapshot.uri.as_str().to_string()),
            )
            .build();
        let response = self.send(request, Some(&snapshot.text)).await?;
        let entities = response
            .get(keys.entities)
            .and_then(Payload::as_array)
            .unwrap_or(&[]);
        Ok(wire::document_symbols_from_entities(
            &keys,
            &self.channel.table(),
            entities,
            snapshot,
        ))
    }

    async fn document_highlight(
        &self,
        snapshot: &DocumentSnapshot,
        position: Position,
    ) -> Result<Vec<DocumentHighlight>> {
        let ranges = self.related_ranges(snapshot, position).await?;
        Ok(ranges
            .into_iter()
            .map(|range| DocumentHighlight { range, kind: None })
            .collect())
    }

    async fn folding_ranges(&self, snapshot: &DocumentSnapshot) -> Result<Vec<FoldingRange>> {
        // Fold on symbol extents, same as the structure reply provides.
        let symbols = self.document_symbols(snapshot).await?;
        fn collect(symbols: &[DocumentSymbol], out: &mut Vec<FoldingRange>) {
            for symbol in symbols {
                if symbol.range.end.line > symbol.range.start.line {
                    out.push(FoldingRange {
                        start_line: symbol.range.start.line,
                        start_character: None,
                        end_line: symbol.range.end.line,
                        end_character: None,
                        kind: None,
                        collapsed_text: None,
                    });
                }
                if let Some(children) = &symbol.children {
                    collect(children, out);
                }
            }
        }
        let mut ranges = Vec::new();
        collect(&symbols, &mut ranges);
        Ok(ranges)
    }

    async fn semantic_tokens(
        &self,
        snapshot: &DocumentSnapshot,
        query: SemanticTokensQuery,
    ) -> Result<SemanticTokens> {
        let keys = self.keys();
        let mut builder = wire::request(&keys, keys.request_semantic_tokens).set(
            keys.source_file,
            Payload::String(snapshot.uri.as_str().to_string()),
        );
        match query {
            SemanticTokensQuery::Full => {}
            SemanticTokensQuery::Range(range) => {
                let bytes = snapshot.byte_range(range)?;
                builder = builder
                    .set(keys.offset, Payload::Int(bytes.start as i64))
                    .set(keys.length, Payload::Int(bytes.len() as i64));
            }
            SemanticTokensQuery::Delta { .. } => {
                return Err(Error::VersionNotSupported(
                    "semantic token deltas".to_string(),
                ));
            }
        }
        let response = self.send(builder.build(), Some(&snapshot.text)).await?;
        let data = response
            .get(keys.results)
            .and_then(Payload::as_array)
            .map(|ints| {
                ints.chunks(5)
                    .filter(|chunk| chunk.len() == 5)
                    .filter_map(|chunk| {
                        let field = |i: usize| {
                            chunk[i].as_int().and_then(|v| u32::try_from(v).ok())
                        };
                        Some(SemanticToken {
                            delta_line: field(0)?,
                            delta_start: field(1)?,
                            length: field(2)?,
                            token_type: field(3)?,
                            token_modifiers_bitset: field(4)?,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(SemanticTokens {
            result_id: None,
            data,
        })
    }

    async fn document_color(&self, _snapshot: &DocumentSnapshot) -> Result<Vec<ColorInformation>> {
        Err(Error::VersionNotSupported("document colors".to_string()))
    }

    async fn color_presentation(
        &self,
        _snapshot: &DocumentSnapshot,
        _color: Color,
        _range: Range,
    ) -> Result<Vec<ColorPresentation>> {
        Err(Error::VersionNotSupported("color presentation".to_string()))
    }

    async fn code_actions(
        &self,
        snapshot: &DocumentSnapshot,
        range: Range,
    ) -> Result<Vec<CodeAction>> {
        // The backend reports fix-its as title plus a single edit.
        let keys = self.keys();
        let builder = wire::request(&keys, keys.request_available_refactorings);
        let builder = wire::with_position(builder, &keys, snapshot, range.start)?;
        let response = self.send(builder.build(), Some(&snapshot.text)).await?;
        let results = response
            .get(keys.results)
            .and_then(Payload::as_array)
            .unwrap_or(&[]);
        Ok(results
            .iter()
            .filter_map(|entry| {
                let title = entry.get(keys.name)?.as_str()?.to_string();
                let edit_range = wire::range_from_dict(&keys, entry, snapshot)?;
                let new_text = entry
                    .get(keys.description)
                    .and_then(Payload::as_str)
                    .unwrap_or_default()
                    .to_string();
                let mut changes = std::collections::HashMap::new();
                changes.insert(
                    snapshot.uri.clone(),
                    vec![lsp_types::TextEdit {
                        range: edit_range,
                        new_text,
                    }],
                );
                Some(CodeAction {
                    title,
                    kind: Some(CodeActionKind::QUICKFIX),
                    edit: Some(lsp_types::WorkspaceEdit {
                        changes: Some(changes),
                        ..lsp_types::WorkspaceEdit::default()
                    }),
                    ..CodeAction::default()
                })
            })
            .collect())
    }

    async fn inlay_hints(
        &self,
        snapshot: &DocumentSnapshot,
        range: Range,
    ) -> Result<Vec<InlayHint>> {
        let keys = self.keys();
        let bytes = snapshot.byte_range(range)?;
        let request = wire::request(&keys, keys.request_inlay_hints)
            .set(
                keys.source_file,
                Payload::String(snapshot.uri.as_str().to_string()),
            )
            .set(keys.offset, Payload::Int(bytes.start as i64))
            .set(keys.length, Payload::Int(bytes.len() as i64))
            .build();
        let response = self.send(request, Some(&snapshot.text)).await?;
        let results = response
            .get(keys.results)
            .and_then(Payload::as_array)
            .unwrap_or(&[]);
        Ok(results
            .iter()
            .filter_map(|entry| {
                let text = entry.get(keys.description)?.as_str()?.to_string();
                let range = wire::range_from_dict(&keys, entry, snapshot)?;
                Some(InlayHint {
                    position: range.start,
                    label: InlayHintLabel::String(text),
                    kind: None,
                    text_edits: None,
                    tooltip: None,
                    padding_left: None,
                    padding_right: None,
                    data: None,
                })
            })
            .collect())
    }

    async fn document_diagnostics(&self, snapshot: &DocumentSnapshot) -> Result<Vec<Diagnostic>> {
        let keys = self.keys();
        let request = wire::request(&keys, keys.request_diagnostics)
            .set(
                keys.source_file,
                Payload::String(snapshot.uri.as_str().to_string()),
            )
            .build();
        let response = self.send(request, Some(&snapshot.text)).await?;
        let results = response
            .get(keys.results)
            .and_then(Payload::as_array)
            .unwrap_or(&[]);
        Ok(wire::diagnostics_from_results(&keys, results, snapshot))
    }

    async fn execute_command(
        &self,
        command: &str,
        _arguments: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        Err(Error::VersionNotSupported(format!(
            "command {command}"
        )))
    }

    async fn open_interface(
        &self,
        module_name: &str,
        _usr: Option<&str>,
    ) -> Result<InterfaceDocument> {
        Err(Error::VersionNotSupported(format!(
            "textual interface for {module_name}"
        )))
    }

    async fn rename(
        &self,
        snapshot: &DocumentSnapshot,
        position: Position,
        new_name: &str,
    ) -> Result<LocalRename> {
        let keys = self.keys();
        let info = self.cursor_info(snapshot, position).await?;
        let usr = info
            .get(keys.usr)
            .and_then(Payload::as_str)
            .map(ToString::to_string);
        let old_name = info
            .get(keys.name)
            .and_then(Payload::as_str)
            .map(ToString::to_string);
        let new_base = CompoundDeclName::parse(new_name).base;
        let edits: Vec<lsp_types::TextEdit> = self
            .related_ranges(snapshot, position)
            .await?
            .into_iter()
            .map(|range| lsp_types::TextEdit {
                range,
                new_text: new_base.clone(),
            })
            .collect();
        let mut changes = std::collections::HashMap::new();
        if !edits.is_empty() {
            changes.insert(snapshot.uri.clone(), edits);
        }
        Ok(LocalRename {
            changes,
            usr,
            old_name,
        })
    }

    async fn prepare_rename(
        &self,
        snapshot: &DocumentSnapshot,
        position: Position,
    ) -> Result<Option<PreparedRename>> {
        let keys = self.keys();
        let info = self.cursor_info(snapshot, position).await?;
        let Some(name) = info.get(keys.name).and_then(Payload::as_str) else {
            return Ok(None);
        };
        let ranges = self.related_ranges(snapshot, position).await?;
        let at_cursor = ranges.into_iter().find(|range| {
            range.start.line == position.line
                && range.start.character <= position.character
                && position.character <= range.end.character
        });
        Ok(at_cursor.map(|range| PreparedRename {
            range,
            placeholder: name.to_string(),
        }))
    }

    async fn edits_to_rename(
        &self,
        _locations: &[RenameLocation],
        _snapshot: &DocumentSnapshot,
        _old_name: &str,
        _new_name: &str,
    ) -> Result<Vec<SyntacticRenameName>> {
        Err(Error::VersionNotSupported(
            "syntactic rename-range resolver".to_string(),
        ))
    }

    async fn document_updated_build_settings(&self, snapshot: &DocumentSnapshot) -> Result<()> {
        debug!(
            "compilation database changed, re-registering {}",
            snapshot.uri.as_str()
        );
        if let Err(e) = self.close_document(&snapshot.uri).await {
            trace!("re-register close failed: {e}");
        }
        self.open_document(snapshot).await
    }

    async fn document_dependencies_updated(&self, uri: &Uri) -> Result<()> {
        let keys = self.keys();
        let notification = wire::request(&keys, keys.request_dependencies_updated)
            .set(keys.source_file, Payload::String(uri.as_str().to_string()))
            .build();
        self.channel
            .send_notification(notification)
            .await
            .map_err(Error::from)
    }

    async fn shutdown(&self) {
        self.channel.shutdown().await;
    }
}

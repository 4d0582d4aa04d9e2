// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Adapter for the compile-driven semantic backend.
//!
//! Every operation becomes one payload request against the backend child
//! process. The backend compiles what it is given: open documents carry
//! their compiler arguments from the build system, and semantic queries
//! address positions as byte offsets into the registered text.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result as AnyResult, anyhow};
use async_trait::async_trait;
use lsp_types::{
    CodeAction, CodeActionKind, Color, ColorInformation, ColorPresentation, Command,
    CompletionItem, Diagnostic, DocumentHighlight, DocumentSymbol, FoldingRange, FoldingRangeKind,
    Hover, HoverContents, InlayHint, InlayHintLabel, Location, MarkupContent, MarkupKind, Position,
    Range, SemanticToken, SemanticTokens, TextDocumentContentChangeEvent, TextEdit, Uri,
};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::wire;
use super::{
    BackendKind, InterfaceDocument, LanguageService, LocalRename, PreparedRename,
    SemanticTokensQuery, ServiceCapabilities, SymbolDetails,
};
use crate::backend::{BackendChannel, CrashEvent};
use crate::document::{DocumentSnapshot, LineTable, path_to_uri};
use crate::error::{Error, Result};
use crate::payload::{Payload, Uid, WellKnownKeys};
use crate::rename::{CompoundDeclName, RenameLocation, SyntacticRenameName};
use crate::workspace::BuildSystem;

/// Per-(workspace) adapter over the semantic backend.
pub struct SemaService {
    channel: BackendChannel,
    workspace_root: Uri,
    build_system: Arc<dyn BuildSystem>,
    capabilities: ServiceCapabilities,
}

impl SemaService {
    /// Spawns the backend and performs the capability handshake.
    ///
    /// # Errors
    ///
    /// Fails when the process cannot start or when the backend does not
    /// sync documents incrementally, which the core requires.
    pub async fn launch(
        program: &str,
        args: &[String],
        workspace_root: Uri,
        build_system: Arc<dyn BuildSystem>,
        crash_tx: mpsc::UnboundedSender<CrashEvent>,
    ) -> AnyResult<Self> {
        let crash_event = CrashEvent {
            workspace_root: workspace_root.as_str().to_string(),
            backend: BackendKind::Sema.name().to_string(),
        };
        let channel = BackendChannel::spawn(program, args, crash_event, crash_tx).await?;
        let capabilities = Self::negotiate(&channel).await?;
        if !capabilities.incremental_sync {
            return Err(anyhow!(
                "semantic backend does not support incremental document sync"
            ));
        }
        debug!(
            "sema adapter up for {} ({} commands)",
            workspace_root.as_str(),
            capabilities.execute_commands.len()
        );
        Ok(Self {
            channel,
            workspace_root,
            build_system,
            capabilities,
        })
    }

    async fn negotiate(channel: &BackendChannel) -> AnyResult<ServiceCapabilities> {
        let keys = channel.keys();
        let request = wire::request(&keys, keys.request_capabilities).build();
        let response = channel
            .send(channel.fresh_handle(), request, None)
            .await
            .context("capability handshake")?;
        let string_list = |value: Option<&Payload>| -> Vec<String> {
            value
                .and_then(Payload::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Payload::as_str)
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };
        Ok(ServiceCapabilities {
            incremental_sync: response
                .get(keys.cap_incremental)
                .and_then(Payload::as_bool)
                .unwrap_or(false),
            completion_triggers: string_list(response.get(keys.cap_triggers)),
            execute_commands: string_list(response.get(keys.cap_commands)),
            rename_ranges: response
                .get(keys.cap_rename_ranges)
                .and_then(Payload::as_bool)
                .unwrap_or(false),
            semantic_token_types: string_list(response.get(keys.cap_token_types)),
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

    async fn compiler_args(&self, uri: &Uri, snapshot: &DocumentSnapshot) -> Vec<String> {
        self.build_system
            .build_settings(uri, snapshot.language)
            .await
            .map(|settings| settings.compiler_args)
            .unwrap_or_default()
    }

    /// Issues a cursor-info request at `position`.
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

    /// Ranges of identifiers related to the one at `position`, within the
    /// same file.
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

    /// Decodes the entity tree of a structure reply.
    async fn structure_entities(&self, snapshot: &DocumentSnapshot) -> Result<Payload> {
        let keys = self.keys();
        let request = wire::request(&keys, keys.request_hover)
            .set(
                keys.source_file,
                Payload::String(snapshot.uri.as_str().to_string()),
            )
            .build();
        self.send(request, Some(&snapshot.text)).await
    }

    fn decode_symbol(&self, info: &Payload, snapshot: &DocumentSnapshot) -> SymbolDetails {
        let keys = self.keys();
        SymbolDetails {
            name: info
                .get(keys.name)
                .and_then(Payload::as_str)
                .map(ToString::to_string),
            usr: info
                .get(keys.usr)
                .and_then(Payload::as_str)
                .map(ToString::to_string),
            module_name: info
                .get(keys.module_name)
                .and_then(Payload::as_str)
                .map(ToString::to_string),
            is_system: info
                .get(keys.is_system)
                .and_then(Payload::as_bool)
                .unwrap_or(false),
            best_local_declaration: wire::location_from_dict(&keys, info, snapshot),
        }
    }
}

#[async_trait]
impl LanguageService for SemaService {
    fn kind(&self) -> BackendKind {
        BackendKind::Sema
    }

    fn capabilities(&self) -> ServiceCapabilities {
        self.capabilities.clone()
    }

    fn can_handle(&self, workspace_root: &Uri) -> bool {
        &self.workspace_root == workspace_root
    }

    async fn open_document(&self, snapshot: &DocumentSnapshot) -> Result<()> {
        let keys = self.keys();
        let args = self.compiler_args(&snapshot.uri, snapshot).await;
        let request = wire::request(&keys, keys.request_editor_open)
            .set(
                keys.source_file,
                Payload::String(snapshot.uri.as_str().to_string()),
            )
            .set(
                keys.compiler_args,
                Payload::Array(args.into_iter().map(Payload::String).collect()),
            )
            .set(keys.enable_syntax_map, Payload::Bool(false))
            .build();
        self.send(request, Some(&snapshot.text)).await?;
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
        // Changes address the evolving text, so offsets are recomputed
        // against each intermediate state.
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
        // The backend compiles from the registered buffer; saving changes
        // nothing it can observe.
        trace!("save ignored for {}", uri.as_str());
        Ok(())
    }

    async fn completion(
        &self,
        snapshot: &DocumentSnapshot,
        position: Position,
    ) -> Result<Vec<CompletionItem>> {
        let keys = self.keys();
        let builder = wire::request(&keys, keys.request_code_complete);
        let builder = wire::with_position(builder, &keys, snapshot, position)?;
        let args = self.compiler_args(&snapshot.uri, snapshot).await;
        let request = builder
            .set(
                keys.compiler_args,
                Payload::Array(args.into_iter().map(Payload::String).collect()),
            )
            .build();
        let response = self.send(request, Some(&snapshot.text)).await?;
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
        let Some(name) = info.get(keys.name).and_then(Payload::as_str) else {
            return Ok(None);
        };
        let mut value = format!("```swift\n{name}\n```");
        if let Some(description) = info.get(keys.description).and_then(Payload::as_str) {
            value.push_str("\n\n");
            value.push_str(description);
        }
        Ok(Some(Hover {
            contents: HoverContents::Markup(MarkupContent {
                kind: MarkupKind::Markdown,
                value,
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
        let mut symbols = vec![self.decode_symbol(&info, snapshot)];
        if let Some(secondary) = info.get(keys.secondary_symbols).and_then(Payload::as_array) {
            symbols.extend(
                secondary
                    .iter()
                    .map(|entry| self.decode_symbol(entry, snapshot)),
            );
        }
        Ok(symbols)
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
        // The backend only sees one file; cross-file references come from
        // the index layer above.
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
        let response = self.structure_entities(snapshot).await?;
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
        let keys = self.keys();
        let response = self.structure_entities(snapshot).await?;
        let entities = response
            .get(keys.entities)
            .and_then(Payload::as_array)
            .unwrap_or(&[]);
        let symbols = wire::document_symbols_from_entities(
            &keys,
            &self.channel.table(),
            entities,
            snapshot,
        );
        fn collect(symbols: &[DocumentSymbol], out: &mut Vec<FoldingRange>) {
            for symbol in symbols {
                if symbol.range.end.line > symbol.range.start.line {
                    out.push(FoldingRange {
                        start_line: symbol.range.start.line,
                        start_character: Some(symbol.range.start.character),
                        end_line: symbol.range.end.line,
                        end_character: Some(symbol.range.end.character),
                        kind: Some(FoldingRangeKind::Region),
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
            SemanticTokensQuery::Delta { previous_result_id } => {
                builder = builder.set(keys.result_id, Payload::String(previous_result_id));
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
            result_id: response
                .get(keys.result_id)
                .and_then(Payload::as_str)
                .map(ToString::to_string),
            data,
        })
    }

    async fn document_color(&self, snapshot: &DocumentSnapshot) -> Result<Vec<ColorInformation>> {
        let keys = self.keys();
        let request = wire::request(&keys, keys.request_document_colors)
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
        let component = |entry: &Payload, key: Uid| {
            entry
                .get(key)
                .and_then(Payload::as_int)
                .map_or(0.0, |v| v as f32 / 255.0)
        };
        Ok(results
            .iter()
            .filter_map(|entry| {
                let range = wire::range_from_dict(&keys, entry, snapshot)?;
                Some(ColorInformation {
                    range,
                    color: Color {
                        red: component(entry, keys.color_red),
                        green: component(entry, keys.color_green),
                        blue: component(entry, keys.color_blue),
                        alpha: component(entry, keys.color_alpha),
                    },
                })
            })
            .collect())
    }

    async fn color_presentation(
        &self,
        _snapshot: &DocumentSnapshot,
        color: Color,
        range: Range,
    ) -> Result<Vec<ColorPresentation>> {
        // Presentation is purely textual; no backend round-trip needed.
        let label = format!(
            "Color(red: {:.3}, green: {:.3}, blue: {:.3}, opacity: {:.3})",
            color.red, color.green, color.blue, color.alpha
        );
        Ok(vec![ColorPresentation {
            label: label.clone(),
            text_edit: Some(TextEdit {
                range,
                new_text: label,
            }),
            additional_text_edits: None,
        }])
    }

    async fn code_actions(
        &self,
        snapshot: &DocumentSnapshot,
        range: Range,
    ) -> Result<Vec<CodeAction>> {
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
                Some(CodeAction {
                    title: title.clone(),
                    kind: Some(CodeActionKind::REFACTOR),
                    command: Some(Command {
                        title,
                        command: "pantograph.applyRefactoring".to_string(),
                        arguments: Some(vec![serde_json::json!({
                            "uri": snapshot.uri.as_str(),
                            "line": range.start.line,
                            "character": range.start.character,
                        })]),
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
                    padding_right: Some(false),
                    data: None,
                })
            })
            .collect())
    }

    async fn document_diagnostics(&self, snapshot: &DocumentSnapshot) -> Result<Vec<Diagnostic>> {
        let keys = self.keys();
        let args = self.compiler_args(&snapshot.uri, snapshot).await;
        let request = wire::request(&keys, keys.request_diagnostics)
            .set(
                keys.source_file,
                Payload::String(snapshot.uri.as_str().to_string()),
            )
            .set(
                keys.compiler_args,
                Payload::Array(args.into_iter().map(Payload::String).collect()),
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
        arguments: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let keys = self.keys();
        let request = wire::request(&keys, keys.request_apply_refactoring)
            .set(keys.name, Payload::String(command.to_string()))
            .set(
                keys.description,
                Payload::String(serde_json::Value::Array(arguments).to_string()),
            )
            .build();
        let response = self.send(request, None).await?;
        Ok(response
            .get(keys.results)
            .and_then(Payload::as_str)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or(serde_json::Value::Null))
    }

    async fn open_interface(
        &self,
        module_name: &str,
        usr: Option<&str>,
    ) -> Result<InterfaceDocument> {
        let keys = self.keys();
        let request = wire::request(&keys, keys.request_editor_open_interface)
            .set(keys.module_name, Payload::String(module_name.to_string()))
            .set_if(
                keys.usr,
                usr.map(|usr| Payload::String(usr.to_string())),
            )
            .build();
        let response = self.send(request, None).await?;
        let file = response
            .get(keys.source_file)
            .and_then(Payload::as_str)
            .ok_or_else(|| {
                Error::Unknown(format!("interface generation failed for {module_name}"))
            })?;
        let uri = if file.starts_with("file://") {
            file.parse()
                .map_err(|e| Error::Internal(format!("bad interface URI: {e}")))?
        } else {
            path_to_uri(&PathBuf::from(file)).map_err(Error::from)?
        };
        let position = match (
            response.get(keys.line).and_then(Payload::as_int),
            response.get(keys.column).and_then(Payload::as_int),
        ) {
            (Some(line), Some(column)) => Some(Position::new(
                u32::try_from(line).unwrap_or(1).saturating_sub(1),
                u32::try_from(column).unwrap_or(1).saturating_sub(1),
            )),
            _ => None,
        };
        Ok(InterfaceDocument { uri, position })
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
        let edits: Vec<TextEdit> = self
            .related_ranges(snapshot, position)
            .await?
            .into_iter()
            .map(|range| TextEdit {
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
        let placeholder = CompoundDeclName::parse(name).display();
        let ranges = self.related_ranges(snapshot, position).await?;
        let at_cursor = ranges.into_iter().find(|range| {
            (range.start.line < position.line
                || (range.start.line == position.line
                    && range.start.character <= position.character))
                && (position.line < range.end.line
                    || (position.line == range.end.line
                        && position.character <= range.end.character))
        });
        let Some(range) = at_cursor else {
            return Ok(None);
        };
        Ok(Some(PreparedRename { range, placeholder }))
    }

    async fn edits_to_rename(
        &self,
        locations: &[RenameLocation],
        snapshot: &DocumentSnapshot,
        old_name: &str,
        _new_name: &str,
    ) -> Result<Vec<SyntacticRenameName>> {
        if !self.capabilities.rename_ranges {
            return Err(Error::VersionNotSupported(
                "syntactic rename-range resolver".to_string(),
            ));
        }
        let keys = self.keys();
        let request = wire::request(&keys, keys.request_rename_ranges)
            .set(
                keys.source_file,
                Payload::String(snapshot.uri.as_str().to_string()),
            )
            .set(keys.name, Payload::String(old_name.to_string()))
            .set(keys.locations, wire::encode_rename_locations(&keys, locations))
            .build();
        // The resolver parses the text it is handed, not a registered
        // buffer; ship the full snapshot text with the request.
        let response = self.send(request, Some(&snapshot.text)).await?;
        wire::decode_rename_names(&keys, &self.channel.table(), &response, snapshot)
    }

    async fn document_updated_build_settings(&self, snapshot: &DocumentSnapshot) -> Result<()> {
        debug!(
            "build settings changed, re-registering {}",
            snapshot.uri.as_str()
        );
        if let Err(e) = self.close_document(&snapshot.uri).await {
            warn!("re-register close failed: {e}");
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

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Payload assembly and decoding shared by both backend adapters.
//!
//! Backend coordinates are 1-based line and UTF-8 column with byte
//! lengths; everything here converts between that convention and the
//! snapshot's editor-facing positions.

use lsp_types::{
    CompletionItem, CompletionItemKind, Diagnostic, DiagnosticSeverity, DocumentSymbol, Location,
    Position, Range, SymbolKind,
};

use crate::document::DocumentSnapshot;
use crate::error::{Error, Result};
use crate::payload::{DictBuilder, Payload, Uid, UidTable, WellKnownKeys};
use crate::rename::{
    NameCategory, PieceKind, RenameLocation, RenameUsage, SyntacticRenameName,
    SyntacticRenamePiece,
};

/// Starts a request dictionary for `request`.
pub(super) fn request(keys: &WellKnownKeys, request: Uid) -> DictBuilder {
    DictBuilder::new().set(keys.request, Payload::Uid(request))
}

/// Adds the source file and 1-based position of `position` in `snapshot`.
pub(super) fn with_position(
    builder: DictBuilder,
    keys: &WellKnownKeys,
    snapshot: &DocumentSnapshot,
    position: Position,
) -> Result<DictBuilder> {
    let offset = snapshot.offset_of_position(position)?;
    let lsp = snapshot.position_of_offset(offset);
    let line_start = snapshot
        .line_table()
        .offset_utf8(&snapshot.text, lsp.line, 0)?;
    Ok(builder
        .set(
            keys.source_file,
            Payload::String(snapshot.uri.as_str().to_string()),
        )
        .set(keys.offset, Payload::Int(offset as i64))
        .set(keys.line, Payload::Int(i64::from(lsp.line) + 1))
        .set(
            keys.column,
            Payload::Int((offset - line_start) as i64 + 1),
        ))
}

/// Reads a 1-based (line, column) pair from `dict` into a snapshot range.
pub(super) fn range_from_dict(
    keys: &WellKnownKeys,
    dict: &Payload,
    snapshot: &DocumentSnapshot,
) -> Option<Range> {
    let line = u32::try_from(dict.get(keys.line)?.as_int()?).ok()?;
    let column = u32::try_from(dict.get(keys.column)?.as_int()?).ok()?;
    let length = dict.get(keys.length).and_then(Payload::as_int).unwrap_or(0);
    let start = snapshot
        .position_of_utf8_coords(line.saturating_sub(1), column.saturating_sub(1))
        .ok()?;
    let start_byte = snapshot.offset_of_position(start).ok()?;
    let end = snapshot.position_of_offset(start_byte + usize::try_from(length).ok()?);
    Some(Range::new(start, end))
}

/// Decodes a location that may point into a different file than the
/// queried snapshot. Same-file locations get exact column translation;
/// foreign files keep the backend's raw coordinates.
pub(super) fn location_from_dict(
    keys: &WellKnownKeys,
    dict: &Payload,
    snapshot: &DocumentSnapshot,
) -> Option<Location> {
    let file = dict.get(keys.source_file)?.as_str()?;
    let uri: lsp_types::Uri = file.parse().ok()?;
    if uri == snapshot.uri {
        let range = range_from_dict(keys, dict, snapshot)?;
        return Some(Location { uri, range });
    }
    let line = u32::try_from(dict.get(keys.line)?.as_int()?)
        .ok()?
        .saturating_sub(1);
    let column = u32::try_from(dict.get(keys.column)?.as_int()?)
        .ok()?
        .saturating_sub(1);
    let position = Position::new(line, column);
    Some(Location {
        uri,
        range: Range::new(position, position),
    })
}

/// Maps a backend declaration-kind identifier to an LSP symbol kind.
pub(super) fn symbol_kind_for_uid(table: &UidTable, uid: Uid) -> SymbolKind {
    let name = table.resolve(uid);
    let tail = name.strip_prefix("source.lang.swift.decl.").unwrap_or(&name);
    if tail.starts_with("function.method") {
        SymbolKind::METHOD
    } else if tail.starts_with("function") {
        SymbolKind::FUNCTION
    } else if tail.starts_with("struct") {
        SymbolKind::STRUCT
    } else if tail.starts_with("class") {
        SymbolKind::CLASS
    } else if tail.starts_with("enumelement") {
        SymbolKind::ENUM_MEMBER
    } else if tail.starts_with("enum") {
        SymbolKind::ENUM
    } else if tail.starts_with("protocol") {
        SymbolKind::INTERFACE
    } else if tail.starts_with("typealias") | tail.starts_with("associatedtype") {
        SymbolKind::TYPE_PARAMETER
    } else if tail.starts_with("var") | tail.starts_with("let") {
        SymbolKind::VARIABLE
    } else {
        SymbolKind::OBJECT
    }
}

/// Decodes the entity tree of a structure reply into document symbols.
#[allow(deprecated)]
pub(super) fn document_symbols_from_entities(
    keys: &WellKnownKeys,
    table: &UidTable,
    entities: &[Payload],
    snapshot: &DocumentSnapshot,
) -> Vec<DocumentSymbol> {
    entities
        .iter()
        .filter_map(|entity| {
            let name = entity.get(keys.name)?.as_str()?.to_string();
            let offset = usize::try_from(entity.get(keys.offset)?.as_int()?).ok()?;
            let length = usize::try_from(
                entity.get(keys.length).and_then(Payload::as_int).unwrap_or(0),
            )
            .ok()?;
            let kind = entity
                .get(keys.kind)
                .and_then(Payload::as_uid)
                .map_or(SymbolKind::OBJECT, |uid| symbol_kind_for_uid(table, uid));
            let range = Range::new(
                snapshot.position_of_offset(offset),
                snapshot.position_of_offset(offset + length),
            );
            let children = entity
                .get(keys.entities)
                .and_then(Payload::as_array)
                .map(|nested| document_symbols_from_entities(keys, table, nested, snapshot));
            Some(DocumentSymbol {
                name,
                detail: None,
                kind,
                tags: None,
                deprecated: None,
                range,
                selection_range: range,
                children,
            })
        })
        .collect()
}

/// Decodes a completion reply's result list.
pub(super) fn completion_items(
    keys: &WellKnownKeys,
    table: &UidTable,
    results: &[Payload],
) -> Vec<CompletionItem> {
    results
        .iter()
        .filter_map(|item| {
            let label = item.get(keys.name)?.as_str()?.to_string();
            let detail = item
                .get(keys.description)
                .and_then(Payload::as_str)
                .map(ToString::to_string);
            let kind = item.get(keys.kind).and_then(Payload::as_uid).map(|uid| {
                match symbol_kind_for_uid(table, uid) {
                    SymbolKind::METHOD => CompletionItemKind::METHOD,
                    SymbolKind::FUNCTION => CompletionItemKind::FUNCTION,
                    SymbolKind::STRUCT => CompletionItemKind::STRUCT,
                    SymbolKind::CLASS => CompletionItemKind::CLASS,
                    SymbolKind::ENUM => CompletionItemKind::ENUM,
                    SymbolKind::ENUM_MEMBER => CompletionItemKind::ENUM_MEMBER,
                    SymbolKind::INTERFACE => CompletionItemKind::INTERFACE,
                    SymbolKind::VARIABLE => CompletionItemKind::VARIABLE,
                    _ => CompletionItemKind::VALUE,
                }
            });
            Some(CompletionItem {
                label,
                detail,
                kind,
                ..CompletionItem::default()
            })
        })
        .collect()
}

/// Decodes a diagnostics reply.
pub(super) fn diagnostics_from_results(
    keys: &WellKnownKeys,
    results: &[Payload],
    snapshot: &DocumentSnapshot,
) -> Vec<Diagnostic> {
    results
        .iter()
        .filter_map(|item| {
            let message = item.get(keys.message)?.as_str()?.to_string();
            let range = range_from_dict(keys, item, snapshot)?;
            let severity = match item.get(keys.severity).and_then(Payload::as_int) {
                Some(1) => DiagnosticSeverity::ERROR,
                Some(2) => DiagnosticSeverity::WARNING,
                Some(3) => DiagnosticSeverity::INFORMATION,
                _ => DiagnosticSeverity::HINT,
            };
            Some(Diagnostic {
                range,
                severity: Some(severity),
                message,
                ..Diagnostic::default()
            })
        })
        .collect()
}

/// Encodes rename locations for the syntactic resolver request.
pub(super) fn encode_rename_locations(
    keys: &WellKnownKeys,
    locations: &[RenameLocation],
) -> Payload {
    let entries = locations
        .iter()
        .map(|location| {
            let usage = match location.usage {
                RenameUsage::Definition => "definition",
                RenameUsage::Reference => "reference",
                RenameUsage::Call => "call",
            };
            DictBuilder::new()
                .set(keys.line, Payload::Int(i64::from(location.line)))
                .set(keys.column, Payload::Int(i64::from(location.column)))
                .set(keys.name_kind, Payload::String(usage.to_string()))
                .build()
        })
        .collect();
    Payload::Array(entries)
}

/// Decodes the categorized ranges of a rename-ranges reply.
///
/// # Errors
///
/// [`Error::Internal`] when the reply lacks the categorized-ranges member
/// or an entry is shaped wrong; the backend broke the protocol.
pub(super) fn decode_rename_names(
    keys: &WellKnownKeys,
    table: &UidTable,
    response: &Payload,
    snapshot: &DocumentSnapshot,
) -> Result<Vec<SyntacticRenameName>> {
    let categorized = response
        .get(keys.categorized_ranges)
        .and_then(Payload::as_array)
        .ok_or_else(|| Error::Internal("rename reply has no categorized ranges".to_string()))?;

    categorized
        .iter()
        .map(|entry| {
            let category = entry
                .get(keys.category)
                .and_then(Payload::as_uid)
                .and_then(|uid| category_for_uid(keys, uid))
                .ok_or_else(|| Error::Internal("rename range with unknown category".to_string()))?;
            let ranges = entry
                .get(keys.ranges)
                .and_then(Payload::as_array)
                .ok_or_else(|| Error::Internal("categorized range with no ranges".to_string()))?;
            let pieces = ranges
                .iter()
                .map(|piece| decode_piece(keys, table, piece, snapshot))
                .collect::<Result<Vec<_>>>()?;
            Ok(SyntacticRenameName { category, pieces })
        })
        .collect()
}

fn decode_piece(
    keys: &WellKnownKeys,
    table: &UidTable,
    piece: &Payload,
    snapshot: &DocumentSnapshot,
) -> Result<SyntacticRenamePiece> {
    let range = range_from_dict(keys, piece, snapshot)
        .ok_or_else(|| Error::Internal("rename piece without coordinates".to_string()))?;
    let kind = piece
        .get(keys.kind)
        .and_then(Payload::as_uid)
        .and_then(|uid| piece_kind_for_uid(keys, uid))
        .ok_or_else(|| {
            Error::Internal(format!(
                "rename piece with unknown kind: {}",
                piece
                    .get(keys.kind)
                    .and_then(Payload::as_uid)
                    .map_or_else(|| "<missing>".to_string(), |uid| table.resolve(uid))
            ))
        })?;
    let parameter_index = piece
        .get(keys.arg_index)
        .and_then(Payload::as_int)
        .and_then(|value| usize::try_from(value).ok());
    Ok(SyntacticRenamePiece {
        range,
        kind,
        parameter_index,
    })
}

fn category_for_uid(keys: &WellKnownKeys, uid: Uid) -> Option<NameCategory> {
    let category = if uid == keys.category_active_code {
        NameCategory::ActiveCode
    } else if uid == keys.category_inactive_code {
        NameCategory::InactiveCode
    } else if uid == keys.category_string {
        NameCategory::StringLiteral
    } else if uid == keys.category_comment {
        NameCategory::Comment
    } else if uid == keys.category_mismatch {
        NameCategory::Mismatch
    } else if uid == keys.category_unmatched {
        NameCategory::Unmatched
    } else if uid == keys.category_selector {
        NameCategory::Selector
    } else {
        return None;
    };
    Some(category)
}

fn piece_kind_for_uid(keys: &WellKnownKeys, uid: Uid) -> Option<PieceKind> {
    let kind = if uid == keys.range_base_name {
        PieceKind::BaseName
    } else if uid == keys.range_keyword_base_name {
        PieceKind::KeywordBaseName
    } else if uid == keys.range_parameter_name {
        PieceKind::ParameterName
    } else if uid == keys.range_noncollapsible_parameter {
        PieceKind::NoncollapsibleParameterName
    } else if uid == keys.range_decl_arg_label {
        PieceKind::DeclArgumentLabel
    } else if uid == keys.range_call_arg_label {
        PieceKind::CallArgumentLabel
    } else if uid == keys.range_call_arg_colon {
        PieceKind::CallArgumentColon
    } else if uid == keys.range_call_arg_combined {
        PieceKind::CallArgumentCombined
    } else if uid == keys.range_selector_arg_label {
        PieceKind::SelectorArgumentLabel
    } else {
        return None;
    };
    Some(kind)
}

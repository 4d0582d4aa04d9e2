// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Navigation and hierarchy queries fusing the index with the adapters.
//!
//! The adapter supplies cursor-level symbol information (USRs plus its
//! best local declaration); the index supplies the cross-file truth. When
//! the index has nothing, the adapter's local answer stands. Hierarchy
//! items carry `(uri, usr)` in their opaque data field so the follow-up
//! requests can run targeted index queries without re-resolving the
//! cursor.

use std::sync::Arc;

use lsp_types::{
    CallHierarchyIncomingCall, CallHierarchyItem, CallHierarchyOutgoingCall, Location, Position,
    Range, SymbolInformation, SymbolKind, TypeHierarchyItem,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::document::{DocumentManager, DocumentSnapshot};
use crate::error::{Error, Result};
use crate::index::{SymbolIndex, SymbolOccurrence, SymbolPattern, SymbolRoles, to_lsp_location};
use crate::service::LanguageService;
use crate::workspace::Workspace;

/// Hard cap on workspace-symbol results.
const MAX_WORKSPACE_SYMBOLS: usize = 4096;
/// Queries shorter than this never touch the index.
const MIN_WORKSPACE_SYMBOL_QUERY: usize = 3;

/// Files synthesized from a module rather than written by the user.
fn is_synthesized_interface(occurrence: &SymbolOccurrence) -> bool {
    occurrence
        .path
        .extension()
        .is_some_and(|extension| extension == "swiftinterface")
}

/// Opaque payload stored in hierarchy items between prepare and expand.
#[derive(Debug, Serialize, Deserialize)]
struct ItemData {
    uri: String,
    usr: String,
}

impl ItemData {
    fn decode(data: Option<&serde_json::Value>) -> Result<Self> {
        data.cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .ok_or_else(|| Error::Internal("hierarchy item carries no data".to_string()))
    }
}

/// The definition occurrence of `usr`, falling back to its declaration.
async fn definition_occurrence(
    index: &Arc<dyn SymbolIndex>,
    usr: &str,
) -> Option<SymbolOccurrence> {
    let definitions = index.occurrences(usr, SymbolRoles::DEFINITION).await;
    if let Some(definition) = definitions.into_iter().next() {
        return Some(definition);
    }
    index
        .occurrences(usr, SymbolRoles::DECLARATION)
        .await
        .into_iter()
        .next()
}

/// textDocument/definition and declaration.
///
/// A module symbol resolves to its generated textual interface. Otherwise
/// the index definition (or declaration) wins, with a detour through the
/// interface generator when the hit lies in a synthesized interface file.
/// Without index hits, the adapter's own answer stands.
pub async fn definition(
    documents: &DocumentManager,
    workspace: &Workspace,
    adapter: &Arc<dyn LanguageService>,
    snapshot: &DocumentSnapshot,
    position: Position,
) -> Result<Vec<Location>> {
    let symbols = adapter.symbol_info(snapshot, position).await?;
    let Some(top) = symbols.first() else {
        return Ok(Vec::new());
    };

    if top.usr.is_none()
        && let Some(module_name) = &top.module_name
    {
        let interface = adapter.open_interface(module_name, None).await?;
        let at = interface.position.unwrap_or(Position::new(0, 0));
        return Ok(vec![Location {
            uri: interface.uri,
            range: Range::new(at, at),
        }]);
    }

    if let (Some(usr), Some(index)) = (&top.usr, &workspace.index) {
        if let Some(hit) = definition_occurrence(index, usr).await {
            if is_synthesized_interface(&hit)
                && let Some(module_name) = &top.module_name
            {
                debug!("re-routing definition of {usr} into interface of {module_name}");
                let interface = adapter.open_interface(module_name, Some(usr)).await?;
                let at = interface.position.unwrap_or(Position::new(0, 0));
                return Ok(vec![Location {
                    uri: interface.uri,
                    range: Range::new(at, at),
                }]);
            }
            return Ok(vec![to_lsp_location(documents, &hit).await?]);
        }
    }

    adapter.definition(snapshot, position).await
}

/// textDocument/references.
pub async fn references(
    documents: &DocumentManager,
    workspace: &Workspace,
    adapter: &Arc<dyn LanguageService>,
    snapshot: &DocumentSnapshot,
    position: Position,
    include_declaration: bool,
) -> Result<Vec<Location>> {
    let symbols = adapter.symbol_info(snapshot, position).await?;
    let usr = symbols.first().and_then(|symbol| symbol.usr.clone());

    if let (Some(usr), Some(index)) = (usr, &workspace.index) {
        let mut roles = SymbolRoles::REFERENCE | SymbolRoles::CALL;
        if include_declaration {
            roles = roles | SymbolRoles::DECLARATION | SymbolRoles::DEFINITION;
        }
        let occurrences = index.occurrences(&usr, roles).await;
        if !occurrences.is_empty() {
            let mut locations = Vec::with_capacity(occurrences.len());
            for occurrence in &occurrences {
                match to_lsp_location(documents, occurrence).await {
                    Ok(location) => locations.push(location),
                    Err(e) => warn!("unresolvable reference in {:?}: {e:#}", occurrence.path),
                }
            }
            return Ok(locations);
        }
    }

    adapter
        .references(snapshot, position, include_declaration)
        .await
}

/// textDocument/implementation.
pub async fn implementation(
    documents: &DocumentManager,
    workspace: &Workspace,
    adapter: &Arc<dyn LanguageService>,
    snapshot: &DocumentSnapshot,
    position: Position,
) -> Result<Vec<Location>> {
    let symbols = adapter.symbol_info(snapshot, position).await?;
    let usr = symbols.first().and_then(|symbol| symbol.usr.clone());

    if let (Some(usr), Some(index)) = (usr, &workspace.index) {
        let mut hits = index
            .occurrences_related_to(&usr, SymbolRoles::BASE_OF)
            .await;
        if hits.is_empty() {
            hits = index
                .occurrences_related_to(&usr, SymbolRoles::OVERRIDE_OF)
                .await;
        }
        if !hits.is_empty() {
            let mut locations = Vec::with_capacity(hits.len());
            for hit in &hits {
                match to_lsp_location(documents, hit).await {
                    Ok(location) => locations.push(location),
                    Err(e) => warn!("unresolvable implementation in {:?}: {e:#}", hit.path),
                }
            }
            return Ok(locations);
        }
    }

    adapter.implementation(snapshot, position).await
}

async fn item_for_usr(
    documents: &DocumentManager,
    index: &Arc<dyn SymbolIndex>,
    usr: &str,
    name: &str,
    kind: SymbolKind,
    fallback: Option<Location>,
) -> Option<(Location, CallHierarchyItem)> {
    let location = match definition_occurrence(index, usr).await {
        Some(occurrence) => to_lsp_location(documents, &occurrence).await.ok()?,
        None => fallback?,
    };
    let item = CallHierarchyItem {
        name: name.to_string(),
        kind,
        tags: None,
        detail: None,
        uri: location.uri.clone(),
        range: location.range,
        selection_range: location.range,
        data: Some(
            serde_json::to_value(ItemData {
                uri: location.uri.as_str().to_string(),
                usr: usr.to_string(),
            })
            .expect("item data serializes"),
        ),
    };
    Some((location, item))
}

/// textDocument/prepareCallHierarchy.
pub async fn prepare_call_hierarchy(
    documents: &DocumentManager,
    workspace: &Workspace,
    adapter: &Arc<dyn LanguageService>,
    snapshot: &DocumentSnapshot,
    position: Position,
) -> Result<Vec<CallHierarchyItem>> {
    let Some(index) = &workspace.index else {
        return Ok(Vec::new());
    };
    let symbols = adapter.symbol_info(snapshot, position).await?;
    let mut items = Vec::new();
    for symbol in symbols {
        let (Some(usr), Some(name)) = (&symbol.usr, &symbol.name) else {
            continue;
        };
        if let Some((_, item)) = item_for_usr(
            documents,
            index,
            usr,
            name,
            SymbolKind::FUNCTION,
            symbol.best_local_declaration.clone(),
        )
        .await
        {
            items.push(item);
        }
    }
    Ok(items)
}

/// callHierarchy/incomingCalls.
pub async fn incoming_calls(
    documents: &DocumentManager,
    workspace: &Workspace,
    item: &CallHierarchyItem,
) -> Result<Vec<CallHierarchyIncomingCall>> {
    let Some(index) = &workspace.index else {
        return Ok(Vec::new());
    };
    let data = ItemData::decode(item.data.as_ref())?;
    let call_sites = index.occurrences(&data.usr, SymbolRoles::CALL).await;

    let mut calls: Vec<CallHierarchyIncomingCall> = Vec::new();
    for site in &call_sites {
        let Some(caller) = site
            .relations
            .iter()
            .find(|relation| relation.roles.intersects(SymbolRoles::CALLED_BY))
        else {
            continue;
        };
        let Ok(site_location) = to_lsp_location(documents, site).await else {
            continue;
        };
        if let Some(existing) = calls.iter_mut().find(|call| {
            ItemData::decode(call.from.data.as_ref())
                .map(|d| d.usr == caller.symbol.usr)
                .unwrap_or(false)
        }) {
            existing.from_ranges.push(site_location.range);
            continue;
        }
        if let Some((_, from)) = item_for_usr(
            documents,
            index,
            &caller.symbol.usr,
            &caller.symbol.name,
            caller.symbol.kind,
            Some(site_location.clone()),
        )
        .await
        {
            calls.push(CallHierarchyIncomingCall {
                from,
                from_ranges: vec![site_location.range],
            });
        }
    }
    Ok(calls)
}

/// callHierarchy/outgoingCalls.
pub async fn outgoing_calls(
    documents: &DocumentManager,
    workspace: &Workspace,
    item: &CallHierarchyItem,
) -> Result<Vec<CallHierarchyOutgoingCall>> {
    let Some(index) = &workspace.index else {
        return Ok(Vec::new());
    };
    let data = ItemData::decode(item.data.as_ref())?;
    // Call occurrences whose called-by relation names this function are
    // exactly its outgoing calls; each occurrence's own symbol is the
    // callee.
    let sites = index
        .occurrences_related_to(&data.usr, SymbolRoles::CALLED_BY)
        .await;

    let mut calls: Vec<CallHierarchyOutgoingCall> = Vec::new();
    for site in &sites {
        let Ok(site_location) = to_lsp_location(documents, site).await else {
            continue;
        };
        if let Some(existing) = calls.iter_mut().find(|call| {
            ItemData::decode(call.to.data.as_ref())
                .map(|d| d.usr == site.symbol.usr)
                .unwrap_or(false)
        }) {
            existing.from_ranges.push(site_location.range);
            continue;
        }
        if let Some((_, to)) = item_for_usr(
            documents,
            index,
            &site.symbol.usr,
            &site.symbol.name,
            site.symbol.kind,
            Some(site_location.clone()),
        )
        .await
        {
            calls.push(CallHierarchyOutgoingCall {
                to,
                from_ranges: vec![site_location.range],
            });
        }
    }
    Ok(calls)
}

fn type_item_from_call_item(item: CallHierarchyItem) -> TypeHierarchyItem {
    TypeHierarchyItem {
        name: item.name,
        kind: item.kind,
        tags: item.tags,
        detail: item.detail,
        uri: item.uri,
        range: item.range,
        selection_range: item.selection_range,
        data: item.data,
    }
}

/// textDocument/prepareTypeHierarchy.
pub async fn prepare_type_hierarchy(
    documents: &DocumentManager,
    workspace: &Workspace,
    adapter: &Arc<dyn LanguageService>,
    snapshot: &DocumentSnapshot,
    position: Position,
) -> Result<Vec<TypeHierarchyItem>> {
    let Some(index) = &workspace.index else {
        return Ok(Vec::new());
    };
    let symbols = adapter.symbol_info(snapshot, position).await?;
    let mut items = Vec::new();
    for symbol in symbols {
        let (Some(usr), Some(name)) = (&symbol.usr, &symbol.name) else {
            continue;
        };
        if let Some((_, item)) = item_for_usr(
            documents,
            index,
            usr,
            name,
            SymbolKind::CLASS,
            symbol.best_local_declaration.clone(),
        )
        .await
        {
            items.push(type_item_from_call_item(item));
        }
    }
    Ok(items)
}

/// typeHierarchy/supertypes.
pub async fn supertypes(
    documents: &DocumentManager,
    workspace: &Workspace,
    item: &TypeHierarchyItem,
) -> Result<Vec<TypeHierarchyItem>> {
    let Some(index) = &workspace.index else {
        return Ok(Vec::new());
    };
    let data = ItemData::decode(item.data.as_ref())?;
    // Base-of and extended-by occurrences related to this type name its
    // supertypes (and extended protocols).
    let hits = index
        .occurrences_related_to(&data.usr, SymbolRoles::BASE_OF | SymbolRoles::EXTENDED_BY)
        .await;
    collect_type_items(documents, index, hits, |occurrence| {
        Some(occurrence.symbol.clone())
    })
    .await
}

/// typeHierarchy/subtypes.
pub async fn subtypes(
    documents: &DocumentManager,
    workspace: &Workspace,
    item: &TypeHierarchyItem,
) -> Result<Vec<TypeHierarchyItem>> {
    let Some(index) = &workspace.index else {
        return Ok(Vec::new());
    };
    let data = ItemData::decode(item.data.as_ref())?;
    let hits = index
        .occurrences(&data.usr, SymbolRoles::BASE_OF | SymbolRoles::EXTENDED_BY)
        .await;
    // Each hit is a reference to the supertype inside a subtype's
    // declaration; the relation names the subtype.
    collect_type_items(documents, index, hits, |occurrence| {
        occurrence
            .relations
            .iter()
            .find(|relation| {
                relation
                    .roles
                    .intersects(SymbolRoles::BASE_OF | SymbolRoles::EXTENDED_BY)
            })
            .map(|relation| relation.symbol.clone())
    })
    .await
}

async fn collect_type_items(
    documents: &DocumentManager,
    index: &Arc<dyn SymbolIndex>,
    hits: Vec<SymbolOccurrence>,
    select: impl Fn(&SymbolOccurrence) -> Option<crate::index::IndexSymbol>,
) -> Result<Vec<TypeHierarchyItem>> {
    let mut items: Vec<TypeHierarchyItem> = Vec::new();
    for hit in &hits {
        let Some(symbol) = select(hit) else {
            continue;
        };
        if items.iter().any(|existing| {
            ItemData::decode(existing.data.as_ref())
                .map(|d| d.usr == symbol.usr)
                .unwrap_or(false)
        }) {
            continue;
        }
        let fallback = to_lsp_location(documents, hit).await.ok();
        if let Some((_, item)) = item_for_usr(
            documents,
            index,
            &symbol.usr,
            &symbol.name,
            symbol.kind,
            fallback,
        )
        .await
        {
            items.push(type_item_from_call_item(item));
        }
    }
    Ok(items)
}

/// workspace/symbol across every workspace with an index.
///
/// Queries shorter than three characters return nothing; matching is
/// case-insensitive subsequence; results cap at 4096 after filtering out
/// system and accessor occurrences.
pub async fn workspace_symbols(
    documents: &DocumentManager,
    workspaces: &[Arc<Workspace>],
    query: &str,
) -> Result<Vec<SymbolInformation>> {
    if query.chars().count() < MIN_WORKSPACE_SYMBOL_QUERY {
        return Ok(Vec::new());
    }
    let pattern = SymbolPattern::subsequence(query);
    let mut matches: Vec<SymbolOccurrence> = Vec::new();
    for workspace in workspaces {
        let Some(index) = &workspace.index else {
            continue;
        };
        index.for_each_canonical_occurrence(&pattern, &mut |occurrence| {
            if !occurrence
                .roles
                .intersects(SymbolRoles::SYSTEM | SymbolRoles::ACCESSOR_OF)
            {
                matches.push(occurrence.clone());
            }
            matches.len() < MAX_WORKSPACE_SYMBOLS
        });
        if matches.len() >= MAX_WORKSPACE_SYMBOLS {
            break;
        }
    }

    let mut symbols = Vec::with_capacity(matches.len());
    for occurrence in &matches {
        let Ok(location) = to_lsp_location(documents, occurrence).await else {
            continue;
        };
        #[allow(deprecated)]
        symbols.push(SymbolInformation {
            name: occurrence.symbol.name.clone(),
            kind: occurrence.symbol.kind,
            tags: None,
            deprecated: None,
            location,
            container_name: None,
        });
    }
    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexSymbol, SymbolRelation, occurrence};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    /// Index fixture serving canned occurrence lists.
    #[derive(Default)]
    struct FixtureIndex {
        occurrences: Mutex<Vec<SymbolOccurrence>>,
    }

    impl FixtureIndex {
        fn push(&self, occurrence: SymbolOccurrence) {
            self.occurrences.lock().unwrap().push(occurrence);
        }
    }

    #[async_trait]
    impl SymbolIndex for FixtureIndex {
        async fn occurrences(&self, usr: &str, roles: SymbolRoles) -> Vec<SymbolOccurrence> {
            self.occurrences
                .lock()
                .unwrap()
                .iter()
                .filter(|o| o.symbol.usr == usr && o.roles.intersects(roles))
                .cloned()
                .collect()
        }

        async fn occurrences_related_to(
            &self,
            usr: &str,
            roles: SymbolRoles,
        ) -> Vec<SymbolOccurrence> {
            self.occurrences
                .lock()
                .unwrap()
                .iter()
                .filter(|o| {
                    o.relations
                        .iter()
                        .any(|r| r.symbol.usr == usr && r.roles.intersects(roles))
                })
                .cloned()
                .collect()
        }

        fn for_each_canonical_occurrence(
            &self,
            pattern: &SymbolPattern,
            callback: &mut dyn FnMut(&SymbolOccurrence) -> bool,
        ) {
            let matcher = pattern.pattern.to_lowercase();
            for occurrence in self.occurrences.lock().unwrap().iter() {
                let name = occurrence.symbol.name.to_lowercase();
                let mut chars = name.chars();
                let is_subsequence = matcher
                    .chars()
                    .all(|c| chars.by_ref().any(|candidate| candidate == c));
                if is_subsequence && !callback(occurrence) {
                    return;
                }
            }
        }

        async fn poll_for_unit_changes_and_wait(&self) {}
    }

    fn open_fixture_doc(documents: &DocumentManager, path: &str, text: &str) {
        let uri = crate::document::path_to_uri(Path::new(path)).unwrap();
        documents.open(uri, crate::document::Language::Swift, 1, text);
    }

    #[tokio::test]
    async fn test_workspace_symbols_short_query_is_empty() {
        let documents = DocumentManager::new();
        let index = Arc::new(FixtureIndex::default());
        index.push(occurrence(
            Path::new("/w/a.swift"),
            1,
            1,
            SymbolRoles::DEFINITION,
            "s:ab",
            "ab",
        ));
        let workspace = Arc::new(Workspace::new(
            "file:///w".parse().unwrap(),
            Arc::new(crate::workspace::NullBuildSystem),
            Some(index),
        ));
        let symbols = workspace_symbols(&documents, &[workspace], "ab").await.unwrap();
        assert!(symbols.is_empty());
    }

    #[tokio::test]
    async fn test_workspace_symbols_subsequence_and_filter() {
        let documents = DocumentManager::new();
        open_fixture_doc(&documents, "/w/a.swift", "func formatDate() {}\n");
        let index = Arc::new(FixtureIndex::default());
        index.push(occurrence(
            Path::new("/w/a.swift"),
            1,
            6,
            SymbolRoles::DEFINITION,
            "s:formatDate",
            "formatDate",
        ));
        // System and accessor occurrences never surface.
        index.push(occurrence(
            Path::new("/w/a.swift"),
            1,
            6,
            SymbolRoles::DEFINITION | SymbolRoles::SYSTEM,
            "s:sysFmt",
            "fmtSystem",
        ));
        index.push(occurrence(
            Path::new("/w/a.swift"),
            1,
            6,
            SymbolRoles::DEFINITION | SymbolRoles::ACCESSOR_OF,
            "s:getter",
            "formatGetter",
        ));
        let workspace = Arc::new(Workspace::new(
            "file:///w".parse().unwrap(),
            Arc::new(crate::workspace::NullBuildSystem),
            Some(index),
        ));

        // "fmd" is a subsequence of "formatDate".
        let symbols = workspace_symbols(&documents, &[workspace], "fmd").await.unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "formatDate");
    }

    #[tokio::test]
    async fn test_workspace_symbols_cap() {
        let documents = DocumentManager::new();
        let mut text = String::new();
        for _ in 0..5000 {
            text.push_str("func matcher() {}\n");
        }
        open_fixture_doc(&documents, "/w/many.swift", &text);
        let index = Arc::new(FixtureIndex::default());
        for i in 0..5000 {
            index.push(occurrence(
                Path::new("/w/many.swift"),
                i + 1,
                6,
                SymbolRoles::DEFINITION,
                &format!("s:m{i}"),
                "matcher",
            ));
        }
        let workspace = Arc::new(Workspace::new(
            "file:///w".parse().unwrap(),
            Arc::new(crate::workspace::NullBuildSystem),
            Some(index),
        ));
        let symbols = workspace_symbols(&documents, &[workspace], "matcher")
            .await
            .unwrap();
        assert_eq!(symbols.len(), MAX_WORKSPACE_SYMBOLS);
    }

    #[tokio::test]
    async fn test_subtypes_follow_relations() {
        let documents = DocumentManager::new();
        open_fixture_doc(
            &documents,
            "/w/shapes.swift",
            "class Shape {}\nclass Circle: Shape {}\n",
        );
        let index = Arc::new(FixtureIndex::default());
        // Definition of the subtype, so items resolve somewhere.
        index.push(occurrence(
            Path::new("/w/shapes.swift"),
            2,
            7,
            SymbolRoles::DEFINITION,
            "s:Circle",
            "Circle",
        ));
        // Reference to Shape in Circle's inheritance clause.
        let mut base_ref = occurrence(
            Path::new("/w/shapes.swift"),
            2,
            15,
            SymbolRoles::REFERENCE | SymbolRoles::BASE_OF,
            "s:Shape",
            "Shape",
        );
        base_ref.relations.push(SymbolRelation {
            roles: SymbolRoles::BASE_OF,
            symbol: IndexSymbol {
                usr: "s:Circle".to_string(),
                name: "Circle".to_string(),
                kind: SymbolKind::CLASS,
            },
        });
        index.push(base_ref);

        let workspace = Arc::new(Workspace::new(
            "file:///w".parse().unwrap(),
            Arc::new(crate::workspace::NullBuildSystem),
            Some(index),
        ));
        let item = TypeHierarchyItem {
            name: "Shape".to_string(),
            kind: SymbolKind::CLASS,
            tags: None,
            detail: None,
            uri: "file:///w/shapes.swift".parse().unwrap(),
            range: Range::default(),
            selection_range: Range::default(),
            data: Some(serde_json::json!({"uri": "file:///w/shapes.swift", "usr": "s:Shape"})),
        };
        let subtypes = subtypes(&documents, &workspace, &item).await.unwrap();
        assert_eq!(subtypes.len(), 1);
        assert_eq!(subtypes[0].name, "Circle");

        // And the reverse direction finds the supertype.
        let circle_item = TypeHierarchyItem {
            data: Some(serde_json::json!({"uri": "file:///w/shapes.swift", "usr": "s:Circle"})),
            ..item
        };
        let supers = supertypes(&documents, &workspace, &circle_item).await.unwrap();
        assert_eq!(supers.len(), 1);
        assert_eq!(supers[0].name, "Shape");
    }

    #[tokio::test]
    async fn test_incoming_calls_group_by_caller() {
        let documents = DocumentManager::new();
        open_fixture_doc(
            &documents,
            "/w/calls.swift",
            "func callee() {}\nfunc caller() {\n  callee()\n  callee()\n}\n",
        );
        let index = Arc::new(FixtureIndex::default());
        index.push(occurrence(
            Path::new("/w/calls.swift"),
            2,
            6,
            SymbolRoles::DEFINITION,
            "s:caller",
            "caller",
        ));
        for line in [3, 4] {
            let mut call = occurrence(
                Path::new("/w/calls.swift"),
                line,
                3,
                SymbolRoles::CALL | SymbolRoles::REFERENCE,
                "s:callee",
                "callee",
            );
            call.relations.push(SymbolRelation {
                roles: SymbolRoles::CALLED_BY,
                symbol: IndexSymbol {
                    usr: "s:caller".to_string(),
                    name: "caller".to_string(),
                    kind: SymbolKind::FUNCTION,
                },
            });
            index.push(call);
        }

        let workspace = Arc::new(Workspace::new(
            "file:///w".parse().unwrap(),
            Arc::new(crate::workspace::NullBuildSystem),
            Some(index),
        ));
        let item = CallHierarchyItem {
            name: "callee".to_string(),
            kind: SymbolKind::FUNCTION,
            tags: None,
            detail: None,
            uri: "file:///w/calls.swift".parse().unwrap(),
            range: Range::default(),
            selection_range: Range::default(),
            data: Some(serde_json::json!({"uri": "file:///w/calls.swift", "usr": "s:callee"})),
        };
        let calls = incoming_calls(&documents, &workspace, &item).await.unwrap();
        assert_eq!(calls.len(), 1, "both call sites share one caller");
        assert_eq!(calls[0].from.name, "caller");
        assert_eq!(calls[0].from_ranges.len(), 2);
    }

    #[tokio::test]
    async fn test_item_without_data_is_internal_error() {
        let documents = DocumentManager::new();
        let workspace = Arc::new(Workspace::new(
            "file:///w".parse().unwrap(),
            Arc::new(crate::workspace::NullBuildSystem),
            Some(Arc::new(FixtureIndex::default()) as Arc<dyn SymbolIndex>),
        ));
        let item = CallHierarchyItem {
            name: "x".to_string(),
            kind: SymbolKind::FUNCTION,
            tags: None,
            detail: None,
            uri: "file:///w/a.swift".parse().unwrap(),
            range: Range::default(),
            selection_range: Range::default(),
            data: None,
        };
        let err = incoming_calls(&documents, &workspace, &item).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}

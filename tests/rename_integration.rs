//! Cross-file rename end to end: local adapter edits plus index expansion
//! over on-disk files, with a resolver-shaped mock adapter.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use lsp_types::{Position, Range, TextEdit, Uri};

use pantograph::document::{DocumentManager, DocumentSnapshot, Language, path_to_uri};
use pantograph::error::{Error, Result};
use pantograph::index::{
    SymbolIndex, SymbolOccurrence, SymbolPattern, SymbolRoles, occurrence,
};
use pantograph::rename::{
    CompoundDeclName, NameCategory, PieceKind, RenameLocation, SyntacticRenameName,
    SyntacticRenamePiece, cross_file_rename,
};
use pantograph::service::{
    BackendKind, InterfaceDocument, LanguageService, LocalRename, PreparedRename,
    SemanticTokensQuery, ServiceCapabilities, SymbolDetails,
};
use pantograph::workspace::{NullBuildSystem, Workspace};

/// Index serving a fixed occurrence list.
#[derive(Default)]
struct FixtureIndex {
    occurrences: Vec<SymbolOccurrence>,
}

#[async_trait]
impl SymbolIndex for FixtureIndex {
    async fn occurrences(&self, usr: &str, roles: SymbolRoles) -> Vec<SymbolOccurrence> {
        self.occurrences
            .iter()
            .filter(|o| o.symbol.usr == usr && o.roles.intersects(roles))
            .cloned()
            .collect()
    }

    async fn occurrences_related_to(
        &self,
        _usr: &str,
        _roles: SymbolRoles,
    ) -> Vec<SymbolOccurrence> {
        Vec::new()
    }

    fn for_each_canonical_occurrence(
        &self,
        _pattern: &SymbolPattern,
        _callback: &mut dyn FnMut(&SymbolOccurrence) -> bool,
    ) {
    }

    async fn poll_for_unit_changes_and_wait(&self) {}
}

/// Adapter that performs a canned local rename and resolves rename ranges
/// by trusting the incoming locations, the way the syntactic resolver
/// anchors on index coordinates.
struct ResolverMock {
    usr: String,
    old_name: String,
    local_uri: Uri,
    local_edits: Vec<TextEdit>,
    /// When set, the resolver reports this failure instead of pieces.
    resolver_error: Option<Error>,
}

impl ResolverMock {
    fn unsupported() -> Error {
        Error::VersionNotSupported("syntactic rename-range resolver".to_string())
    }
}

#[async_trait]
impl LanguageService for ResolverMock {
    fn kind(&self) -> BackendKind {
        BackendKind::Sema
    }

    fn capabilities(&self) -> ServiceCapabilities {
        ServiceCapabilities {
            incremental_sync: true,
            rename_ranges: self.resolver_error.is_none(),
            ..ServiceCapabilities::default()
        }
    }

    fn can_handle(&self, _workspace_root: &Uri) -> bool {
        true
    }

    async fn open_document(&self, _snapshot: &DocumentSnapshot) -> Result<()> {
        Ok(())
    }

    async fn close_document(&self, _uri: &Uri) -> Result<()> {
        Ok(())
    }

    async fn change_document(
        &self,
        _before: &DocumentSnapshot,
        _changes: &[lsp_types::TextDocumentContentChangeEvent],
    ) -> Result<()> {
        Ok(())
    }

    async fn save_document(&self, _uri: &Uri) -> Result<()> {
        Ok(())
    }

    async fn completion(
        &self,
        _snapshot: &DocumentSnapshot,
        _position: Position,
    ) -> Result<Vec<lsp_types::CompletionItem>> {
        Ok(Vec::new())
    }

    async fn hover(
        &self,
        _snapshot: &DocumentSnapshot,
        _position: Position,
    ) -> Result<Option<lsp_types::Hover>> {
        Ok(None)
    }

    async fn symbol_info(
        &self,
        _snapshot: &DocumentSnapshot,
        _position: Position,
    ) -> Result<Vec<SymbolDetails>> {
        Ok(vec![SymbolDetails {
            name: Some(self.old_name.clone()),
            usr: Some(self.usr.clone()),
            ..SymbolDetails::default()
        }])
    }

    async fn definition(
        &self,
        _snapshot: &DocumentSnapshot,
        _position: Position,
    ) -> Result<Vec<lsp_types::Location>> {
        Ok(Vec::new())
    }

    async fn declaration(
        &self,
        _snapshot: &DocumentSnapshot,
        _position: Position,
    ) -> Result<Vec<lsp_types::Location>> {
        Ok(Vec::new())
    }

    async fn references(
        &self,
        _snapshot: &DocumentSnapshot,
        _position: Position,
        _include_declaration: bool,
    ) -> Result<Vec<lsp_types::Location>> {
        Ok(Vec::new())
    }

    async fn implementation(
        &self,
        _snapshot: &DocumentSnapshot,
        _position: Position,
    ) -> Result<Vec<lsp_types::Location>> {
        Ok(Vec::new())
    }

    async fn document_symbols(
        &self,
        _snapshot: &DocumentSnapshot,
    ) -> Result<Vec<lsp_types::DocumentSymbol>> {
        Ok(Vec::new())
    }

    async fn document_highlight(
        &self,
        _snapshot: &DocumentSnapshot,
        _position: Position,
    ) -> Result<Vec<lsp_types::DocumentHighlight>> {
        Ok(Vec::new())
    }

    async fn folding_ranges(
        &self,
        _snapshot: &DocumentSnapshot,
    ) -> Result<Vec<lsp_types::FoldingRange>> {
        Ok(Vec::new())
    }

    async fn semantic_tokens(
        &self,
        _snapshot: &DocumentSnapshot,
        _query: SemanticTokensQuery,
    ) -> Result<lsp_types::SemanticTokens> {
        Ok(lsp_types::SemanticTokens {
            result_id: None,
            data: Vec::new(),
        })
    }

    async fn document_color(
        &self,
        _snapshot: &DocumentSnapshot,
    ) -> Result<Vec<lsp_types::ColorInformation>> {
        Ok(Vec::new())
    }

    async fn color_presentation(
        &self,
        _snapshot: &DocumentSnapshot,
        _color: lsp_types::Color,
        _range: Range,
    ) -> Result<Vec<lsp_types::ColorPresentation>> {
        Ok(Vec::new())
    }

    async fn code_actions(
        &self,
        _snapshot: &DocumentSnapshot,
        _range: Range,
    ) -> Result<Vec<lsp_types::CodeAction>> {
        Ok(Vec::new())
    }

    async fn inlay_hints(
        &self,
        _snapshot: &DocumentSnapshot,
        _range: Range,
    ) -> Result<Vec<lsp_types::InlayHint>> {
        Ok(Vec::new())
    }

    async fn document_diagnostics(
        &self,
        _snapshot: &DocumentSnapshot,
    ) -> Result<Vec<lsp_types::Diagnostic>> {
        Ok(Vec::new())
    }

    async fn execute_command(
        &self,
        _command: &str,
        _arguments: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn open_interface(
        &self,
        module_name: &str,
        _usr: Option<&str>,
    ) -> Result<InterfaceDocument> {
        Err(Error::Unknown(format!("no interface for {module_name}")))
    }

    async fn rename(
        &self,
        _snapshot: &DocumentSnapshot,
        _position: Position,
        _new_name: &str,
    ) -> Result<LocalRename> {
        let mut changes = HashMap::new();
        changes.insert(self.local_uri.clone(), self.local_edits.clone());
        Ok(LocalRename {
            changes,
            usr: Some(self.usr.clone()),
            old_name: Some(self.old_name.clone()),
        })
    }

    async fn prepare_rename(
        &self,
        _snapshot: &DocumentSnapshot,
        _position: Position,
    ) -> Result<Option<PreparedRename>> {
        Ok(Some(PreparedRename {
            range: Range::default(),
            placeholder: CompoundDeclName::parse(&self.old_name).display(),
        }))
    }

    async fn edits_to_rename(
        &self,
        locations: &[RenameLocation],
        _snapshot: &DocumentSnapshot,
        old_name: &str,
        _new_name: &str,
    ) -> Result<Vec<SyntacticRenameName>> {
        if let Some(error) = &self.resolver_error {
            return Err(error.clone());
        }
        let base_len = CompoundDeclName::parse(old_name).base.chars().count() as u32;
        Ok(locations
            .iter()
            .map(|location| {
                let line = location.line - 1;
                let column = location.column - 1;
                SyntacticRenameName {
                    category: NameCategory::ActiveCode,
                    pieces: vec![SyntacticRenamePiece {
                        range: Range::new(
                            Position::new(line, column),
                            Position::new(line, column + base_len),
                        ),
                        kind: PieceKind::BaseName,
                        parameter_index: None,
                    }],
                }
            })
            .collect())
    }

    async fn document_updated_build_settings(&self, _snapshot: &DocumentSnapshot) -> Result<()> {
        Ok(())
    }

    async fn document_dependencies_updated(&self, _uri: &Uri) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) {}
}

fn apply_edits(text: &str, uri: &Uri, edits: &[TextEdit]) -> String {
    let snapshot = DocumentSnapshot::new(uri.clone(), Language::Swift, 0, text);
    let mut spans: Vec<(std::ops::Range<usize>, String)> = edits
        .iter()
        .map(|edit| {
            (
                snapshot.byte_range(edit.range).expect("edit in bounds"),
                edit.new_text.clone(),
            )
        })
        .collect();
    spans.sort_by_key(|(span, _)| std::cmp::Reverse(span.start));
    let mut out = text.to_string();
    for (span, new_text) in spans {
        out.replace_range(span, &new_text);
    }
    out
}

struct Fixture {
    documents: DocumentManager,
    workspace: Arc<Workspace>,
    adapter: Arc<dyn LanguageService>,
    main_uri: Uri,
    other_uri: Uri,
    other_path: PathBuf,
    _dir: tempfile::TempDir,
}

const MAIN_TEXT: &str = "func greet() {}\ngreet()\n";
const OTHER_TEXT: &str = "greet()\nlet g = greet()\n";

fn fixture(resolver_error: Option<Error>, with_index: bool) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let other_path = dir.path().join("other.swift");
    std::fs::write(&other_path, OTHER_TEXT).expect("write fixture");

    let main_path = dir.path().join("main.swift");
    std::fs::write(&main_path, MAIN_TEXT).expect("write fixture");
    let main_uri = path_to_uri(&main_path).expect("uri");
    let other_uri = path_to_uri(&other_path).expect("uri");

    let documents = DocumentManager::new();
    documents.open(main_uri.clone(), Language::Swift, 1, MAIN_TEXT);

    // greet at (1,6) decl and (2,1) call in main; two uses in other.swift.
    let mut index = FixtureIndex::default();
    for (path, line, column, roles) in [
        (&main_path, 1, 6, SymbolRoles::DEFINITION),
        (&main_path, 2, 1, SymbolRoles::REFERENCE | SymbolRoles::CALL),
        (&other_path, 1, 1, SymbolRoles::REFERENCE | SymbolRoles::CALL),
        (&other_path, 2, 9, SymbolRoles::REFERENCE | SymbolRoles::CALL),
    ] {
        index
            .occurrences
            .push(occurrence(path, line, column, roles, "s:greet", "greet"));
    }

    let local_edits = vec![
        TextEdit {
            range: Range::new(Position::new(0, 5), Position::new(0, 10)),
            new_text: "welcome".to_string(),
        },
        TextEdit {
            range: Range::new(Position::new(1, 0), Position::new(1, 5)),
            new_text: "welcome".to_string(),
        },
    ];
    let adapter: Arc<dyn LanguageService> = Arc::new(ResolverMock {
        usr: "s:greet".to_string(),
        old_name: "greet()".to_string(),
        local_uri: main_uri.clone(),
        local_edits,
        resolver_error,
    });

    let workspace = Arc::new(Workspace::new(
        path_to_uri(dir.path()).expect("root uri"),
        Arc::new(NullBuildSystem),
        with_index.then(|| Arc::new(index) as Arc<dyn SymbolIndex>),
    ));

    Fixture {
        documents,
        workspace,
        adapter,
        main_uri,
        other_uri,
        other_path,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_rename_spans_open_and_disk_files() {
    let fixture = fixture(None, true);
    let snapshot = fixture.documents.latest(&fixture.main_uri).expect("open");

    let edit = cross_file_rename(
        &fixture.documents,
        &fixture.workspace,
        &fixture.adapter,
        &snapshot,
        Position::new(0, 5),
        "welcome()",
    )
    .await
    .expect("rename succeeds");

    let changes = edit.changes.expect("changes present");
    assert_eq!(changes.len(), 2, "both files edited");

    // The adapter-covered file keeps exactly the local edits.
    let main_result = apply_edits(MAIN_TEXT, &fixture.main_uri, &changes[&fixture.main_uri]);
    assert_eq!(main_result, "func welcome() {}\nwelcome()\n");

    // The disk file gets resolver-derived edits.
    let disk_text = std::fs::read_to_string(&fixture.other_path).expect("read");
    let other_result = apply_edits(&disk_text, &fixture.other_uri, &changes[&fixture.other_uri]);
    assert_eq!(other_result, "welcome()\nlet g = welcome()\n");
}

#[tokio::test]
async fn test_adapter_and_index_edit_sets_are_disjoint() {
    let fixture = fixture(None, true);
    let snapshot = fixture.documents.latest(&fixture.main_uri).expect("open");

    let edit = cross_file_rename(
        &fixture.documents,
        &fixture.workspace,
        &fixture.adapter,
        &snapshot,
        Position::new(0, 5),
        "welcome()",
    )
    .await
    .expect("rename succeeds");

    // The index also knows occurrences in main.swift, but the adapter
    // already covered that file; its edits must be exactly the local two.
    let changes = edit.changes.expect("changes present");
    assert_eq!(changes[&fixture.main_uri].len(), 2);
}

#[tokio::test]
async fn test_rename_without_index_stays_local() {
    let fixture = fixture(None, false);
    let snapshot = fixture.documents.latest(&fixture.main_uri).expect("open");

    let edit = cross_file_rename(
        &fixture.documents,
        &fixture.workspace,
        &fixture.adapter,
        &snapshot,
        Position::new(0, 5),
        "welcome()",
    )
    .await
    .expect("rename succeeds");

    let changes = edit.changes.expect("changes present");
    assert_eq!(changes.len(), 1);
    assert!(changes.contains_key(&fixture.main_uri));
}

#[tokio::test]
async fn test_resolver_failure_degrades_to_local_edits() {
    // A backend without the rename-range resolver cannot expand across
    // files; the local rename still succeeds.
    let fixture = fixture(Some(ResolverMock::unsupported()), true);
    let snapshot = fixture.documents.latest(&fixture.main_uri).expect("open");

    let edit = cross_file_rename(
        &fixture.documents,
        &fixture.workspace,
        &fixture.adapter,
        &snapshot,
        Position::new(0, 5),
        "welcome()",
    )
    .await
    .expect("local rename still succeeds");

    let changes = edit.changes.expect("changes present");
    assert_eq!(changes.len(), 1);
    assert!(changes.contains_key(&fixture.main_uri));
}

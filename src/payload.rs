// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Typed payload values exchanged with toolchain backends.
//!
//! Backends speak a compact request/response protocol whose values form a
//! small tree: null, bool, int64, string, interned identifier, list, and
//! map keyed by interned identifiers. Identifiers ("UIDs") are canonical
//! protocol strings such as `key.offset` or `source.request.cursorinfo`;
//! interning them once per channel makes key comparison and hashing O(1)
//! on the hot decode path.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow, bail};
use bytes::{Buf, BufMut, BytesMut};

/// A stable handle into a [`UidTable`].
///
/// Equality and hashing compare the handle, not the string. Handles are
/// only meaningful against the table that produced them; a channel owns
/// exactly one table for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uid(u32);

impl Uid {
    /// Raw index, used by the wire encoder to look the string back up.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Interner mapping canonical protocol strings to stable [`Uid`] handles.
pub struct UidTable {
    inner: Mutex<UidTableInner>,
}

struct UidTableInner {
    strings: Vec<String>,
    by_name: HashMap<String, u32>,
}

impl Default for UidTable {
    fn default() -> Self {
        Self::new()
    }
}

impl UidTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(UidTableInner {
                strings: Vec::new(),
                by_name: HashMap::new(),
            }),
        }
    }

    /// Interns `name`, returning its stable handle.
    pub fn intern(&self, name: &str) -> Uid {
        let mut inner = self.inner.lock().expect("uid table poisoned");
        if let Some(&idx) = inner.by_name.get(name) {
            return Uid(idx);
        }
        let idx = u32::try_from(inner.strings.len()).expect("uid table overflow");
        inner.strings.push(name.to_string());
        inner.by_name.insert(name.to_string(), idx);
        Uid(idx)
    }

    /// Resolves a handle back to its string.
    ///
    /// # Panics
    ///
    /// Panics if the handle did not come from this table.
    #[must_use]
    pub fn resolve(&self, uid: Uid) -> String {
        let inner = self.inner.lock().expect("uid table poisoned");
        inner.strings[uid.0 as usize].clone()
    }

    /// Looks up a handle without interning.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Uid> {
        let inner = self.inner.lock().expect("uid table poisoned");
        inner.by_name.get(name).copied().map(Uid)
    }
}

/// A request/response value.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Null,
    Bool(bool),
    Int(i64),
    String(String),
    Uid(Uid),
    Array(Vec<Payload>),
    Dictionary(HashMap<Uid, Payload>),
}

impl Payload {
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_uid(&self) -> Option<Uid> {
        match self {
            Self::Uid(u) => Some(*u),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Payload]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_dictionary(&self) -> Option<&HashMap<Uid, Payload>> {
        match self {
            Self::Dictionary(map) => Some(map),
            _ => None,
        }
    }

    /// Dictionary field access; `None` for non-dictionaries and absent keys.
    #[must_use]
    pub fn get(&self, key: Uid) -> Option<&Payload> {
        self.as_dictionary().and_then(|map| map.get(&key))
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Uid(u) => write!(f, "uid#{}", u.raw()),
            Self::Array(items) => write!(f, "[{} items]", items.len()),
            Self::Dictionary(map) => write!(f, "{{{} keys}}", map.len()),
        }
    }
}

/// Builder for dictionary payloads; keeps adapter request assembly terse.
#[derive(Default)]
pub struct DictBuilder {
    map: HashMap<Uid, Payload>,
}

impl DictBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, key: Uid, value: Payload) -> Self {
        self.map.insert(key, value);
        self
    }

    #[must_use]
    pub fn set_if(self, key: Uid, value: Option<Payload>) -> Self {
        match value {
            Some(v) => self.set(key, v),
            None => self,
        }
    }

    #[must_use]
    pub fn build(self) -> Payload {
        Payload::Dictionary(self.map)
    }
}

// Wire type tags. The frame is a little-endian u32 body length followed by
// one tag-prefixed value. UIDs travel as strings and are interned on decode,
// so handles never cross the process boundary.
const TAG_NULL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_UID: u8 = 5;
const TAG_ARRAY: u8 = 6;
const TAG_DICTIONARY: u8 = 7;

/// Encodes one framed payload into `buf`.
pub fn encode_frame(payload: &Payload, table: &UidTable, buf: &mut BytesMut) {
    let mut body = BytesMut::new();
    encode_value(payload, table, &mut body);
    buf.put_u32_le(u32::try_from(body.len()).expect("payload too large"));
    buf.extend_from_slice(&body);
}

fn encode_value(payload: &Payload, table: &UidTable, buf: &mut BytesMut) {
    match payload {
        Payload::Null => buf.put_u8(TAG_NULL),
        Payload::Bool(false) => buf.put_u8(TAG_FALSE),
        Payload::Bool(true) => buf.put_u8(TAG_TRUE),
        Payload::Int(n) => {
            buf.put_u8(TAG_INT);
            buf.put_i64_le(*n);
        }
        Payload::String(s) => {
            buf.put_u8(TAG_STRING);
            put_str(buf, s);
        }
        Payload::Uid(uid) => {
            buf.put_u8(TAG_UID);
            put_str(buf, &table.resolve(*uid));
        }
        Payload::Array(items) => {
            buf.put_u8(TAG_ARRAY);
            buf.put_u32_le(u32::try_from(items.len()).expect("array too large"));
            for item in items {
                encode_value(item, table, buf);
            }
        }
        Payload::Dictionary(map) => {
            buf.put_u8(TAG_DICTIONARY);
            buf.put_u32_le(u32::try_from(map.len()).expect("dictionary too large"));
            // Deterministic key order keeps encoded frames comparable in tests.
            let mut keys: Vec<Uid> = map.keys().copied().collect();
            keys.sort_by_key(|k| table.resolve(*k));
            for key in keys {
                put_str(buf, &table.resolve(key));
                encode_value(&map[&key], table, buf);
            }
        }
    }
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(u32::try_from(s.len()).expect("string too large"));
    buf.extend_from_slice(s.as_bytes());
}

/// Tries to decode one complete frame from `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a full frame; the
/// caller reads more bytes and retries, exactly like the header framing on
/// the editor transport.
///
/// # Errors
///
/// Returns an error on a malformed body (unknown tag, truncated value,
/// invalid UTF-8).
pub fn try_decode_frame(buf: &mut BytesMut, table: &UidTable) -> Result<Option<Payload>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let body_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if buf.len() < 4 + body_len {
        return Ok(None);
    }
    buf.advance(4);
    let mut body = buf.split_to(body_len);
    let value = decode_value(&mut body, table)?;
    if !body.is_empty() {
        bail!("trailing bytes after payload body");
    }
    Ok(Some(value))
}

fn decode_value(buf: &mut BytesMut, table: &UidTable) -> Result<Payload> {
    if buf.is_empty() {
        bail!("truncated payload value");
    }
    let tag = buf.get_u8();
    match tag {
        TAG_NULL => Ok(Payload::Null),
        TAG_FALSE => Ok(Payload::Bool(false)),
        TAG_TRUE => Ok(Payload::Bool(true)),
        TAG_INT => {
            if buf.len() < 8 {
                bail!("truncated int payload");
            }
            Ok(Payload::Int(buf.get_i64_le()))
        }
        TAG_STRING => Ok(Payload::String(take_str(buf)?)),
        TAG_UID => {
            let name = take_str(buf)?;
            Ok(Payload::Uid(table.intern(&name)))
        }
        TAG_ARRAY => {
            let count = take_len(buf)?;
            let mut items = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                items.push(decode_value(buf, table)?);
            }
            Ok(Payload::Array(items))
        }
        TAG_DICTIONARY => {
            let count = take_len(buf)?;
            let mut map = HashMap::with_capacity(count.min(4096));
            for _ in 0..count {
                let key = table.intern(&take_str(buf)?);
                let value = decode_value(buf, table)?;
                map.insert(key, value);
            }
            Ok(Payload::Dictionary(map))
        }
        other => Err(anyhow!("unknown payload tag: {other}")),
    }
}

fn take_len(buf: &mut BytesMut) -> Result<usize> {
    if buf.len() < 4 {
        bail!("truncated length prefix");
    }
    Ok(buf.get_u32_le() as usize)
}

fn take_str(buf: &mut BytesMut) -> Result<String> {
    let len = take_len(buf)?;
    if buf.len() < len {
        bail!("truncated string payload");
    }
    let bytes = buf.split_to(len);
    String::from_utf8(bytes.to_vec()).context("payload string is not UTF-8")
}

macro_rules! well_known_keys {
    ($($field:ident => $name:literal),+ $(,)?) => {
        /// Handles for the protocol keywords the adapters use.
        ///
        /// Resolved once per channel at initialization so request assembly
        /// and response decoding never touch the string table.
        #[derive(Debug, Clone, Copy)]
        pub struct WellKnownKeys {
            $(pub $field: Uid,)+
        }

        impl WellKnownKeys {
            /// Interns every well-known keyword into `table`.
            #[must_use]
            pub fn resolve(table: &UidTable) -> Self {
                Self {
                    $($field: table.intern($name),)+
                }
            }
        }
    };
}

well_known_keys! {
    // Envelope.
    request => "key.request",
    id => "key.id",
    error => "key.error",
    description => "key.description",
    notification => "key.notification",
    results => "key.results",
    // Document addressing.
    source_file => "key.sourcefile",
    source_text => "key.sourcetext",
    offset => "key.offset",
    length => "key.length",
    line => "key.line",
    column => "key.column",
    end_line => "key.endline",
    end_column => "key.endcolumn",
    compiler_args => "key.compilerargs",
    working_dir => "key.workingdir",
    enable_syntax_map => "key.enablesyntaxmap",
    // Symbol queries.
    name => "key.name",
    usr => "key.usr",
    kind => "key.kind",
    module_name => "key.modulename",
    module_interface => "key.moduleinterface",
    secondary_symbols => "key.secondarysymbols",
    is_system => "key.is_system",
    // Rename ranges.
    locations => "key.locations",
    new_name => "key.newname",
    categorized_ranges => "key.categorizedranges",
    ranges => "key.ranges",
    category => "key.category",
    arg_index => "key.argindex",
    name_kind => "key.namekind",
    // Requests.
    request_initialize => "source.request.initialize",
    request_crash_exit => "source.request.crash_exit",
    request_cancel => "source.request.cancelrequest",
    request_editor_open => "source.request.editor.open",
    request_editor_close => "source.request.editor.close",
    request_editor_replace_text => "source.request.editor.replacetext",
    request_editor_open_interface => "source.request.editor.open.interface",
    request_cursor_info => "source.request.cursorinfo",
    request_related_idents => "source.request.relatedidents",
    request_rename_ranges => "source.request.find-syntactic-rename-ranges",
    request_code_complete => "source.request.codecomplete",
    request_hover => "source.request.docinfo",
    request_capabilities => "source.request.capabilities",
    request_semantic_tokens => "source.request.semantic-tokens",
    request_document_colors => "source.request.document-colors",
    request_available_refactorings => "source.request.available-refactorings",
    request_apply_refactoring => "source.request.apply-refactoring",
    request_inlay_hints => "source.request.inlay-hints",
    request_diagnostics => "source.request.diagnostics",
    request_dependencies_updated => "source.request.dependencies-updated",
    // Capability reply fields.
    cap_incremental => "key.capability.incremental",
    cap_triggers => "key.capability.triggers",
    cap_commands => "key.capability.commands",
    cap_rename_ranges => "key.capability.renameranges",
    cap_token_types => "key.capability.tokentypes",
    // Structure, diagnostics, colors.
    entities => "key.entities",
    result_id => "key.resultid",
    severity => "key.severity",
    message => "key.message",
    color_red => "key.color.red",
    color_green => "key.color.green",
    color_blue => "key.color.blue",
    color_alpha => "key.color.alpha",
    // Backend-reported error kinds.
    error_request_invalid => "source.error.request-invalid",
    error_request_failed => "source.error.request-failed",
    error_request_cancelled => "source.error.request-cancelled",
    // Rename range categories.
    category_active_code => "source.refactoring.range.category.active",
    category_inactive_code => "source.refactoring.range.category.inactive",
    category_string => "source.refactoring.range.category.string",
    category_comment => "source.refactoring.range.category.comment",
    category_mismatch => "source.refactoring.range.category.mismatch",
    category_unmatched => "source.refactoring.range.category.unmatched",
    category_selector => "source.refactoring.range.category.selector",
    // Rename range piece kinds.
    range_base_name => "source.refactoring.range.kind.basename",
    range_keyword_base_name => "source.refactoring.range.kind.keyword-basename",
    range_parameter_name => "source.refactoring.range.kind.parameter-and-whitespace",
    range_noncollapsible_parameter => "source.refactoring.range.kind.noncollapsible-parameter",
    range_decl_arg_label => "source.refactoring.range.kind.decl-argument-label",
    range_call_arg_label => "source.refactoring.range.kind.call-argument-label",
    range_call_arg_colon => "source.refactoring.range.kind.call-argument-colon",
    range_call_arg_combined => "source.refactoring.range.kind.call-argument-combined",
    range_selector_arg_label => "source.refactoring.range.kind.selector-argument-label",
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let table = UidTable::new();
        let a = table.intern("key.offset");
        let b = table.intern("key.offset");
        assert_eq!(a, b);
        assert_eq!(table.resolve(a), "key.offset");
        assert_ne!(a, table.intern("key.length"));
    }

    #[test]
    fn test_lookup_without_intern() {
        let table = UidTable::new();
        assert!(table.lookup("key.offset").is_none());
        let uid = table.intern("key.offset");
        assert_eq!(table.lookup("key.offset"), Some(uid));
    }

    fn round_trip(payload: &Payload, table: &UidTable) -> Payload {
        let mut buf = BytesMut::new();
        encode_frame(payload, table, &mut buf);
        let decoded = try_decode_frame(&mut buf, table)
            .expect("decode failed")
            .expect("incomplete frame");
        assert!(buf.is_empty());
        decoded
    }

    #[test]
    fn test_round_trip_scalars() {
        let table = UidTable::new();
        for payload in [
            Payload::Null,
            Payload::Bool(true),
            Payload::Bool(false),
            Payload::Int(-42),
            Payload::Int(i64::MAX),
            Payload::String("héllo wörld".to_string()),
        ] {
            assert_eq!(round_trip(&payload, &table), payload);
        }
    }

    #[test]
    fn test_round_trip_nested() {
        let table = UidTable::new();
        let keys = WellKnownKeys::resolve(&table);
        let payload = DictBuilder::new()
            .set(keys.request, Payload::Uid(keys.request_cursor_info))
            .set(keys.offset, Payload::Int(12))
            .set(
                keys.results,
                Payload::Array(vec![
                    Payload::String("a".to_string()),
                    Payload::Int(1),
                    Payload::Null,
                ]),
            )
            .build();
        assert_eq!(round_trip(&payload, &table), payload);
    }

    #[test]
    fn test_uid_round_trip_across_tables() {
        // Wire form carries uid strings, so a fresh table on the decode side
        // produces handles that resolve to the same names.
        let sender = UidTable::new();
        let receiver = UidTable::new();
        let uid = sender.intern("source.request.cursorinfo");

        let mut buf = BytesMut::new();
        encode_frame(&Payload::Uid(uid), &sender, &mut buf);
        let decoded = try_decode_frame(&mut buf, &receiver).unwrap().unwrap();
        let decoded_uid = decoded.as_uid().unwrap();
        assert_eq!(receiver.resolve(decoded_uid), "source.request.cursorinfo");
    }

    #[test]
    fn test_incomplete_frame_returns_none() {
        let table = UidTable::new();
        let mut buf = BytesMut::new();
        encode_frame(&Payload::String("abcdef".to_string()), &table, &mut buf);
        let full = buf.clone();

        let mut partial = BytesMut::from(&full[..full.len() - 3]);
        assert!(try_decode_frame(&mut partial, &table).unwrap().is_none());
        // Remaining bytes arrive; the frame completes.
        partial.extend_from_slice(&full[full.len() - 3..]);
        assert!(try_decode_frame(&mut partial, &table).unwrap().is_some());
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let table = UidTable::new();
        let mut buf = BytesMut::new();
        encode_frame(&Payload::Int(1), &table, &mut buf);
        encode_frame(&Payload::Int(2), &table, &mut buf);

        assert_eq!(
            try_decode_frame(&mut buf, &table).unwrap(),
            Some(Payload::Int(1))
        );
        assert_eq!(
            try_decode_frame(&mut buf, &table).unwrap(),
            Some(Payload::Int(2))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unknown_tag_is_error() {
        let table = UidTable::new();
        let mut buf = BytesMut::new();
        buf.put_u32_le(1);
        buf.put_u8(99);
        assert!(try_decode_frame(&mut buf, &table).is_err());
    }

    #[test]
    fn test_dict_builder_set_if() {
        let table = UidTable::new();
        let keys = WellKnownKeys::resolve(&table);
        let payload = DictBuilder::new()
            .set_if(keys.offset, Some(Payload::Int(3)))
            .set_if(keys.length, None)
            .build();
        assert_eq!(payload.get(keys.offset), Some(&Payload::Int(3)));
        assert!(payload.get(keys.length).is_none());
    }
}

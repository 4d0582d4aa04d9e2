// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! JSON-RPC envelope and `Content-Length` framing for the editor transport.

use anyhow::{Context, Result, bail};
use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

const fn default_null() -> serde_json::Value {
    serde_json::Value::Null
}

/// A request or response ID.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// A numeric ID.
    Number(i64),
    /// A string ID.
    String(String),
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// An inbound or outbound request.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RequestMessage {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default = "default_null")]
    pub params: serde_json::Value,
}

/// A response to a request.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseMessage {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl ResponseMessage {
    /// A successful reply to `id`.
    #[must_use]
    pub fn success(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// A failed reply to `id`.
    #[must_use]
    pub fn failure(id: RequestId, error: ResponseError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: None,
            error: Some(error),
        }
    }
}

/// A notification (no reply expected).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotificationMessage {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default = "default_null")]
    pub params: serde_json::Value,
}

impl NotificationMessage {
    #[must_use]
    pub fn new(method: &str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// The error member of a failed response.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// A classified inbound message.
#[derive(Debug, Clone)]
pub enum Message {
    Request(RequestMessage),
    Notification(NotificationMessage),
    Response(ResponseMessage),
}

impl Message {
    /// Classifies a raw JSON-RPC value by the presence of `method`/`id`.
    ///
    /// # Errors
    ///
    /// Returns an error when the value matches none of the three envelope
    /// shapes.
    pub fn classify(value: serde_json::Value) -> Result<Self> {
        let has_method = value.get("method").is_some();
        let has_id = value.get("id").is_some();
        match (has_method, has_id) {
            (true, true) => Ok(Self::Request(
                serde_json::from_value(value).context("malformed request")?,
            )),
            (true, false) => Ok(Self::Notification(
                serde_json::from_value(value).context("malformed notification")?,
            )),
            (false, true) => Ok(Self::Response(
                serde_json::from_value(value).context("malformed response")?,
            )),
            (false, false) => bail!("message has neither method nor id"),
        }
    }
}

/// Serializes `message` with its `Content-Length` header.
///
/// # Errors
///
/// Returns an error if the message cannot be serialized to JSON.
pub fn frame_message<T: Serialize>(message: &T) -> Result<String> {
    let body = serde_json::to_string(message)?;
    Ok(format!("Content-Length: {}\r\n\r\n{}", body.len(), body))
}

/// Extracts the next complete framed message body from `buffer`.
///
/// Returns `Ok(None)` until a full header block and body have arrived.
///
/// # Errors
///
/// Returns an error for non-UTF-8 headers or bodies and for a header block
/// without a parseable `Content-Length`.
pub fn try_parse_message(buffer: &mut BytesMut) -> Result<Option<String>> {
    let Some(headers_end) = find_headers_end(buffer) else {
        return Ok(None);
    };

    let headers =
        std::str::from_utf8(&buffer[..headers_end - 4]).context("headers are not UTF-8")?;
    let mut content_length = None;
    for line in headers.lines() {
        if let Some(value) = header_value(line, "content-length") {
            content_length = Some(
                value
                    .trim()
                    .parse::<usize>()
                    .context("invalid Content-Length")?,
            );
        }
    }
    let content_length = content_length.context("missing Content-Length header")?;

    if buffer.len() < headers_end + content_length {
        return Ok(None);
    }

    buffer.advance(headers_end);
    let body = buffer.split_to(content_length);
    Ok(Some(
        String::from_utf8(body.to_vec()).context("body is not UTF-8")?,
    ))
}

fn find_headers_end(buffer: &BytesMut) -> Option<usize> {
    buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
}

fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    if key.trim().eq_ignore_ascii_case(name) {
        Some(value)
    } else {
        None
    }
}

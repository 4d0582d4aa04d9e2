// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A configurable mock toolchain backend for testing.
//!
//! Speaks the framed payload protocol over stdin/stdout. CLI flags control
//! capabilities and failure modes. No tokio — a single read loop is all a
//! mock needs.

use std::io::{Read, Write};

use bytes::BytesMut;
use clap::Parser;

use pantograph::payload::{
    DictBuilder, Payload, UidTable, WellKnownKeys, encode_frame, try_decode_frame,
};

/// Mock backend for integration testing.
#[derive(Parser, Debug)]
struct Args {
    /// Report non-incremental document sync (fatal for the adapter).
    #[arg(long)]
    no_incremental: bool,

    /// Drop the rename-range resolver capability.
    #[arg(long)]
    no_rename_ranges: bool,

    /// Exit without replying once a request with this name arrives.
    #[arg(long)]
    crash_on: Option<String>,
}

struct Mock {
    args: Args,
    table: UidTable,
    stdout: std::io::Stdout,
    /// Requests parked until a cancel arrives, by id.
    blocked: Vec<i64>,
}

fn main() {
    let args = Args::parse();
    let table = UidTable::new();
    let mut mock = Mock {
        args,
        table,
        stdout: std::io::stdout(),
        blocked: Vec::new(),
    };

    let mut stdin = std::io::stdin();
    let mut buffer = BytesMut::with_capacity(8192);
    let mut chunk = [0u8; 4096];
    loop {
        let n = match stdin.read(&mut chunk) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buffer.extend_from_slice(&chunk[..n]);
        loop {
            match try_decode_frame(&mut buffer, &mock.table) {
                Ok(Some(message)) => mock.handle(&message),
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
}

impl Mock {
    fn keys(&self) -> WellKnownKeys {
        WellKnownKeys::resolve(&self.table)
    }

    fn handle(&mut self, message: &Payload) {
        let keys = self.keys();
        let Some(request) = message.get(keys.request).and_then(Payload::as_uid) else {
            return;
        };
        let name = self.table.resolve(request);
        let id = message.get(keys.id).and_then(Payload::as_int);

        if self.args.crash_on.as_deref() == Some(name.as_str()) {
            std::process::exit(7);
        }

        if name == "source.request.crash_exit" {
            std::process::exit(0);
        }

        // Cancellation is a notification carrying the target id.
        if name == "source.request.cancelrequest" {
            if let Some(target) = message.get(keys.id).and_then(Payload::as_int)
                && let Some(position) = self.blocked.iter().position(|&b| b == target)
            {
                self.blocked.remove(position);
                let reply = DictBuilder::new()
                    .set(keys.id, Payload::Int(target))
                    .set(keys.error, Payload::Uid(keys.error_request_cancelled))
                    .set(
                        keys.description,
                        Payload::String("request cancelled".to_string()),
                    )
                    .build();
                self.reply(&reply);
            }
            return;
        }

        let Some(id) = id else {
            // Other notifications need no reply.
            return;
        };

        let reply = match name.as_str() {
            "source.request.initialize" => DictBuilder::new()
                .set(keys.id, Payload::Int(id))
                .set(keys.results, Payload::Int(1))
                .build(),
            "source.request.capabilities" => DictBuilder::new()
                .set(keys.id, Payload::Int(id))
                .set(
                    keys.cap_incremental,
                    Payload::Bool(!self.args.no_incremental),
                )
                .set(
                    keys.cap_rename_ranges,
                    Payload::Bool(!self.args.no_rename_ranges),
                )
                .set(
                    keys.cap_triggers,
                    Payload::Array(vec![Payload::String(".".to_string())]),
                )
                .set(
                    keys.cap_commands,
                    Payload::Array(vec![Payload::String(
                        "pantograph.applyRefactoring".to_string(),
                    )]),
                )
                .build(),
            "source.request.editor.open"
            | "source.request.editor.close"
            | "source.request.editor.replacetext" => DictBuilder::new()
                .set(keys.id, Payload::Int(id))
                .set(keys.results, Payload::Bool(true))
                .build(),
            "source.request.cursorinfo" => DictBuilder::new()
                .set(keys.id, Payload::Int(id))
                .set(keys.name, Payload::String("mockSymbol".to_string()))
                .set(keys.usr, Payload::String("s:mock:mockSymbol".to_string()))
                .build(),
            "source.request.relatedidents" => DictBuilder::new()
                .set(keys.id, Payload::Int(id))
                .set(keys.results, Payload::Array(Vec::new()))
                .build(),
            // Parks forever; only a cancel releases it.
            "mock.block" => {
                self.blocked.push(id);
                return;
            }
            _ => DictBuilder::new()
                .set(keys.id, Payload::Int(id))
                .set(keys.error, Payload::Uid(keys.error_request_invalid))
                .set(
                    keys.description,
                    Payload::String(format!("unknown request {name}")),
                )
                .build(),
        };
        self.reply(&reply);
    }

    fn reply(&mut self, payload: &Payload) {
        let mut buffer = BytesMut::new();
        encode_frame(payload, &self.table, &mut buffer);
        if self.stdout.write_all(&buffer).is_err() {
            std::process::exit(0);
        }
        let _ = self.stdout.flush();
    }
}

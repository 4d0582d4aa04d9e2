// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Pantograph is an LSP server that brokers editor requests across
//! per-workspace toolchain backends.
//!
//! One compile-driven semantic backend serves the Swift family and one
//! C-family backend serves C, C++, and Objective-C; the core schedules
//! editor messages with causal ordering, owns the authoritative document
//! state, and fuses a persistent symbol index with live buffers for
//! cross-file operations.

/// Channels to backend child processes.
pub mod backend;
/// Static server capabilities and dynamic registrations.
pub mod capabilities;
/// Compilation database decoding and the build system backed by it.
pub mod compile_db;
/// Layered configuration for toolchains and backends.
pub mod config;
/// Authoritative document buffers, versions, and snapshots.
pub mod document;
/// Protocol-visible error kinds.
pub mod error;
/// Navigation and hierarchy queries over index plus adapters.
pub mod hierarchy;
/// Query interface to the persistent symbol index.
pub mod index;
/// Typed payload values and their wire encoding.
pub mod payload;
/// Work-done progress reporting.
pub mod progress;
/// JSON-RPC envelope and framing for the editor transport.
pub mod protocol;
/// Cross-file rename.
pub mod rename;
/// Dependency-tracked message scheduling and cancellation.
pub mod scheduler;
/// Request dispatch and the client connection.
pub mod server;
/// Language-service adapters and their lifecycle.
pub mod service;
/// Workspace set and URI routing.
pub mod workspace;

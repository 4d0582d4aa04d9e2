// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Channel owning one backend child process.
mod channel;

pub use channel::{BackendChannel, CrashEvent, RequestHandle};

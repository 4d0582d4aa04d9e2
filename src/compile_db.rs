// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Compilation database decoding.
//!
//! Two formats feed the C-family build settings: the JSON
//! `compile_commands.json` array and the fixed `compile_flags.txt` list.
//! When a record carries both `command` and `arguments`, `arguments` wins;
//! `command` strings are shell-split with the convention of the host that
//! produced the database.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Driver name prepended to fixed-database argument lists.
const FIXED_DB_DRIVER: &str = "clang";

/// One entry of `compile_commands.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileCommand {
    /// Working directory for the compilation.
    pub directory: String,
    /// The main source file.
    pub file: String,
    /// Whole command line as a single shell-quoted string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Pre-split argument list; wins over `command` when both are present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<String>>,
    /// The output object file, used to disambiguate multiple entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// The splitting convention for `command` strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSyntax {
    Posix,
    Windows,
}

impl CommandSyntax {
    /// The convention of the machine pantograph runs on.
    #[must_use]
    pub const fn host() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Posix
        }
    }
}

impl CompileCommand {
    /// The effective argument vector of this record.
    #[must_use]
    pub fn argv(&self, syntax: CommandSyntax) -> Vec<String> {
        if let Some(arguments) = &self.arguments {
            return arguments.clone();
        }
        match &self.command {
            Some(command) => split_command(command, syntax),
            None => Vec::new(),
        }
    }
}

/// Parses the content of a `compile_commands.json` file.
///
/// # Errors
///
/// Returns an error if the content is not a JSON array of records.
pub fn parse_json_db(content: &str) -> Result<Vec<CompileCommand>> {
    let commands: Vec<CompileCommand> =
        serde_json::from_str(content).context("malformed compilation database")?;
    debug!("compilation database: {} entries", commands.len());
    Ok(commands)
}

/// Parses `compile_flags.txt`: one argument per line, whitespace-trimmed,
/// blank lines dropped, with the compiler driver prepended.
#[must_use]
pub fn parse_fixed_db(content: &str) -> Vec<String> {
    let mut argv = vec![FIXED_DB_DRIVER.to_string()];
    argv.extend(
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToString::to_string),
    );
    argv
}

/// Finds the database entry for `file`, preferring an exact path match.
#[must_use]
pub fn lookup<'a>(commands: &'a [CompileCommand], file: &Path) -> Option<&'a CompileCommand> {
    commands.iter().find(|c| Path::new(&c.file) == file).or_else(|| {
        let name = file.file_name()?;
        commands
            .iter()
            .find(|c| Path::new(&c.file).file_name() == Some(name))
    })
}

/// Splits a command string into an argument vector.
#[must_use]
pub fn split_command(command: &str, syntax: CommandSyntax) -> Vec<String> {
    match syntax {
        CommandSyntax::Posix => split_posix(command),
        CommandSyntax::Windows => split_windows(command),
    }
}

fn split_posix(command: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut chars = command.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            c if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            '\'' => {
                in_arg = true;
                for c in chars.by_ref() {
                    if c == '\'' {
                        break;
                    }
                    current.push(c);
                }
            }
            '"' => {
                in_arg = true;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => break,
                        '\\' => match chars.peek() {
                            // Inside double quotes a backslash only escapes
                            // these; otherwise it is literal.
                            Some('"' | '\\' | '$' | '`') => {
                                current.push(chars.next().expect("peeked"));
                            }
                            _ => current.push('\\'),
                        },
                        other => current.push(other),
                    }
                }
            }
            '\\' => {
                in_arg = true;
                if let Some(c) = chars.next() {
                    current.push(c);
                }
            }
            other => {
                in_arg = true;
                current.push(other);
            }
        }
    }
    if in_arg {
        args.push(current);
    }
    args
}

fn split_windows(command: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut in_quotes = false;
    let mut chars = command.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                in_arg = true;
                // Count the backslash run; 2n before a quote collapse to n,
                // 2n+1 escape the quote.
                let mut backslashes = 1usize;
                while chars.peek() == Some(&'\\') {
                    chars.next();
                    backslashes += 1;
                }
                if chars.peek() == Some(&'"') {
                    current.extend(std::iter::repeat_n('\\', backslashes / 2));
                    if backslashes % 2 == 1 {
                        current.push('"');
                        chars.next();
                    }
                } else {
                    current.extend(std::iter::repeat_n('\\', backslashes));
                }
            }
            '"' => {
                in_arg = true;
                if in_quotes && chars.peek() == Some(&'"') {
                    // Doubled quote inside quotes is a literal quote.
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            other => {
                in_arg = true;
                current.push(other);
            }
        }
    }
    if in_arg {
        args.push(current);
    }
    args
}

/// File names the server watches for build-description changes.
#[must_use]
pub const fn database_file_names() -> [&'static str; 2] {
    ["compile_commands.json", "compile_flags.txt"]
}

/// Locates a compilation database at or above `dir`, up to the root.
#[must_use]
pub fn find_database(dir: &Path) -> Option<PathBuf> {
    let mut dir = Some(dir);
    while let Some(current) = dir {
        for name in database_file_names() {
            let candidate = current.join(name);
            if candidate.exists() {
                return Some(candidate);
            }
        }
        dir = current.parent();
    }
    None
}

/// What a workspace's compilation database resolved to.
enum Database {
    Json(Vec<CompileCommand>),
    Fixed(Vec<String>),
    Missing,
}

/// Build system backed by a compilation database under the workspace root.
///
/// Swift targets are served with fallback settings (the package build
/// plumbing lives outside the core); C-family files resolve through
/// `compile_commands.json` or `compile_flags.txt`.
pub struct CompileDatabaseBuildSystem {
    root: std::path::PathBuf,
    database: tokio::sync::Mutex<Option<Database>>,
}

impl CompileDatabaseBuildSystem {
    #[must_use]
    pub fn new(root: std::path::PathBuf) -> Self {
        Self {
            root,
            database: tokio::sync::Mutex::new(None),
        }
    }

    async fn load(&self) -> tokio::sync::MutexGuard<'_, Option<Database>> {
        let mut database = self.database.lock().await;
        if database.is_none() {
            *database = Some(self.read_database().await);
        }
        database
    }

    async fn read_database(&self) -> Database {
        let Some(path) = find_database(&self.root) else {
            return Database::Missing;
        };
        let Ok(content) = tokio::fs::read_to_string(&path).await else {
            return Database::Missing;
        };
        if path.ends_with("compile_flags.txt") {
            debug!("loaded fixed database {}", path.display());
            return Database::Fixed(parse_fixed_db(&content));
        }
        match parse_json_db(&content) {
            Ok(commands) => Database::Json(commands),
            Err(e) => {
                tracing::warn!("unusable database {}: {e:#}", path.display());
                Database::Missing
            }
        }
    }
}

#[async_trait::async_trait]
impl crate::workspace::BuildSystem for CompileDatabaseBuildSystem {
    async fn build_settings(
        &self,
        uri: &lsp_types::Uri,
        language: crate::document::Language,
    ) -> Option<crate::workspace::BuildSettings> {
        let path = crate::document::uri_to_path(uri).ok()?;
        if !language.is_c_family() {
            return None;
        }
        let database = self.load().await;
        match database.as_ref()? {
            Database::Json(commands) => {
                let record = lookup(commands, &path)?;
                Some(crate::workspace::BuildSettings {
                    compiler_args: record.argv(CommandSyntax::host()),
                    working_dir: Some(std::path::PathBuf::from(&record.directory)),
                })
            }
            Database::Fixed(argv) => {
                let mut compiler_args = argv.clone();
                compiler_args.push(path.display().to_string());
                Some(crate::workspace::BuildSettings {
                    compiler_args,
                    working_dir: Some(self.root.clone()),
                })
            }
            Database::Missing => None,
        }
    }

    async fn file_handling_capability(
        &self,
        uri: &lsp_types::Uri,
    ) -> crate::workspace::FileHandlingCapability {
        use crate::workspace::FileHandlingCapability;
        let Ok(path) = crate::document::uri_to_path(uri) else {
            return FileHandlingCapability::Unhandled;
        };
        if !path.starts_with(&self.root) {
            return FileHandlingCapability::Unhandled;
        }
        let Some(language) = crate::document::Language::from_path(&path) else {
            return FileHandlingCapability::Unhandled;
        };
        if language.is_c_family() {
            let database = self.load().await;
            if let Some(Database::Json(commands)) = database.as_ref()
                && lookup(commands, &path).is_some()
            {
                return FileHandlingCapability::Handled;
            }
        }
        FileHandlingCapability::Fallback
    }

    async fn build_description_changed(&self) {
        *self.database.lock().await = None;
        debug!("compilation database cache dropped for {}", self.root.display());
    }
}

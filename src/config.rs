// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::service::Toolchain;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Name of the toolchain preferred when several support a language.
    #[serde(default)]
    pub default_toolchain: Option<String>,

    /// Declared toolchains; discovery lives outside the server.
    #[serde(default)]
    pub toolchain: Vec<ToolchainConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ToolchainConfig {
    /// Toolchain name referenced by `default_toolchain`.
    pub name: String,

    /// Path to the semantic backend server binary.
    #[serde(default)]
    pub sema_server: Option<PathBuf>,

    /// Path to the C-family backend server binary.
    #[serde(default)]
    pub cfamily_server: Option<PathBuf>,
}

impl Config {
    /// Load configuration from standard paths or a specific file.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // 1. User config directory (~/.config/pantograph/config.toml)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("pantograph").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        // 2. Explicit file overrides the user config
        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 3. Environment variables (PANTOGRAPH_DEFAULT_TOOLCHAIN, etc.)
        builder = builder.add_source(config::Environment::with_prefix("PANTOGRAPH"));

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// The declared toolchains in registry form.
    #[must_use]
    pub fn toolchains(&self) -> Vec<Toolchain> {
        self.toolchain
            .iter()
            .map(|toolchain| Toolchain {
                name: toolchain.name.clone(),
                sema_server: toolchain.sema_server.clone(),
                cfamily_server: toolchain.cfamily_server.clone(),
            })
            .collect()
    }
}

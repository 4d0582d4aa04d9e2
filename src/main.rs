// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Pantograph language server entry point.
//!
//! Speaks LSP over stdio: stdout carries the protocol, stderr carries the
//! logs. Everything interesting happens in [`pantograph::server`]; this
//! file owns the transport loop and process lifecycle.

use std::path::PathBuf;

use anyhow::{Context, Result};
use bytes::BytesMut;
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use pantograph::config::Config;
use pantograph::protocol::{self, Message};
use pantograph::server::{Server, default_workspace_factory};
use pantograph::service::Toolchain;

/// Command-line arguments for pantograph.
#[derive(Parser, Debug)]
#[command(name = "pantograph")]
#[command(version = env!("PANTOGRAPH_VERSION"))]
#[command(about = "LSP server multiplexing toolchain backends per workspace")]
struct Args {
    /// Path to configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Semantic backend server binary; overrides the configured toolchains.
    #[arg(long)]
    sema_server: Option<PathBuf>,

    /// C-family backend server binary; overrides the configured toolchains.
    #[arg(long)]
    cfamily_server: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.clone()).context("loading configuration")?;

    let mut toolchains = config.toolchains();
    let mut default_toolchain = config.default_toolchain.clone();
    if args.sema_server.is_some() || args.cfamily_server.is_some() {
        // A toolchain assembled from the command line wins over the config.
        toolchains.insert(
            0,
            Toolchain {
                name: "commandline".to_string(),
                sema_server: args.sema_server.clone(),
                cfamily_server: args.cfamily_server.clone(),
            },
        );
        default_toolchain = Some("commandline".to_string());
    }
    info!(
        "pantograph {} starting with {} toolchain(s)",
        env!("PANTOGRAPH_VERSION"),
        toolchains.len()
    );

    let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let server = Server::new(
        toolchains,
        default_toolchain,
        default_workspace_factory(),
        out_tx,
        reply_tx,
    );

    let writer = tokio::spawn(write_loop(out_rx, reply_rx));
    let reader = tokio::spawn(read_loop(server.clone()));

    let mut exit = server.exit_signal();
    // Exit either on the `exit` notification or when stdin closes.
    tokio::select! {
        _ = exit.changed() => info!("exit requested"),
        _ = reader => warn!("editor closed the transport"),
    }

    writer.abort();
    Ok(())
}

/// Reads framed messages from stdin and dispatches them.
async fn read_loop(server: std::sync::Arc<Server>) {
    let mut stdin = tokio::io::stdin();
    let mut buffer = BytesMut::with_capacity(8192);
    let mut chunk = [0u8; 4096];

    loop {
        match stdin.read(&mut chunk).await {
            Ok(0) => {
                debug!("stdin closed");
                return;
            }
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(e) => {
                error!("error reading stdin: {e}");
                return;
            }
        }

        loop {
            let body = match protocol::try_parse_message(&mut buffer) {
                Ok(Some(body)) => body,
                Ok(None) => break,
                Err(e) => {
                    error!("malformed frame from editor: {e:#}");
                    return;
                }
            };
            let value: serde_json::Value = match serde_json::from_str(&body) {
                Ok(value) => value,
                Err(e) => {
                    warn!("unparseable message body: {e}");
                    continue;
                }
            };
            match Message::classify(value) {
                Ok(message) => server.dispatch(message),
                Err(e) => warn!("unclassifiable message: {e:#}"),
            }
        }
    }
}

/// Writes framed traffic to stdout: handler replies plus server-initiated
/// requests and notifications.
async fn write_loop(
    mut out_rx: mpsc::UnboundedReceiver<String>,
    mut reply_rx: mpsc::UnboundedReceiver<pantograph::protocol::ResponseMessage>,
) {
    let mut stdout = tokio::io::stdout();
    loop {
        let framed = tokio::select! {
            frame = out_rx.recv() => frame,
            reply = reply_rx.recv() => match reply {
                Some(reply) => match protocol::frame_message(&reply) {
                    Ok(framed) => Some(framed),
                    Err(e) => {
                        error!("unserializable reply: {e:#}");
                        continue;
                    }
                },
                None => None,
            },
        };
        let Some(framed) = framed else {
            return;
        };
        if stdout.write_all(framed.as_bytes()).await.is_err() {
            return;
        }
        let _ = stdout.flush().await;
    }
}

/*
 * mockmail_server.rs
 * Copyright (C) 2026 The mockmail authors
 *
 * This file is part of mockmail, an in-memory multi-protocol (SMTP/IMAP/POP3) mail
 * server used as a test double.
 *
 * mockmail is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * mockmail is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with mockmail.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Standalone runner: reads the flat `key=value` configuration surface from a file named on
//! the command line (or `-` / no argument for an empty, all-default config), starts the
//! server, and blocks until Ctrl-C. Exit code 0 on a clean shutdown, non-zero on a bind
//! failure or a config file that couldn't be read.

use std::collections::HashMap;
use std::process::ExitCode;

use mockmail::{MailServer, ServerConfig};

fn parse_properties(text: &str) -> HashMap<String, String> {
    let mut props = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            props.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    props
}

fn load_config() -> Result<ServerConfig, String> {
    match std::env::args().nth(1) {
        None => Ok(ServerConfig::default()),
        Some(arg) if arg == "-" => Ok(ServerConfig::default()),
        Some(path) => {
            let text = std::fs::read_to_string(&path).map_err(|e| format!("reading {}: {}", path, e))?;
            Ok(ServerConfig::from_properties(&parse_properties(&text)))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match load_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("mockmail-server: malformed configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let filter = if config.verbose { "mockmail=trace" } else { "mockmail=info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    let server = MailServer::new(config);
    if let Err(e) = server.start().await {
        tracing::error!(error = %e, "failed to start listeners");
        return ExitCode::FAILURE;
    }
    tracing::info!(addrs = ?server.bound_addrs().await, "mockmail-server listening");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to install Ctrl-C handler, shutting down anyway");
    }
    tracing::info!("shutting down");
    server.stop().await;
    ExitCode::SUCCESS
}

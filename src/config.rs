/*
 * config.rs
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

//! Configuration surface: which protocols to start, on which ports, which users exist, and
//! post-start actions (folder/`.eml` seeding). Mirrors the flat property-bag style tests use
//! to drive the server (`setup.smtp`, `users`, `auth.disabled`, ...) while also offering a
//! builder for constructing a `ServerConfig` directly from Rust.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Smtp,
    Imap,
    Pop3,
}

impl Protocol {
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Smtp => "smtp",
            Protocol::Imap => "imap",
            Protocol::Pop3 => "pop3",
        }
    }

    fn all() -> [Protocol; 3] {
        [Protocol::Smtp, Protocol::Imap, Protocol::Pop3]
    }

    /// Default (non-TLS) port, and the TLS-variant port, for this protocol.
    pub fn default_ports(&self) -> (u16, u16) {
        match self {
            Protocol::Smtp => (25, 465),
            Protocol::Imap => (143, 993),
            Protocol::Pop3 => (110, 995),
        }
    }
}

/// Login form used to match `users` entries against SMTP/IMAP/POP3 login strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginForm {
    LocalPart,
    Email,
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub protocol: Protocol,
    pub bind: String,
    pub port: u16,
    pub tls: bool,
}

#[derive(Debug, Clone)]
pub struct ConfiguredUser {
    pub login: String,
    pub password: String,
    pub domain: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FolderSeed {
    pub user: String,
    pub folders: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EmlSeed {
    pub user: String,
    pub path: PathBuf,
    pub is_dir: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listeners: Vec<ListenerConfig>,
    pub users: Vec<ConfiguredUser>,
    pub users_login_form: LoginForm,
    pub auth_disabled: bool,
    pub verbose: bool,
    pub startup_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub eml_seeds: Vec<EmlSeed>,
    pub folder_seeds: Vec<FolderSeed>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
            users: Vec::new(),
            users_login_form: LoginForm::LocalPart,
            auth_disabled: false,
            verbose: false,
            startup_timeout: Duration::from_millis(1000),
            shutdown_timeout: Duration::from_millis(1000),
            eml_seeds: Vec::new(),
            folder_seeds: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Parse the flat property surface described in the configuration surface section:
    /// `setup.<protocol|all>`, `setup.test.<protocol|all>`, `<protocol>.hostname`,
    /// `<protocol>.port`, `users`, `users.login`, `auth.disabled`, `verbose`,
    /// `startup.timeout`, `foldersCreate=`, `emlFilesDirLoad=`, `emlFileLoad=`.
    pub fn from_properties(props: &HashMap<String, String>) -> Self {
        let mut cfg = ServerConfig::default();
        cfg.verbose = bool_prop(props, "verbose");
        cfg.auth_disabled = bool_prop(props, "auth.disabled");
        if let Some(ms) = props.get("startup.timeout").and_then(|v| v.parse::<u64>().ok()) {
            cfg.startup_timeout = Duration::from_millis(ms);
        }

        for proto in Protocol::all() {
            let name = proto.name();
            let (default_port, default_tls_port) = proto.default_ports();
            let hostname = props.get(&format!("{}.hostname", name)).cloned().unwrap_or_else(|| "127.0.0.1".to_string());
            let explicit_port = props.get(&format!("{}.port", name)).and_then(|v| v.parse::<u16>().ok());

            let setup_all = bool_prop(props, "setup.all");
            let setup_proto = bool_prop(props, &format!("setup.{}", name));
            if setup_all || setup_proto || explicit_port.is_some() {
                cfg.listeners.push(ListenerConfig {
                    protocol: proto,
                    bind: hostname.clone(),
                    port: explicit_port.unwrap_or(default_port),
                    tls: false,
                });
            }

            let test_all = bool_prop(props, "setup.test.all");
            let test_proto = bool_prop(props, &format!("setup.test.{}", name));
            if test_all || test_proto {
                cfg.listeners.push(ListenerConfig {
                    protocol: proto,
                    bind: hostname.clone(),
                    port: default_port + 3000,
                    tls: false,
                });
            }
            let _ = default_tls_port;
        }

        if let Some(login_form) = props.get("users.login") {
            cfg.users_login_form = if login_form.eq_ignore_ascii_case("email") { LoginForm::Email } else { LoginForm::LocalPart };
        }
        if let Some(users) = props.get("users") {
            cfg.users = parse_users(users);
        }

        for (key, value) in props.iter() {
            if key == "foldersCreate" {
                cfg.folder_seeds.extend(parse_folders_create(value));
            } else if key == "emlFilesDirLoad" {
                cfg.eml_seeds.extend(parse_eml_seed(value, true));
            } else if key == "emlFileLoad" || key == "imap.loadEmlFile" {
                // The original conflates `emlFileLoad` and `imap.loadEmlFile`; accept both
                // and warn on the latter rather than guess which was intended.
                if key == "imap.loadEmlFile" {
                    tracing::warn!("imap.loadEmlFile is deprecated; use emlFileLoad");
                }
                cfg.eml_seeds.extend(parse_eml_seed(value, false));
            }
        }

        cfg
    }
}

fn bool_prop(props: &HashMap<String, String>, key: &str) -> bool {
    props.get(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

/// `login:password[@domain],login2:password2[@domain2],...`
fn parse_users(spec: &str) -> Vec<ConfiguredUser> {
    spec.split(',')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|entry| {
            let entry = entry.trim();
            let (login_pass, domain) = match entry.split_once('@') {
                Some((lp, d)) => (lp, Some(d.to_string())),
                None => (entry, None),
            };
            let (login, password) = login_pass.split_once(':')?;
            Some(ConfiguredUser { login: login.to_string(), password: password.to_string(), domain })
        })
        .collect()
}

/// `user:f1,f2,...`
fn parse_folders_create(spec: &str) -> Vec<FolderSeed> {
    match spec.split_once(':') {
        Some((user, rest)) => {
            vec![FolderSeed { user: user.to_string(), folders: rest.split(',').map(|s| s.to_string()).collect() }]
        }
        None => Vec::new(),
    }
}

/// `user:/path`
fn parse_eml_seed(spec: &str, is_dir: bool) -> Vec<EmlSeed> {
    match spec.split_once(':') {
        Some((user, path)) => vec![EmlSeed { user: user.to_string(), path: PathBuf::from(path), is_dir }],
        None => Vec::new(),
    }
}

/// Programmatic, typed alternative to the property-bag surface above; what tests normally use.
#[derive(Default)]
pub struct ServerConfigBuilder {
    cfg: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn with_protocol(mut self, protocol: Protocol, bind: &str, port: u16, tls: bool) -> Self {
        self.cfg.listeners.push(ListenerConfig { protocol, bind: bind.to_string(), port, tls });
        self
    }

    pub fn with_default_protocol(mut self, protocol: Protocol, test_offset: bool) -> Self {
        let (port, _) = protocol.default_ports();
        let port = if test_offset { port + 3000 } else { port };
        self.cfg.listeners.push(ListenerConfig { protocol, bind: "127.0.0.1".to_string(), port, tls: false });
        self
    }

    pub fn with_user(mut self, login: &str, password: &str, domain: Option<&str>) -> Self {
        self.cfg.users.push(ConfiguredUser { login: login.to_string(), password: password.to_string(), domain: domain.map(str::to_string) });
        self
    }

    pub fn auth_disabled(mut self, value: bool) -> Self {
        self.cfg.auth_disabled = value;
        self
    }

    pub fn verbose(mut self, value: bool) -> Self {
        self.cfg.verbose = value;
        self
    }

    pub fn startup_timeout(mut self, d: Duration) -> Self {
        self.cfg.startup_timeout = d;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_users_with_domain() {
        let users = parse_users("test:pw@localhost,other:pw2");
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].login, "test");
        assert_eq!(users[0].domain.as_deref(), Some("localhost"));
        assert_eq!(users[1].domain, None);
    }

    #[test]
    fn setup_all_starts_every_protocol_on_default_ports() {
        let mut props = HashMap::new();
        props.insert("setup.all".to_string(), "true".to_string());
        let cfg = ServerConfig::from_properties(&props);
        assert_eq!(cfg.listeners.len(), 3);
        assert!(cfg.listeners.iter().any(|l| l.protocol == Protocol::Smtp && l.port == 25));
    }

    #[test]
    fn setup_test_offsets_port_by_3000() {
        let mut props = HashMap::new();
        props.insert("setup.test.imap".to_string(), "true".to_string());
        let cfg = ServerConfig::from_properties(&props);
        assert_eq!(cfg.listeners[0].port, 3143);
    }

    #[test]
    fn eml_file_load_and_deprecated_alias_both_accepted() {
        let mut props = HashMap::new();
        props.insert("emlFileLoad".to_string(), "test:/tmp/a.eml".to_string());
        props.insert("imap.loadEmlFile".to_string(), "test:/tmp/b.eml".to_string());
        let cfg = ServerConfig::from_properties(&props);
        assert_eq!(cfg.eml_seeds.len(), 2);
    }
}

/*
 * server.rs
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

//! Listener/acceptor and the server-wide lifecycle and test-facing API.
//!
//! One acceptor task per configured `{protocol, bind, port, tls}`; each accepted connection
//! gets its own session task reading/writing through the protocol modules in
//! [`crate::protocol`]. `start()` binds every listener (or fails) before returning, rather
//! than racing the first client connect against a still-unbound socket; `stop()` aborts every
//! outstanding acceptor and session task and joins them. TLS socket construction itself is an
//! external concern per the spec: this module only wraps an already-built `rustls::ServerConfig`
//! supplied by the caller (see [`crate::net`]) around listeners marked `tls`.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tokio_rustls::rustls::ServerConfig as TlsServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::auth::AuthManager;
use crate::config::{self, Protocol};
use crate::delivery::{DeliveryPipeline, ReceivedMessage};
use crate::error::{MailError, MailResult};
use crate::net::Stream;
use crate::protocol::{imap, pop3, smtp};
use crate::store::{FlagSet, Store};

/// Everything the server needs to run, assembled once at `new()` and shared by every
/// acceptor/session task via `Arc`.
pub struct MailServer {
    config: config::ServerConfig,
    hostname: String,
    store: Arc<Store>,
    auth: Arc<AuthManager>,
    pipeline: Arc<DeliveryPipeline>,
    tls_config: Option<Arc<TlsServerConfig>>,
    acceptors: AsyncMutex<JoinSet<()>>,
    sessions: Arc<AsyncMutex<JoinSet<()>>>,
    bound: AsyncMutex<Vec<std::net::SocketAddr>>,
}

impl MailServer {
    pub fn new(config: config::ServerConfig) -> Self {
        Self::with_tls(config, None)
    }

    pub fn with_tls(config: config::ServerConfig, tls_config: Option<Arc<TlsServerConfig>>) -> Self {
        let store = Arc::new(Store::new());
        let auth = Arc::new(AuthManager::new(config.auth_disabled));
        let pipeline = Arc::new(DeliveryPipeline::new(store.clone(), auth.clone()));
        Self {
            config,
            hostname: "mockmail".to_string(),
            store,
            auth,
            pipeline,
            tls_config,
            acceptors: AsyncMutex::new(JoinSet::new()),
            sessions: Arc::new(AsyncMutex::new(JoinSet::new())),
            bound: AsyncMutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    pub fn pipeline(&self) -> &Arc<DeliveryPipeline> {
        &self.pipeline
    }

    /// Bind every configured listener, seed configured users and post-start folder/`.eml`
    /// actions, then return. Fails `Io` if any listener hasn't bound within `startupTimeout`.
    pub async fn start(&self) -> MailResult<()> {
        for user in &self.config.users {
            let email = user
                .domain
                .as_ref()
                .map(|d| format!("{}@{}", user.login, d))
                .unwrap_or_else(|| format!("{}@localhost", user.login));
            self.auth.set_user(&user.login, &email, &user.password).await;
            self.store.ensure_inbox(&user.login).await;
            // `users.login = email`: clients authenticate with the email form, but the
            // folder tree stays owned by the canonical login registered above.
            if self.config.users_login_form == config::LoginForm::Email && email != user.login {
                self.auth.set_user_alias(&email, &user.login).await;
            }
        }

        let listeners = self.config.listeners.clone();
        let bind_fut = async {
            let mut acceptors = self.acceptors.lock().await;
            let mut bound = self.bound.lock().await;
            for listener_cfg in &listeners {
                let tcp = TcpListener::bind((listener_cfg.bind.as_str(), listener_cfg.port))
                    .await
                    .map_err(MailError::Io)?;
                bound.push(tcp.local_addr().map_err(MailError::Io)?);
                let implicit_tls_acceptor = if listener_cfg.tls {
                    let cfg = self
                        .tls_config
                        .clone()
                        .ok_or_else(|| MailError::protocol("TLS listener configured without a TLS config"))?;
                    Some(TlsAcceptor::from(cfg))
                } else {
                    None
                };
                // A plain listener still offers STARTTLS/STLS upgrade-in-place when the server
                // has a TLS config at all, even though it doesn't accept TLS immediately.
                let starttls_acceptor = if listener_cfg.tls {
                    None
                } else {
                    self.tls_config.clone().map(TlsAcceptor::from)
                };
                let store = self.store.clone();
                let auth = self.auth.clone();
                let pipeline = self.pipeline.clone();
                let hostname = self.hostname.clone();
                let sessions = self.sessions.clone();
                let protocol = listener_cfg.protocol;
                acceptors.spawn(async move {
                    accept_loop(tcp, implicit_tls_acceptor, starttls_acceptor, protocol, hostname, store, auth, pipeline, sessions).await;
                });
            }
            Ok::<(), MailError>(())
        };
        let bind_result = tokio::time::timeout(self.config.startup_timeout, bind_fut)
            .await
            .map_err(|_| MailError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "listeners did not bind in time")))
            .and_then(|r| r);
        if let Err(e) = bind_result {
            self.stop().await;
            return Err(e);
        }

        for seed in &self.config.folder_seeds {
            self.store.ensure_inbox(&seed.user).await;
            for folder in &seed.folders {
                let _ = self.store.create_mailbox(&seed.user, folder).await;
            }
        }
        for seed in &self.config.eml_seeds {
            self.load_eml_seed(seed).await;
        }
        Ok(())
    }

    async fn load_eml_seed(&self, seed: &config::EmlSeed) {
        self.store.ensure_inbox(&seed.user).await;
        let paths: Vec<std::path::PathBuf> = if seed.is_dir {
            match std::fs::read_dir(&seed.path) {
                Ok(entries) => entries.filter_map(|e| e.ok().map(|e| e.path())).collect(),
                Err(e) => {
                    tracing::warn!(path = %seed.path.display(), error = %e, "could not read eml directory");
                    Vec::new()
                }
            }
        } else {
            vec![seed.path.clone()]
        };
        for path in paths {
            match std::fs::read(&path) {
                Ok(raw) => {
                    let _ = self.store.append(&seed.user, crate::store::INBOX, raw, FlagSet::new(), None).await;
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not load eml file"),
            }
        }
    }

    /// Addresses every listener actually bound to, in configuration order. Useful in tests
    /// that bind to port 0 and need to discover the OS-assigned port.
    pub async fn bound_addrs(&self) -> Vec<std::net::SocketAddr> {
        self.bound.lock().await.clone()
    }

    /// Close every listener and abort every outstanding session, then join within
    /// `shutdownTimeout`. Idempotent: calling on an already-stopped server is a no-op.
    pub async fn stop(&self) {
        let mut acceptors = self.acceptors.lock().await;
        acceptors.abort_all();
        while acceptors.join_next().await.is_some() {}
        drop(acceptors);

        let sessions = self.sessions.clone();
        let join_all = async move {
            let mut sessions = sessions.lock().await;
            sessions.abort_all();
            while sessions.join_next().await.is_some() {}
        };
        let _ = tokio::time::timeout(self.config.shutdown_timeout, join_all).await;
    }

    /// Block until at least `count` SMTP deliveries have completed since this call started,
    /// or `timeout` elapses.
    pub async fn wait_for_incoming_email(&self, timeout: Duration, count: u64) -> bool {
        self.pipeline.wait_for_incoming_email(timeout, count).await
    }

    pub async fn received_messages(&self) -> Vec<ReceivedMessage> {
        self.pipeline.received_messages().await
    }

    pub async fn received_messages_for_domain(&self, domain: &str) -> Vec<ReceivedMessage> {
        self.pipeline.received_messages_for_domain(domain).await
    }

    /// `setUser(login, password)`: login doubles as the local part, email defaults to
    /// `login@localhost`.
    pub async fn set_user(&self, login: &str, password: &str) {
        self.auth.set_user(login, &format!("{}@localhost", login), password).await;
        self.store.ensure_inbox(login).await;
    }

    /// `setUser(email, login, password)`: explicit email distinct from the login form.
    pub async fn set_user_with_email(&self, email: &str, login: &str, password: &str) {
        self.auth.set_user(login, email, password).await;
        self.store.ensure_inbox(login).await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn accept_loop(
    listener: TcpListener,
    implicit_tls_acceptor: Option<TlsAcceptor>,
    starttls_acceptor: Option<TlsAcceptor>,
    protocol: Protocol,
    hostname: String,
    store: Arc<Store>,
    auth: Arc<AuthManager>,
    pipeline: Arc<DeliveryPipeline>,
    sessions: Arc<AsyncMutex<JoinSet<()>>>,
) {
    loop {
        let (tcp, _addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, ?protocol, "accept failed");
                continue;
            }
        };
        let implicit_tls_acceptor = implicit_tls_acceptor.clone();
        let starttls_acceptor = starttls_acceptor.clone();
        let hostname = hostname.clone();
        let store = store.clone();
        let auth = auth.clone();
        let pipeline = pipeline.clone();
        let mut sessions = sessions.lock().await;
        sessions.spawn(async move {
            let stream = match implicit_tls_acceptor {
                Some(acceptor) => match Stream::accept_tls(tcp, &acceptor).await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(error = %e, "TLS handshake failed");
                        return;
                    }
                },
                None => Stream::plain(tcp),
            };
            let result = match protocol {
                Protocol::Smtp => smtp::run_session(stream, hostname, pipeline, auth, starttls_acceptor).await,
                Protocol::Pop3 => pop3::run_session(stream, hostname, auth, store, starttls_acceptor).await,
                Protocol::Imap => imap::run_session(stream, &hostname, store, auth, starttls_acceptor).await,
            };
            if let Err(e) = result {
                if !matches!(e, MailError::Io(_)) {
                    tracing::debug!(error = %e, ?protocol, "session ended with error");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ListenerConfig, ServerConfig as Cfg};

    fn test_config(protocols: &[Protocol]) -> Cfg {
        let mut cfg = Cfg::default();
        cfg.auth_disabled = true;
        for &p in protocols {
            cfg.listeners.push(ListenerConfig { protocol: p, bind: "127.0.0.1".to_string(), port: 0, tls: false });
        }
        cfg
    }

    #[tokio::test]
    async fn start_binds_listeners_and_stop_is_idempotent() {
        let server = MailServer::new(test_config(&[Protocol::Smtp, Protocol::Imap, Protocol::Pop3]));
        server.start().await.unwrap();
        assert_eq!(server.bound_addrs().await.len(), 3);
        server.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn set_user_creates_inbox() {
        let server = MailServer::new(Cfg::default());
        server.set_user("alice", "secret").await;
        assert!(server.store().get_folder("alice", "INBOX").await.is_some());
    }

    #[tokio::test]
    async fn wait_for_incoming_email_reflects_pipeline_deliveries() {
        let server = MailServer::new(test_config(&[]));
        server.start().await.unwrap();
        server.set_user("test", "pw").await;
        let msg = ReceivedMessage { from: "a@b".to_string(), rcpts: vec!["test@localhost".to_string()], raw: b"hi".to_vec() };
        server.pipeline().deliver(&msg).await;
        assert!(server.wait_for_incoming_email(Duration::from_millis(200), 1).await);
        server.stop().await;
    }
}

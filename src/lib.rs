/*
 * lib.rs
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

//! In-memory, multi-protocol (SMTP/IMAP/POP3) mail server used as a test double: start one
//! or more listeners against a single shared mailbox store, inject mail over SMTP or the
//! programmatic API, then assert on it over IMAP or POP3.
//!
//! [`server`] is the assembly point (listeners, lifecycle, the test-facing API); everything
//! else is a layer it wires together: [`store`] owns mailbox state, [`auth`] the user
//! directory, [`protocol`] the three session state machines, [`codec`] the shared
//! line/literal reader, [`mime`] header/body parsing, and [`sasl`]/[`net`] the auth and TLS
//! plumbing each session needs.

pub mod auth;
pub mod codec;
pub mod config;
pub mod delivery;
pub mod error;
pub mod mime;
pub mod net;
pub mod protocol;
pub mod sasl;
pub mod server;
pub mod store;

pub use config::{Protocol, ServerConfig};
pub use error::{MailError, MailResult};
pub use server::MailServer;

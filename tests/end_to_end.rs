/*
 * end_to_end.rs
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

//! Drives `MailServer` over real loopback sockets, the way an application's test suite would.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use mockmail::config::{ListenerConfig, Protocol, ServerConfig};
use mockmail::MailServer;

async fn connect(port: u16) -> (BufReader<tokio::net::tcp::OwnedReadHalf>, tokio::net::tcp::OwnedWriteHalf) {
    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let (r, w) = stream.into_split();
    (BufReader::new(r), w)
}

async fn read_line(r: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> String {
    let mut line = String::new();
    r.read_line(&mut line).await.unwrap();
    line
}

async fn read_until_tagged(r: &mut BufReader<tokio::net::tcp::OwnedReadHalf>, tag: &str) -> Vec<String> {
    let mut lines = Vec::new();
    loop {
        let line = read_line(r).await;
        let is_tagged = line.starts_with(&format!("{} ", tag));
        lines.push(line);
        if is_tagged {
            return lines;
        }
    }
}

async fn write_line(w: &mut tokio::net::tcp::OwnedWriteHalf, line: &str) {
    w.write_all(line.as_bytes()).await.unwrap();
    w.write_all(b"\r\n").await.unwrap();
}

fn port_config(protocols: &[Protocol]) -> ServerConfig {
    let mut cfg = ServerConfig::default();
    cfg.auth_disabled = false;
    for &p in protocols {
        cfg.listeners.push(ListenerConfig { protocol: p, bind: "127.0.0.1".to_string(), port: 0, tls: false });
    }
    cfg
}

fn addr_for(server: &MailServer, addrs: &[std::net::SocketAddr], protocols: &[Protocol], wanted: Protocol) -> u16 {
    let idx = protocols.iter().position(|&p| p == wanted).unwrap();
    let _ = server;
    addrs[idx].port()
}

/// Scenario 1: SMTP delivers a message, IMAP LOGIN/SELECT/FETCH reads it back.
#[tokio::test]
async fn smtp_delivery_visible_over_imap() {
    let protocols = [Protocol::Smtp, Protocol::Imap];
    let server = MailServer::new(port_config(&protocols));
    server.set_user("test", "test").await;
    server.start().await.unwrap();
    let addrs = server.bound_addrs().await;
    let smtp_port = addr_for(&server, &addrs, &protocols, Protocol::Smtp);
    let imap_port = addr_for(&server, &addrs, &protocols, Protocol::Imap);

    {
        let (mut r, mut w) = connect(smtp_port).await;
        read_line(&mut r).await; // 220 greeting
        write_line(&mut w, "EHLO client.example").await;
        read_until_tagged(&mut r, "250 ").await;
        write_line(&mut w, "MAIL FROM:<a@b>").await;
        read_line(&mut r).await;
        write_line(&mut w, "RCPT TO:<test@localhost>").await;
        read_line(&mut r).await;
        write_line(&mut w, "DATA").await;
        read_line(&mut r).await;
        write_line(&mut w, "Subject: hi").await;
        write_line(&mut w, "").await;
        write_line(&mut w, "hello").await;
        write_line(&mut w, ".").await;
        let reply = read_line(&mut r).await;
        assert!(reply.starts_with("250"), "unexpected DATA reply: {}", reply);
        write_line(&mut w, "QUIT").await;
        read_line(&mut r).await;
    }

    let (mut r, mut w) = connect(imap_port).await;
    read_line(&mut r).await; // * OK greeting
    write_line(&mut w, "a1 LOGIN test test").await;
    read_until_tagged(&mut r, "a1").await;
    write_line(&mut w, "a2 SELECT INBOX").await;
    let select_lines = read_until_tagged(&mut r, "a2").await;
    assert!(select_lines.iter().any(|l| l.starts_with("* 1 EXISTS")), "lines: {:?}", select_lines);
    write_line(&mut w, "a3 FETCH 1 RFC822").await;
    let fetch_lines = read_until_tagged(&mut r, "a3").await;
    let joined = fetch_lines.join("");
    assert!(joined.contains("Subject: hi"));
    assert!(joined.contains("hello"));
    write_line(&mut w, "a4 LOGOUT").await;
    read_until_tagged(&mut r, "a4").await;

    server.stop().await;
}

/// Scenario 2: append twice, expunge the first; the survivor keeps its UID and becomes seq 1.
#[tokio::test]
async fn expunge_preserves_surviving_uid() {
    let protocols = [Protocol::Imap];
    let server = MailServer::new(port_config(&protocols));
    server.set_user("test", "test").await;
    server.start().await.unwrap();
    let port = addr_for(&server, &server.bound_addrs().await, &protocols, Protocol::Imap);

    let (mut r, mut w) = connect(port).await;
    read_line(&mut r).await;
    write_line(&mut w, "a1 LOGIN test test").await;
    read_until_tagged(&mut r, "a1").await;

    write_line(&mut w, "a2 APPEND INBOX {14}").await;
    let cont = read_line(&mut r).await;
    assert!(cont.starts_with('+'), "expected continuation, got {}", cont);
    w.write_all(b"Subject: one\r\n").await.unwrap();
    let append1 = read_until_tagged(&mut r, "a2").await;
    assert!(append1.last().unwrap().contains("APPENDUID"));

    write_line(&mut w, "a3 APPEND INBOX {14}").await;
    read_line(&mut r).await;
    w.write_all(b"Subject: two\r\n").await.unwrap();
    let append2 = read_until_tagged(&mut r, "a3").await;
    let second_uid = extract_uid(append2.last().unwrap());

    write_line(&mut w, "a4 SELECT INBOX").await;
    read_until_tagged(&mut r, "a4").await;
    write_line(&mut w, "a5 STORE 1 +FLAGS (\\Deleted)").await;
    read_until_tagged(&mut r, "a5").await;
    write_line(&mut w, "a6 EXPUNGE").await;
    let expunge_lines = read_until_tagged(&mut r, "a6").await;
    assert!(expunge_lines.iter().any(|l| l.starts_with("* 1 EXPUNGE")));

    write_line(&mut w, "a7 UID FETCH 1 UID").await;
    let fetch_lines = read_until_tagged(&mut r, "a7").await;
    let joined = fetch_lines.join("");
    assert!(joined.contains(&format!("UID {}", second_uid)), "expected survivor uid {} in {}", second_uid, joined);

    server.stop().await;
}

fn extract_uid(appenduid_line: &str) -> String {
    // "a3 OK [APPENDUID 1 5] APPEND completed" -> "5"
    let start = appenduid_line.find("APPENDUID").expect("APPENDUID present");
    let rest = &appenduid_line[start..];
    rest.split_whitespace().nth(2).unwrap().trim_end_matches(']').to_string()
}

/// Scenario 3: a second IMAP session observes a concurrent SMTP delivery via NOOP.
#[tokio::test]
async fn concurrent_session_observes_delivery_on_noop() {
    let protocols = [Protocol::Smtp, Protocol::Imap];
    let server = MailServer::new(port_config(&protocols));
    server.set_user("test", "test").await;
    server.start().await.unwrap();
    let addrs = server.bound_addrs().await;
    let smtp_port = addr_for(&server, &addrs, &protocols, Protocol::Smtp);
    let imap_port = addr_for(&server, &addrs, &protocols, Protocol::Imap);

    let (mut r1, mut w1) = connect(imap_port).await;
    read_line(&mut r1).await;
    write_line(&mut w1, "a1 LOGIN test test").await;
    read_until_tagged(&mut r1, "a1").await;
    write_line(&mut w1, "a2 SELECT INBOX").await;
    let select_lines = read_until_tagged(&mut r1, "a2").await;
    assert!(select_lines.iter().any(|l| l.starts_with("* 0 EXISTS")));

    {
        let (mut r, mut w) = connect(smtp_port).await;
        read_line(&mut r).await;
        write_line(&mut w, "EHLO c").await;
        read_until_tagged(&mut r, "250 ").await;
        write_line(&mut w, "MAIL FROM:<a@b>").await;
        read_line(&mut r).await;
        write_line(&mut w, "RCPT TO:<test@localhost>").await;
        read_line(&mut r).await;
        write_line(&mut w, "DATA").await;
        read_line(&mut r).await;
        write_line(&mut w, "hi").await;
        write_line(&mut w, ".").await;
        read_line(&mut r).await;
        write_line(&mut w, "QUIT").await;
        read_line(&mut r).await;
    }

    assert!(server.wait_for_incoming_email(Duration::from_millis(500), 1).await);

    write_line(&mut w1, "a3 NOOP").await;
    let noop_lines = read_until_tagged(&mut r1, "a3").await;
    assert!(noop_lines.iter().any(|l| l.starts_with("* 1 EXISTS")), "lines: {:?}", noop_lines);

    server.stop().await;
}

/// Scenario 4: POP3 LIST/DELE/QUIT removes a message; DELE without QUIT leaves it in place.
#[tokio::test]
async fn pop3_dele_quit_vs_connection_drop() {
    let protocols = [Protocol::Pop3];
    let server = MailServer::new(port_config(&protocols));
    server.set_user("test", "test").await;
    {
        let folder = server.store().ensure_inbox("test").await;
        for subj in ["one", "two", "three"] {
            folder
                .append(format!("Subject: {}\r\n\r\nbody\r\n", subj).into_bytes(), mockmail::store::FlagSet::new(), None)
                .await;
        }
    }
    server.start().await.unwrap();
    let port = addr_for(&server, &server.bound_addrs().await, &protocols, Protocol::Pop3);

    {
        let (mut r, mut w) = connect(port).await;
        read_line(&mut r).await;
        write_line(&mut w, "USER test").await;
        read_line(&mut r).await;
        write_line(&mut w, "PASS test").await;
        read_line(&mut r).await;
        write_line(&mut w, "DELE 1").await;
        read_line(&mut r).await;
        write_line(&mut w, "QUIT").await;
        read_line(&mut r).await;
    }
    let folder = server.store().get_folder("test", "INBOX").await.unwrap();
    assert_eq!(folder.message_count().await, 2);

    {
        let (mut r, mut w) = connect(port).await;
        read_line(&mut r).await;
        write_line(&mut w, "USER test").await;
        read_line(&mut r).await;
        write_line(&mut w, "PASS test").await;
        read_line(&mut r).await;
        write_line(&mut w, "DELE 1").await;
        read_line(&mut r).await;
        // connection drops here without QUIT
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(folder.message_count().await, 2);

    server.stop().await;
}

/// Scenario 5: FETCH BODY[HEADER.FIELDS (Subject)] returns exactly the requested header.
#[tokio::test]
async fn fetch_header_fields_returns_only_requested_header() {
    let protocols = [Protocol::Imap];
    let server = MailServer::new(port_config(&protocols));
    server.set_user("test", "test").await;
    {
        let folder = server.store().ensure_inbox("test").await;
        folder
            .append(b"From: a@b\r\nSubject: Hi There\r\nTo: c@d\r\n\r\nbody\r\n".to_vec(), mockmail::store::FlagSet::new(), None)
            .await;
    }
    server.start().await.unwrap();
    let port = addr_for(&server, &server.bound_addrs().await, &protocols, Protocol::Imap);

    let (mut r, mut w) = connect(port).await;
    read_line(&mut r).await;
    write_line(&mut w, "a1 LOGIN test test").await;
    read_until_tagged(&mut r, "a1").await;
    write_line(&mut w, "a2 SELECT INBOX").await;
    read_until_tagged(&mut r, "a2").await;
    write_line(&mut w, "a3 FETCH 1 BODY.PEEK[HEADER.FIELDS (Subject)]").await;
    let lines = read_until_tagged(&mut r, "a3").await;
    let joined = lines.join("");
    assert!(joined.contains("Subject: Hi There"));
    assert!(!joined.contains("From:"));
    assert!(!joined.contains("To:"));

    server.stop().await;
}

/// Scenario 6: `waitForIncomingEmail` true once the count is reached, false on a short timeout.
#[tokio::test]
async fn wait_for_incoming_email_true_then_false() {
    let protocols = [Protocol::Smtp];
    let server = MailServer::new(port_config(&protocols));
    server.set_user("test", "test").await;
    server.start().await.unwrap();
    let port = addr_for(&server, &server.bound_addrs().await, &protocols, Protocol::Smtp);

    for _ in 0..2 {
        let (mut r, mut w) = connect(port).await;
        read_line(&mut r).await;
        write_line(&mut w, "EHLO c").await;
        read_until_tagged(&mut r, "250 ").await;
        write_line(&mut w, "MAIL FROM:<a@b>").await;
        read_line(&mut r).await;
        write_line(&mut w, "RCPT TO:<test@localhost>").await;
        read_line(&mut r).await;
        write_line(&mut w, "DATA").await;
        read_line(&mut r).await;
        write_line(&mut w, "hi").await;
        write_line(&mut w, ".").await;
        read_line(&mut r).await;
        write_line(&mut w, "QUIT").await;
        read_line(&mut r).await;
    }

    assert!(server.wait_for_incoming_email(Duration::from_millis(1000), 2).await);
    assert!(!server.wait_for_incoming_email(Duration::from_millis(50), 10).await);

    server.stop().await;
}

/*
 * vHook SMTP to webhook relay
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

//! Full SMTP sessions against a relay wired like production, with a stub
//! webhook endpoint on the other side.

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};
use vhook_config::Config;
use vhook_dispatch::{Dispatcher, Scheduler, WebhookClient};
use vhook_queue::QueueManager;
use vhook_router::Router;
use vhook_server::{socket_bind_anyhow, Server};
use vhook_storage::{AttachmentStorage, LocalStore};

struct TestRelay {
    addr: std::net::SocketAddr,
    queue: std::sync::Arc<QueueManager>,
    _dir: tempfile::TempDir,
}

async fn spawn_relay(mutate: impl FnOnce(&mut Config)) -> TestRelay {
    let dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.queue.dirpath = dir.path().join("queue");
    config.storage.local_path = dir.path().join("attachments");
    config.webhook.allow_insecure_http = true;
    mutate(&mut config);
    let config = std::sync::Arc::new(config);

    let queue = QueueManager::init(&config.queue.dirpath).unwrap();
    let storage = AttachmentStorage::new(
        None,
        LocalStore::init(&config.storage.local_path, None, 24).unwrap(),
        config.storage.max_file_size,
        config.storage.s3_retry_interval,
        config.storage.s3_max_retries,
    );

    let dispatcher = Dispatcher::new(
        queue.clone(),
        Router::new(
            config.webhook.rules.as_ref(),
            config.webhook.url.clone(),
            config.webhook.allow_insecure_http,
        ),
        WebhookClient::new(config.webhook.timeout, config.webhook.secret.clone()).unwrap(),
        Scheduler::new(),
        config.webhook.concurrency,
        config.webhook.retry_delay,
        config.webhook.max_queue_size,
    );
    dispatcher.spawn();

    let server = Server::new(config, queue.clone(), dispatcher, storage).unwrap();
    let listener = socket_bind_anyhow("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.listen(listener));

    TestRelay {
        addr,
        queue,
        _dir: dir,
    }
}

struct SmtpClient {
    reader: tokio::io::BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl SmtpClient {
    /// Connect and read the server greeting.
    async fn connect(addr: std::net::SocketAddr) -> (Self, String) {
        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (read, writer) = stream.into_split();
        let mut client = Self {
            reader: tokio::io::BufReader::new(read),
            writer,
        };
        let greeting = client.read_reply().await;
        (client, greeting)
    }

    /// Read one possibly multi-line reply.
    async fn read_reply(&mut self) -> String {
        let mut reply = String::new();
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).await.unwrap();
            if n == 0 {
                break;
            }
            reply.push_str(&line);
            if line.len() < 4 || line.as_bytes()[3] == b' ' {
                break;
            }
        }
        reply
    }

    async fn cmd(&mut self, command: &str) -> String {
        self.writer
            .write_all(format!("{command}\r\n").as_bytes())
            .await
            .unwrap();
        self.read_reply().await
    }

    /// Send a message body after a 354 and read the final reply.
    async fn data(&mut self, body: &str) -> String {
        self.writer.write_all(body.as_bytes()).await.unwrap();
        self.writer.write_all(b"\r\n.\r\n").await.unwrap();
        self.read_reply().await
    }
}

struct WebhookStub {
    url: String,
    requests: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

impl WebhookStub {
    fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

/// Minimal always-200 HTTP responder recording request bodies.
async fn spawn_webhook_stub() -> WebhookStub {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/hook", listener.local_addr().unwrap());
    let requests = std::sync::Arc::new(std::sync::Mutex::new(vec![]));

    let recorded = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let recorded = recorded.clone();

            tokio::spawn(async move {
                let mut buffer = Vec::new();
                let mut chunk = [0u8; 1024];

                let header_end = loop {
                    let Ok(n) = socket.read(&mut chunk).await else {
                        return;
                    };
                    if n == 0 {
                        return;
                    }
                    buffer.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos;
                    }
                };

                let headers = String::from_utf8_lossy(&buffer[..header_end]).to_string();
                let content_length = headers
                    .lines()
                    .find(|line| line.to_ascii_lowercase().starts_with("content-length:"))
                    .and_then(|line| line.split(':').nth(1))
                    .and_then(|value| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);

                let mut body = buffer[header_end + 4..].to_vec();
                while body.len() < content_length {
                    let Ok(n) = socket.read(&mut chunk).await else {
                        break;
                    };
                    if n == 0 {
                        break;
                    }
                    body.extend_from_slice(&chunk[..n]);
                }

                recorded
                    .lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&body).to_string());

                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await;
                let _ = socket.shutdown().await;
            });
        }
    });

    WebhookStub { url, requests }
}

async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    while !condition() {
        assert!(std::time::Instant::now() < deadline, "timed out: {what}");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

const BODY: &str = "From: a@x.example\r\n\
    To: b@x.example\r\n\
    Subject: hello relay\r\n\
    \r\n\
    A plain text body.";

#[tokio::test]
async fn end_to_end_default_delivery() {
    let stub = spawn_webhook_stub().await;
    let relay = {
        let url = stub.url.clone();
        spawn_relay(move |config| config.webhook.url = Some(url)).await
    };

    let (mut client, greeting) = SmtpClient::connect(relay.addr).await;
    assert!(greeting.starts_with("220 "), "{greeting}");

    let reply = client.cmd("EHLO client.example").await;
    assert!(reply.starts_with("250-"), "{reply}");
    assert!(reply.contains("SIZE"), "{reply}");

    assert!(client.cmd("MAIL FROM:<a@x.example>").await.starts_with("250"));
    assert!(client.cmd("RCPT TO:<b@x.example>").await.starts_with("250"));
    assert!(client.cmd("DATA").await.starts_with("354"));

    let reply = client.data(BODY).await;
    assert!(reply.starts_with("250 Ok: queued as "), "{reply}");

    wait_until(|| stub.hits() == 1, "webhook never posted").await;
    wait_until(
        || relay.queue.list_ids().unwrap().is_empty(),
        "task never removed",
    )
    .await;

    let body = stub.requests.lock().unwrap()[0].clone();
    let payload: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(payload["subject"], "hello relay");
    assert_eq!(payload["_webhookMeta"]["ruleName"], "default");
    assert_eq!(payload["_webhookMeta"]["priority"], 9999);

    assert!(client.cmd("QUIT").await.starts_with("221"));
}

#[tokio::test]
async fn rate_limited_client() {
    let relay = spawn_relay(|config| {
        config.server.rate_limit.window = std::time::Duration::from_millis(1000);
        config.server.rate_limit.max_connections = 3;
    })
    .await;

    let mut accepted = 0;
    let mut rejected = 0;
    for _ in 0..5 {
        let (_client, greeting) = SmtpClient::connect(relay.addr).await;
        if greeting.starts_with("220") {
            accepted += 1;
        } else if greeting.starts_with("421") {
            rejected += 1;
        }
    }
    assert_eq!(accepted, 3);
    assert_eq!(rejected, 2);

    // the window slides: a later connection is admitted again
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let (_client, greeting) = SmtpClient::connect(relay.addr).await;
    assert!(greeting.starts_with("220"), "{greeting}");
}

#[tokio::test]
async fn untrusted_relay_rejected_at_connect() {
    let relay = spawn_relay(|config| {
        config.server.policy.require_trusted_relay = true;
        config.server.policy.trusted_relay_ips = vec!["10.9.9.9".to_string()];
    })
    .await;

    let (_client, greeting) = SmtpClient::connect(relay.addr).await;
    assert!(greeting.starts_with("550"), "{greeting}");
}

#[tokio::test]
async fn sender_domain_policy() {
    let relay = spawn_relay(|config| {
        config.server.policy.allowed_sender_domains = vec!["example.com".to_string()];
    })
    .await;

    let (mut client, _) = SmtpClient::connect(relay.addr).await;
    client.cmd("HELO client.example").await;

    assert!(client
        .cmd("MAIL FROM:<intruder@evil.org>")
        .await
        .starts_with("553"));
    assert!(client
        .cmd("MAIL FROM:<jane@example.com>")
        .await
        .starts_with("250"));
}

#[tokio::test]
async fn recipient_domain_policy() {
    let relay = spawn_relay(|config| {
        config.server.policy.allowed_recipient_domains = vec!["inbound.example".to_string()];
    })
    .await;

    let (mut client, _) = SmtpClient::connect(relay.addr).await;
    client.cmd("HELO client.example").await;
    client.cmd("MAIL FROM:<a@x.example>").await;

    assert!(client
        .cmd("RCPT TO:<b@elsewhere.example>")
        .await
        .starts_with("553"));
    assert!(client
        .cmd("RCPT TO:<b@inbound.example>")
        .await
        .starts_with("250"));
}

#[tokio::test]
async fn auth_results_enforcement() {
    let stub = spawn_webhook_stub().await;
    let relay = {
        let url = stub.url.clone();
        spawn_relay(move |config| {
            config.webhook.url = Some(url);
            config.server.policy.trusted_relay_ips = vec!["127.0.0.1".to_string()];
            config.server.policy.required_auth_results =
                vec!["spf=pass".to_string(), "dmarc=pass".to_string()];
        })
        .await
    };

    let passing = "From: a@x.example\r\n\
        To: b@x.example\r\n\
        Subject: authenticated\r\n\
        Authentication-Results: mx.example; spf=pass; dkim=pass; dmarc=pass\r\n\
        \r\n\
        body";
    let failing = "From: a@x.example\r\n\
        To: b@x.example\r\n\
        Subject: half authenticated\r\n\
        Authentication-Results: mx.example; spf=pass\r\n\
        \r\n\
        body";

    let (mut client, _) = SmtpClient::connect(relay.addr).await;
    client.cmd("HELO relay.example").await;
    client.cmd("MAIL FROM:<a@x.example>").await;
    client.cmd("RCPT TO:<b@x.example>").await;
    client.cmd("DATA").await;
    assert!(client.data(passing).await.starts_with("250"));

    client.cmd("MAIL FROM:<a@x.example>").await;
    client.cmd("RCPT TO:<b@x.example>").await;
    client.cmd("DATA").await;
    assert!(client.data(failing).await.starts_with("550"));
}

#[tokio::test]
async fn queue_full_rejects_data() {
    let relay = spawn_relay(|config| {
        config.webhook.max_queue_size = 0;
    })
    .await;

    let (mut client, _) = SmtpClient::connect(relay.addr).await;
    client.cmd("HELO client.example").await;
    client.cmd("MAIL FROM:<a@x.example>").await;
    client.cmd("RCPT TO:<b@x.example>").await;

    let reply = client.cmd("DATA").await;
    assert!(reply.starts_with("451"), "{reply}");

    // the session survives the refusal
    assert!(client.cmd("RSET").await.starts_with("250"));
}

#[tokio::test]
async fn oversized_message_is_refused() {
    let relay = spawn_relay(|config| {
        config.server.message_size_limit = 64;
    })
    .await;

    let (mut client, _) = SmtpClient::connect(relay.addr).await;
    client.cmd("HELO client.example").await;
    client.cmd("MAIL FROM:<a@x.example>").await;
    client.cmd("RCPT TO:<b@x.example>").await;
    client.cmd("DATA").await;

    let reply = client
        .data(&format!("Subject: big\r\n\r\n{}", "x".repeat(256)))
        .await;
    assert!(reply.starts_with("552"), "{reply}");

    assert!(relay.queue.list_ids().unwrap().is_empty());
}

#[tokio::test]
async fn commands_out_of_sequence() {
    let relay = spawn_relay(|_| {}).await;

    let (mut client, _) = SmtpClient::connect(relay.addr).await;
    client.cmd("HELO client.example").await;

    // RCPT before MAIL
    assert!(client.cmd("RCPT TO:<b@x.example>").await.starts_with("503"));
    // DATA before the envelope
    assert!(client.cmd("DATA").await.starts_with("503"));
    // AUTH stays disabled
    assert!(client.cmd("AUTH PLAIN dGVzdA==").await.starts_with("502"));
}

#[tokio::test]
async fn rule_fan_out_with_stop_processing() {
    let stub_a = spawn_webhook_stub().await;
    let stub_b = spawn_webhook_stub().await;

    let relay = {
        let rules = serde_json::json!([
            { "name": "A", "priority": 1, "conditions": { "subject": "*test*" },
              "webhook": stub_a.url.clone(), "stopProcessing": true },
            { "name": "B", "priority": 2, "conditions": { "subject": "*test*" },
              "webhook": stub_b.url.clone() },
        ]);
        spawn_relay(move |config| config.webhook.rules = Some(rules)).await
    };

    let (mut client, _) = SmtpClient::connect(relay.addr).await;
    client.cmd("HELO client.example").await;
    client.cmd("MAIL FROM:<a@x.example>").await;
    client.cmd("RCPT TO:<b@x.example>").await;
    client.cmd("DATA").await;

    let body = "From: a@x.example\r\nTo: b@x.example\r\nSubject: test message\r\n\r\nhi";
    assert!(client.data(body).await.starts_with("250"));

    wait_until(|| stub_a.hits() == 1, "first webhook never posted").await;
    wait_until(
        || relay.queue.list_ids().unwrap().is_empty(),
        "task never removed",
    )
    .await;

    // stop_processing: the lower-priority rule is not fanned out to
    assert_eq!(stub_b.hits(), 0);

    let body = stub_a.requests.lock().unwrap()[0].clone();
    let payload: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(payload["_webhookMeta"]["ruleName"], "A");
    assert_eq!(payload["_webhookMeta"]["priority"], 1);
}

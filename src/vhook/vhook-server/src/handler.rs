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
use crate::{
    extract::extract,
    policy::{domain_allowed, normalize_ip, RateLimiter},
};
use tokio_stream::StreamExt;
use vhook_common::{is_recoverable_network, Reply, Stage};
use vhook_config::Config;
use vhook_dispatch::Dispatcher;
use vhook_protocol::{
    AcceptArgs, EhloArgs, Error, HeloArgs, MailFromArgs, RcptToArgs, ReceiverContext,
    ReceiverHandler,
};
use vhook_queue::QueueManager;
use vhook_storage::AttachmentStorage;

/// Per-session policy handler: every SMTP hook of the admission pipeline.
pub struct Handler {
    config: std::sync::Arc<Config>,
    queue: std::sync::Arc<QueueManager>,
    dispatcher: std::sync::Arc<Dispatcher>,
    storage: std::sync::Arc<AttachmentStorage>,
    rate_limiter: std::sync::Arc<RateLimiter>,

    stage: Stage,
    client_ip: String,
    helo: Option<String>,
    reverse_path: Option<String>,
    forward_paths: Vec<String>,
}

impl Handler {
    ///
    #[must_use]
    pub fn new(
        config: std::sync::Arc<Config>,
        queue: std::sync::Arc<QueueManager>,
        dispatcher: std::sync::Arc<Dispatcher>,
        storage: std::sync::Arc<AttachmentStorage>,
        rate_limiter: std::sync::Arc<RateLimiter>,
    ) -> Self {
        Self {
            config,
            queue,
            dispatcher,
            storage,
            rate_limiter,
            stage: Stage::Connect,
            client_ip: String::new(),
            helo: None,
            reverse_path: None,
            forward_paths: vec![],
        }
    }

    fn is_trusted_relay(&self) -> bool {
        self.config
            .server
            .policy
            .trusted_relay_ips
            .iter()
            .any(|ip| ip.eq_ignore_ascii_case(&self.client_ip))
    }

    fn reset_transaction(&mut self) {
        self.reverse_path = None;
        self.forward_paths.clear();
        self.stage = if self.helo.is_some() {
            Stage::Helo
        } else {
            Stage::Connect
        };
    }

    fn queue_is_full(&self) -> bool {
        self.dispatcher.pending() >= self.config.webhook.max_queue_size
    }

    /// Accept the finished message: parse, enforce post-parse policy, store
    /// attachments, persist the task and hand it to the dispatcher.
    async fn accept_message(&mut self, raw: &[u8]) -> Reply {
        let Some(extracted) = extract(raw) else {
            tracing::warn!(client = %self.client_ip, "Unparsable message.");
            return Reply::new(451, "Failed to process message");
        };

        let policy = &self.config.server.policy;
        if !policy.required_auth_results.is_empty() {
            let results = extracted
                .email
                .headers
                .concatenated("Authentication-Results")
                .to_lowercase();
            let satisfied = self.is_trusted_relay()
                && policy
                    .required_auth_results
                    .iter()
                    .all(|token| results.contains(&token.to_lowercase()));

            if !satisfied {
                tracing::warn!(
                    client = %self.client_ip,
                    trusted = self.is_trusted_relay(),
                    "Authentication results policy failed."
                );
                return Reply::new(550, "Message rejected - authentication check failed");
            }
        }

        let mut email = extracted.email;
        let stored = self.storage.store_all(&extracted.attachments).await;
        email.attachment_info = stored.attachment_info;
        email.skipped_attachments = stored.skipped;
        email.storage_summary = stored.summary;

        let task = match self.queue.create(email) {
            Ok(task) => task,
            Err(error) => {
                tracing::error!(%error, "Cannot persist delivery task.");
                return Reply::new(451, "Requested action aborted - local error in processing");
            }
        };

        // a full in-memory queue is not fatal here: the task is durable and
        // the startup replay (or the next deferred cycle) will pick it up
        if !self.dispatcher.enqueue(task.id.clone()) {
            tracing::warn!(id = %task.id, "Dispatcher backlog full, task left for replay.");
        }

        tracing::info!(
            id = %task.id,
            client = %self.client_ip,
            sender = ?self.reverse_path,
            recipients = self.forward_paths.len(),
            "Message accepted."
        );
        Reply::new(250, format!("Ok: queued as {}", task.id))
    }
}

#[async_trait::async_trait]
impl ReceiverHandler for Handler {
    fn get_stage(&self) -> Stage {
        self.stage
    }

    async fn on_accept(&mut self, ctx: &mut ReceiverContext, args: AcceptArgs) -> Reply {
        self.client_ip = normalize_ip(args.client_addr.ip());
        let policy = &self.config.server.policy;

        if !policy.allowed_smtp_clients.is_empty()
            && !policy
                .allowed_smtp_clients
                .iter()
                .any(|ip| ip.eq_ignore_ascii_case(&self.client_ip))
        {
            tracing::warn!(client = %self.client_ip, "Client not in the allow-list.");
            ctx.deny();
            return Reply::new(550, "Access denied");
        }

        if policy.require_trusted_relay && !self.is_trusted_relay() {
            tracing::warn!(client = %self.client_ip, "Untrusted relay rejected.");
            ctx.deny();
            return Reply::new(550, "Access denied - untrusted relay");
        }

        if !self.rate_limiter.check(&self.client_ip) {
            tracing::warn!(client = %self.client_ip, "Connection rate limit hit.");
            ctx.deny();
            return Reply::new(421, "Too many connections, try again later");
        }

        tracing::debug!(client = %self.client_ip, secured = args.secured, "Session accepted.");
        Reply::new(
            220,
            format!("{} vHook relay Service ready", self.config.server.domain),
        )
    }

    async fn on_helo(&mut self, _: &mut ReceiverContext, args: HeloArgs) -> Reply {
        self.helo = Some(args.client_name.clone());
        self.reset_transaction();

        Reply::new(250, self.config.server.domain.clone())
    }

    async fn on_ehlo(&mut self, _: &mut ReceiverContext, args: EhloArgs) -> Reply {
        self.helo = Some(args.client_name.to_string());
        self.reset_transaction();

        Reply::new(
            250,
            format!(
                "{}\r\n8BITMIME\r\nSMTPUTF8\r\nSIZE {}",
                self.config.server.domain, self.config.server.message_size_limit
            ),
        )
    }

    async fn on_mail_from(&mut self, _: &mut ReceiverContext, args: MailFromArgs) -> Reply {
        let allowed = &self.config.server.policy.allowed_sender_domains;
        if !domain_allowed(args.reverse_path.as_deref(), allowed) {
            tracing::warn!(
                client = %self.client_ip,
                sender = ?args.reverse_path,
                "Sender domain refused."
            );
            return Reply::new(553, "Sender domain not allowed");
        }

        self.reverse_path = args.reverse_path;
        self.forward_paths.clear();
        self.stage = Stage::MailFrom;
        Reply::new(250, "Ok")
    }

    async fn on_rcpt_to(&mut self, _: &mut ReceiverContext, args: RcptToArgs) -> Reply {
        let allowed = &self.config.server.policy.allowed_recipient_domains;
        if !domain_allowed(Some(&args.forward_path), allowed) {
            tracing::warn!(
                client = %self.client_ip,
                recipient = %args.forward_path,
                "Recipient domain refused."
            );
            return Reply::new(553, "Recipient domain not allowed");
        }

        self.forward_paths.push(args.forward_path);
        self.stage = Stage::RcptTo;
        Reply::new(250, "Ok")
    }

    async fn on_rset(&mut self) -> Reply {
        self.reset_transaction();
        Reply::new(250, "Ok")
    }

    async fn on_data(&mut self) -> Reply {
        if self.queue_is_full() {
            tracing::warn!(
                pending = self.dispatcher.pending(),
                "Dispatcher queue full, refusing DATA."
            );
            return Reply::new(451, "Server busy - try again later");
        }

        self.stage = Stage::Data;
        Reply::new(354, "Start mail input; end with <CRLF>.<CRLF>")
    }

    async fn on_message(
        &mut self,
        _: &mut ReceiverContext,
        mut stream: impl tokio_stream::Stream<Item = Result<Vec<u8>, Error>> + Send + Unpin,
    ) -> Reply {
        let mut raw = Vec::new();
        let mut oversized = false;
        let mut broken = false;

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => raw.extend_from_slice(&chunk),
                Err(Error::BufferTooLong { .. }) => oversized = true,
                Err(Error::Io(error)) => {
                    if is_recoverable_network(&error) {
                        tracing::warn!(%error, client = %self.client_ip, "Message stream broken.");
                    } else {
                        tracing::error!(%error, client = %self.client_ip, "Message stream failed.");
                    }
                    broken = true;
                }
            }
        }

        let reply = if oversized {
            Reply::new(552, "Message exceeds fixed maximum message size")
        } else if broken {
            Reply::new(451, "Requested action aborted - local error in processing")
        } else {
            self.accept_message(&raw).await
        };

        self.reset_transaction();
        reply
    }
}

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
use crate::{handler::Handler, policy::RateLimiter};
use anyhow::Context;
use vhook_common::is_recoverable_network;
use vhook_config::{get_rustls_config, Config};
use vhook_dispatch::Dispatcher;
use vhook_protocol::{AcceptArgs, Receiver};
use vhook_queue::QueueManager;
use vhook_storage::AttachmentStorage;

/// Create a TCPListener ready to be listened to.
///
/// # Errors
///
/// * failed to bind to the socket address
/// * failed to set the listener to non blocking
pub fn socket_bind_anyhow<A: std::net::ToSocketAddrs + std::fmt::Debug>(
    addr: A,
) -> anyhow::Result<std::net::TcpListener> {
    let socket = std::net::TcpListener::bind(&addr)
        .with_context(|| format!("failed to bind socket on addr: '{addr:?}'"))?;

    socket
        .set_nonblocking(true)
        .with_context(|| format!("failed to set non-blocking socket on addr: '{addr:?}'"))?;

    Ok(socket)
}

/// TCP/IP server
pub struct Server {
    config: std::sync::Arc<Config>,
    tls_config: Option<std::sync::Arc<tokio_rustls::rustls::ServerConfig>>,
    queue: std::sync::Arc<QueueManager>,
    dispatcher: std::sync::Arc<Dispatcher>,
    storage: std::sync::Arc<AttachmentStorage>,
    rate_limiter: std::sync::Arc<RateLimiter>,
    client_counter: std::sync::atomic::AtomicI64,
}

impl Server {
    /// Create a server with the configuration provided.
    ///
    /// # Errors
    ///
    /// * secure mode is on and the TLS material cannot be loaded
    pub fn new(
        config: std::sync::Arc<Config>,
        queue: std::sync::Arc<QueueManager>,
        dispatcher: std::sync::Arc<Dispatcher>,
        storage: std::sync::Arc<AttachmentStorage>,
    ) -> anyhow::Result<std::sync::Arc<Self>> {
        let tls_config = if config.server.secure {
            let tls = config
                .server
                .tls
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("secure mode requires TLS material"))?;
            Some(std::sync::Arc::new(get_rustls_config(tls)?))
        } else {
            None
        };

        let rate_limiter = std::sync::Arc::new(RateLimiter::new(
            config.server.rate_limit.window,
            config.server.rate_limit.max_connections,
        ));

        Ok(std::sync::Arc::new(Self {
            config,
            tls_config,
            queue,
            dispatcher,
            storage,
            rate_limiter,
            client_counter: std::sync::atomic::AtomicI64::new(0),
        }))
    }

    /// Sessions currently being served; the shutdown path grants them the
    /// configured close timeout.
    #[must_use]
    pub fn active_sessions(&self) -> i64 {
        self.client_counter.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Main accept loop.
    ///
    /// # Errors
    ///
    /// * the listener failed
    pub async fn listen(
        self: std::sync::Arc<Self>,
        listener: std::net::TcpListener,
    ) -> anyhow::Result<()> {
        listener.set_nonblocking(true)?;
        let listener = tokio::net::TcpListener::from_std(listener)?;

        tracing::info!(
            addr = %listener.local_addr()?,
            secure = self.tls_config.is_some(),
            "Listening for clients."
        );

        loop {
            let (mut stream, client_addr) = listener.accept().await?;

            if self.config.server.client_count_max != -1
                && self.active_sessions() >= self.config.server.client_count_max
            {
                tracing::warn!(client = %client_addr, "Too many clients, refusing connection.");

                let refusal = vhook_common::Reply::new(421, "Too many connections, closing").fold();
                if let Err(error) =
                    tokio::io::AsyncWriteExt::write_all(&mut stream, refusal.as_bytes()).await
                {
                    tracing::warn!(%error, "Cannot refuse client.");
                }
                let _ = tokio::io::AsyncWriteExt::shutdown(&mut stream).await;
                continue;
            }

            self.client_counter
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

            let this = self.clone();
            tokio::spawn(async move {
                if let Err(error) = this.clone().run_session(stream, client_addr).await {
                    let error_ref: &(dyn std::error::Error + 'static) = error.as_ref();
                    if is_recoverable_network(error_ref) {
                        tracing::warn!(%error, client = %client_addr, "Session network fault.");
                    } else {
                        tracing::error!(%error, client = %client_addr, "Session failed.");
                    }
                }

                this.client_counter
                    .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            });
        }
    }

    async fn run_session(
        self: std::sync::Arc<Self>,
        stream: tokio::net::TcpStream,
        client_addr: std::net::SocketAddr,
    ) -> anyhow::Result<()> {
        let server_addr = stream.local_addr()?;
        let handler = Handler::new(
            self.config.clone(),
            self.queue.clone(),
            self.dispatcher.clone(),
            self.storage.clone(),
            self.rate_limiter.clone(),
        );

        tracing::debug!(client = %client_addr, "Handling client.");

        match &self.tls_config {
            Some(tls_config) => {
                let acceptor = tokio_rustls::TlsAcceptor::from(tls_config.clone());
                let handshake_timeout = self
                    .config
                    .server
                    .tls
                    .as_ref()
                    .map_or(std::time::Duration::from_secs(10), |tls| {
                        tls.handshake_timeout
                    });

                let tls_stream =
                    tokio::time::timeout(handshake_timeout, acceptor.accept(stream))
                        .await
                        .context("TLS handshake timed out")??;
                let (read, write) = tokio::io::split(tls_stream);

                Receiver::new(
                    read,
                    write,
                    handler,
                    self.config.server.socket_timeout,
                    self.config.server.message_size_limit,
                )
                .handle(AcceptArgs {
                    client_addr,
                    server_addr,
                    secured: true,
                })
                .await?;
            }
            None => {
                let (read, write) = stream.into_split();

                Receiver::new(
                    read,
                    write,
                    handler,
                    self.config.server.socket_timeout,
                    self.config.server.message_size_limit,
                )
                .handle(AcceptArgs {
                    client_addr,
                    server_addr,
                    secured: false,
                })
                .await?;
            }
        }

        tracing::debug!(client = %client_addr, "Connection closed cleanly.");
        Ok(())
    }
}

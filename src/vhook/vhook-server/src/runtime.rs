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
use crate::{server::Server, shutdown};
use anyhow::Context;
use vhook_config::Config;
use vhook_dispatch::{Dispatcher, Scheduler, WebhookClient};
use vhook_queue::QueueManager;
use vhook_router::Router;
use vhook_storage::{AttachmentStorage, LocalStore, ObjectStore, S3Store};

const RETENTION_SWEEP_PERIOD: std::time::Duration = std::time::Duration::from_secs(3600);
const SHUTDOWN_FORCE_AFTER: std::time::Duration = std::time::Duration::from_secs(30);

/// Wire every component and serve until a signal stops the relay.
///
/// Pending tasks stay in the durable queue across restarts: they are
/// replayed into the dispatcher before the listener opens.
///
/// # Errors
///
/// * the configuration is invalid
/// * a storage directory cannot be prepared
/// * the listener failed
pub async fn start_runtime(
    config: Config,
    listener: std::net::TcpListener,
) -> anyhow::Result<()> {
    config.validate()?;
    let config = std::sync::Arc::new(config);

    let queue = QueueManager::init(&config.queue.dirpath)?;

    let encryption_key = config
        .storage
        .encryption_key
        .as_deref()
        .map(vhook_config::parse_encryption_key)
        .transpose()?;
    let local = LocalStore::init(
        &config.storage.local_path,
        encryption_key,
        config.storage.retention_hours,
    )
    .context("cannot prepare the local attachment staging area")?;

    let object_store: Option<std::sync::Arc<dyn ObjectStore>> = match &config.storage.s3 {
        Some(s3) => Some(std::sync::Arc::new(S3Store::new(s3).await)),
        None => {
            tracing::warn!("No object store configured, attachments stay on the local disk.");
            None
        }
    };

    let storage = AttachmentStorage::new(
        object_store,
        local,
        config.storage.max_file_size,
        config.storage.s3_retry_interval,
        config.storage.s3_max_retries,
    );

    let scheduler = Scheduler::new();
    let dispatcher = Dispatcher::new(
        queue.clone(),
        Router::new(
            config.webhook.rules.as_ref(),
            config.webhook.url.clone(),
            config.webhook.allow_insecure_http,
        ),
        WebhookClient::new(config.webhook.timeout, config.webhook.secret.clone())?,
        scheduler.clone(),
        config.webhook.concurrency,
        config.webhook.retry_delay,
        config.webhook.max_queue_size,
    );
    dispatcher.spawn();

    let replayed = dispatcher.replay()?;
    if replayed > 0 {
        tracing::info!(replayed, "Tasks replayed from the durable queue.");
    }

    if !storage.local().retry_queue()?.is_empty() {
        storage.start_reconciler();
    }

    {
        let storage = storage.clone();
        scheduler.every(RETENTION_SWEEP_PERIOD, move || {
            let storage = storage.clone();
            async move {
                match storage.local().sweep_retention() {
                    Ok(0) => {}
                    Ok(removed) => tracing::info!(removed, "Retention sweep done."),
                    Err(error) => tracing::warn!(%error, "Retention sweep failed."),
                }
            }
        });
    }

    let server = Server::new(config.clone(), queue, dispatcher.clone(), storage)?;
    let accept = tokio::spawn({
        let server = server.clone();
        async move {
            if let Err(error) = server.listen(listener).await {
                tracing::error!(%error, "Receiver failure.");
            }
        }
    });

    let signal = shutdown::wait_for_signal().await;
    tracing::warn!(signal, "Stopping vHook relay.");

    // refuse new connections, then grant in-flight sessions the close
    // timeout before draining the dispatcher
    accept.abort();
    let session_deadline = tokio::time::Instant::now() + config.server.close_timeout;
    while server.active_sessions() > 0 && tokio::time::Instant::now() < session_deadline {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    if shutdown::drain_dispatcher(&dispatcher, SHUTDOWN_FORCE_AFTER).await {
        tracing::info!("Every pending delivery drained, bye.");
    }
    scheduler.cancel_all();

    Ok(())
}

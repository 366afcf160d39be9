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
use vhook_dispatch::Dispatcher;

/// Block until the process receives SIGTERM or SIGINT.
///
/// # Panics
///
/// * the signal handlers cannot be installed
pub async fn wait_for_signal() -> &'static str {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("cannot install SIGTERM handler");
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .expect("cannot install SIGINT handler");

    tokio::select! {
        // sent by `systemctl stop`
        _ = sigterm.recv() => "SIGTERM",
        // Ctrl+C on a terminal
        _ = sigint.recv() => "SIGINT",
    }
}

/// Poll the dispatcher's pending count every second until it reaches zero.
/// `false` when `force_after` elapses first: the caller exits anyway, the
/// remaining tasks are durable and replayed on the next start.
pub async fn drain_dispatcher(
    dispatcher: &Dispatcher,
    force_after: std::time::Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + force_after;

    loop {
        let pending = dispatcher.pending();
        if pending == 0 {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(pending, "Forcing exit with deliveries pending.");
            return false;
        }

        tracing::info!(pending, "Waiting for in-flight deliveries.");
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vhook_dispatch::{Scheduler, WebhookClient};
    use vhook_queue::QueueManager;
    use vhook_router::Router;

    fn dispatcher(dir: &std::path::Path) -> std::sync::Arc<Dispatcher> {
        Dispatcher::new(
            QueueManager::init(dir.join("queue")).unwrap(),
            Router::new(None, None, false),
            WebhookClient::new(std::time::Duration::from_secs(1), None).unwrap(),
            Scheduler::new(),
            1,
            std::time::Duration::from_secs(60),
            10,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn drains_immediately_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        assert!(
            drain_dispatcher(&dispatcher(dir.path()), std::time::Duration::from_secs(30)).await
        );
    }

    #[tokio::test(start_paused = true)]
    async fn forces_exit_after_the_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());

        // enqueued but never consumed: pending stays non-zero
        assert!(dispatcher.enqueue("stuck".to_string()));

        assert!(!drain_dispatcher(&dispatcher, std::time::Duration::from_secs(30)).await);
    }
}

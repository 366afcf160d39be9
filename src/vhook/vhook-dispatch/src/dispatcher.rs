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
use crate::{client::WebhookClient, scheduler::Scheduler, DeliveryOutcome};
use vhook_queue::QueueManager;
use vhook_router::{Router, Target};

/// In-worker delivery attempts before the task is handed to the deferred
/// retry timer.
const MAX_IN_WORKER_ATTEMPTS: u32 = 3;

/// `min(1s * 2^(n-1), 10s)` between in-worker attempts.
fn backoff(attempt: u32) -> std::time::Duration {
    std::cmp::min(
        std::time::Duration::from_secs(1 << (attempt - 1)),
        std::time::Duration::from_secs(10),
    )
}

/// What one worker cycle decided about its task.
enum WorkerOutcome {
    /// Every selected target answered 2xx.
    Remove,
    /// The decision was empty (or the task vanished); nothing to apply.
    LeaveInPlace,
    /// Deliveries are still owed: persist the failed subset and come back
    /// after the retry delay.
    Requeue {
        failed: Vec<String>,
        attempts_made: u32,
        last_error: String,
    },
}

/// The dispatcher: a bounded pool of delivery workers fed by task ids.
pub struct Dispatcher {
    queue: std::sync::Arc<QueueManager>,
    router: Router,
    client: WebhookClient,
    scheduler: std::sync::Arc<Scheduler>,
    sender: tokio::sync::mpsc::UnboundedSender<String>,
    receiver: std::sync::Mutex<Option<tokio::sync::mpsc::UnboundedReceiver<String>>>,
    semaphore: std::sync::Arc<tokio::sync::Semaphore>,
    pending: std::sync::atomic::AtomicUsize,
    retry_delay: std::time::Duration,
    max_queue_size: usize,
}

impl Dispatcher {
    ///
    #[must_use]
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(
        queue: std::sync::Arc<QueueManager>,
        router: Router,
        client: WebhookClient,
        scheduler: std::sync::Arc<Scheduler>,
        concurrency: usize,
        retry_delay: std::time::Duration,
        max_queue_size: usize,
    ) -> std::sync::Arc<Self> {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();

        std::sync::Arc::new(Self {
            queue,
            router,
            client,
            scheduler,
            sender,
            receiver: std::sync::Mutex::new(Some(receiver)),
            semaphore: std::sync::Arc::new(tokio::sync::Semaphore::new(concurrency.max(1))),
            pending: std::sync::atomic::AtomicUsize::new(0),
            retry_delay,
            max_queue_size,
        })
    }

    /// Start consuming task ids. Call once.
    pub fn spawn(self: &std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mut receiver = self
            .receiver
            .lock()
            .expect("dispatcher poisoned")
            .take()
            .expect("dispatcher already spawned");

        let this = self.clone();
        tokio::spawn(async move {
            while let Some(id) = receiver.recv().await {
                let this = this.clone();
                tokio::spawn(async move {
                    this.clone().process(id).await;
                    this.pending
                        .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                });
            }
        })
    }

    /// Offer a task id to the pool. `false` when the in-memory backlog is
    /// at capacity: the caller rejects the message, the task stays durable.
    pub fn enqueue(&self, id: String) -> bool {
        if self.pending.load(std::sync::atomic::Ordering::SeqCst) >= self.max_queue_size {
            return false;
        }

        self.pending
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.sender.send(id).is_err() {
            self.pending
                .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Tasks currently queued or in flight; the shutdown path polls this.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Replay every id the durable queue holds, typically at startup.
    ///
    /// # Errors
    ///
    /// * the queue directory cannot be listed
    pub fn replay(&self) -> anyhow::Result<usize> {
        let ids = self.queue.list_ids()?;
        let count = ids.len();

        for id in ids {
            if !self.enqueue(id) {
                tracing::warn!("In-memory queue full during replay, remaining tasks stay durable.");
                break;
            }
        }

        Ok(count)
    }

    async fn process(self: std::sync::Arc<Self>, id: String) {
        let outcome = self.run_attempts(&id).await;

        match outcome {
            WorkerOutcome::LeaveInPlace => {}
            WorkerOutcome::Remove => {
                if let Err(error) = self.queue.remove(&id) {
                    tracing::warn!(%error, id, "Cannot remove delivered task.");
                }
            }
            WorkerOutcome::Requeue {
                failed,
                attempts_made,
                last_error,
            } => {
                let mut task = match self.queue.get(&id) {
                    Ok(task) => task,
                    Err(error) => {
                        tracing::warn!(%error, id, "Task vanished before requeue.");
                        return;
                    }
                };

                task.failed_webhooks = Some(failed);
                task.attempts += attempts_made;
                task.last_error = Some(last_error);

                if let Err(error) = self.queue.update(&mut task) {
                    tracing::error!(%error, "Cannot persist failed delivery state.");
                    return;
                }

                tracing::info!(
                    delay = ?self.retry_delay,
                    attempts = task.attempts,
                    "Scheduling deferred retry."
                );

                let this = self.clone();
                self.scheduler.after(self.retry_delay, move || async move {
                    if !this.enqueue(id) {
                        tracing::warn!("In-memory queue full, deferred task stays durable.");
                    }
                });
            }
        }
    }

    #[tracing::instrument(name = "delivery", skip_all, fields(id = %id))]
    async fn run_attempts(&self, id: &str) -> WorkerOutcome {
        // already removed by an earlier cycle: ack silently
        let Ok(task) = self.queue.get(id) else {
            tracing::debug!("Task no longer in the durable queue, nothing to do.");
            return WorkerOutcome::LeaveInPlace;
        };

        let mut targets = self.router.decide(&task.parsed);
        if targets.is_empty() {
            tracing::error!(
                "No webhook target for this email; task left in place for the operator."
            );
            return WorkerOutcome::LeaveInPlace;
        }

        // a previous partial failure restricts this cycle to what is owed
        if let Some(failed) = &task.failed_webhooks {
            targets.retain(|target| failed.contains(&target.webhook));
            if targets.is_empty() {
                tracing::info!(
                    "Previously failed webhooks all left the rule set, closing the task."
                );
                return WorkerOutcome::Remove;
            }
        }

        let email = match serde_json::to_value(&task.parsed) {
            Ok(email) => email,
            Err(error) => {
                tracing::error!(%error, "Unserializable task payload, leaving it in place.");
                return WorkerOutcome::LeaveInPlace;
            }
        };

        for attempt in 1..=MAX_IN_WORKER_ATTEMPTS {
            let outcomes = self.post_all(&targets, &email).await;
            let failed = outcomes
                .iter()
                .filter(|outcome| !outcome.success)
                .collect::<Vec<_>>();

            if failed.is_empty() {
                tracing::info!(targets = outcomes.len(), attempt, "Delivery complete.");
                return WorkerOutcome::Remove;
            }

            let last_error = failed
                .iter()
                .map(|outcome| {
                    format!(
                        "{}: {}",
                        outcome.webhook,
                        outcome.error.as_deref().unwrap_or("unknown error")
                    )
                })
                .collect::<Vec<_>>()
                .join("; ");

            // partial success: keep only the failed subset, the successful
            // targets must not be posted again
            if failed.len() < outcomes.len() {
                tracing::warn!(
                    failed = failed.len(),
                    total = outcomes.len(),
                    "Partial delivery, retaining the failed subset."
                );
                return WorkerOutcome::Requeue {
                    failed: failed
                        .iter()
                        .map(|outcome| outcome.webhook.clone())
                        .collect(),
                    attempts_made: attempt,
                    last_error,
                };
            }

            tracing::warn!(attempt, %last_error, "Every target failed.");

            if attempt == MAX_IN_WORKER_ATTEMPTS {
                return WorkerOutcome::Requeue {
                    failed: targets.iter().map(|target| target.webhook.clone()).collect(),
                    attempts_made: attempt,
                    last_error,
                };
            }

            tokio::time::sleep(backoff(attempt)).await;
        }

        unreachable!("the attempt loop always returns")
    }

    /// POST to every target in priority order, holding one concurrency
    /// permit for the duration of the batch. The permit is dropped before
    /// any backoff sleep.
    async fn post_all(
        &self,
        targets: &[Target],
        email: &serde_json::Value,
    ) -> Vec<DeliveryOutcome> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("dispatcher semaphore never closes");

        let mut outcomes = Vec::with_capacity(targets.len());
        for target in targets {
            let outcome = self.client.post(target, email).await;
            tracing::debug!(
                webhook = %outcome.webhook,
                status = outcome.status,
                success = outcome.success,
                "Webhook POST done."
            );
            outcomes.push(outcome);
        }
        outcomes
    }
}

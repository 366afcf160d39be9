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

/// Background timer capability: periodic jobs and one-shot delays, all of
/// them cancelled together on shutdown so no timer outlives the process
/// lifecycle.
#[derive(Default)]
pub struct Scheduler {
    handles: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Scheduler {
    ///
    #[must_use]
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    fn register(&self, handle: tokio::task::JoinHandle<()>) {
        let mut handles = self.handles.lock().expect("scheduler poisoned");
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Run `job` every `period`, first run one period from now.
    pub fn every<F, Fut>(&self, period: std::time::Duration, job: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.register(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // the first tick of a tokio interval fires immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                job().await;
            }
        }));
    }

    /// Run `job` once, `delay` from now.
    pub fn after<F, Fut>(&self, delay: std::time::Duration, job: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.register(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            job().await;
        }));
    }

    /// Abort every registered timer; called once by the shutdown path.
    pub fn cancel_all(&self) {
        let handles = std::mem::take(&mut *self.handles.lock().expect("scheduler poisoned"));
        tracing::debug!(count = handles.len(), "Cancelling background timers.");
        for handle in handles {
            handle.abort();
        }
    }
}

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
use anyhow::Context;
use std::os::unix::fs::OpenOptionsExt;
use vhook_common::{ParsedEmail, Task};

/// The on-disk task queue.
pub struct QueueManager {
    dirpath: std::path::PathBuf,
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("dirpath", &self.dirpath)
            .finish()
    }
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .expect("rfc3339 formatting of the current time cannot fail")
}

fn unix_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock set before the unix epoch")
        .as_millis()
}

impl QueueManager {
    /// Open (and create if needed) the queue directory, mode 0700.
    ///
    /// # Errors
    ///
    /// * the directory cannot be created
    pub fn init(dirpath: impl Into<std::path::PathBuf>) -> anyhow::Result<std::sync::Arc<Self>> {
        let dirpath = dirpath.into();

        if !dirpath.exists() {
            let mut builder = std::fs::DirBuilder::new();
            builder.recursive(true);
            std::os::unix::fs::DirBuilderExt::mode(&mut builder, 0o700);
            builder.create(&dirpath).with_context(|| {
                format!("could not create queue directory at `{}`", dirpath.display())
            })?;
        }

        Ok(std::sync::Arc::new(Self { dirpath }))
    }

    fn task_path(&self, id: &str) -> std::path::PathBuf {
        self.dirpath.join(format!("{id}.json"))
    }

    /// Write `task` under its final name through a temporary sibling, so a
    /// concurrent reader sees either the previous version or the new one.
    fn write_atomic(&self, task: &Task) -> anyhow::Result<()> {
        let final_path = self.task_path(&task.id);
        let tmp_path = self.dirpath.join(format!(".{}.json.tmp", task.id));

        {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .mode(0o600)
                .open(&tmp_path)
                .with_context(|| format!("cannot open `{}`", tmp_path.display()))?;

            std::io::Write::write_all(&mut file, serde_json::to_string(task)?.as_bytes())?;
            file.sync_all()
                .with_context(|| format!("cannot sync `{}`", tmp_path.display()))?;
        }

        std::fs::rename(&tmp_path, &final_path).with_context(|| {
            format!(
                "cannot rename `{}` to `{}`",
                tmp_path.display(),
                final_path.display()
            )
        })
    }

    /// Persist a new task for `parsed` and return it.
    ///
    /// # Errors
    ///
    /// * the task file cannot be written
    pub fn create(&self, parsed: ParsedEmail) -> anyhow::Result<Task> {
        let id = format!("{}-{:016x}", unix_millis(), rand::random::<u64>());
        let task = Task::new(id, now_rfc3339(), parsed);

        self.write_atomic(&task)?;
        tracing::debug!(id = %task.id, "Task persisted.");

        Ok(task)
    }

    /// Read one task back.
    ///
    /// # Errors
    ///
    /// * the task does not exist or cannot be deserialized
    pub fn get(&self, id: &str) -> anyhow::Result<Task> {
        let path = self.task_path(id);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read file '{}'", path.display()))?;

        serde_json::from_str::<Task>(&content)
            .with_context(|| format!("cannot deserialize: '{content:?}'"))
    }

    /// Persist the mutated state of a task, stamping `updated_at`.
    ///
    /// # Errors
    ///
    /// * the task file cannot be written
    pub fn update(&self, task: &mut Task) -> anyhow::Result<()> {
        task.updated_at = Some(now_rfc3339());
        self.write_atomic(task)?;
        tracing::debug!(id = %task.id, attempts = task.attempts, "Task updated.");
        Ok(())
    }

    /// Remove a delivered task.
    ///
    /// # Errors
    ///
    /// * the task file cannot be unlinked
    pub fn remove(&self, id: &str) -> anyhow::Result<()> {
        let path = self.task_path(id);
        std::fs::remove_file(&path)
            .with_context(|| format!("failed to remove `{}`", path.display()))?;

        tracing::debug!(id, "Task removed.");
        Ok(())
    }

    /// Does the task still exist ?
    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.task_path(id).exists()
    }

    /// All pending task ids, sorted lexicographically, which given the id
    /// format approximates FIFO on the creation timestamp.
    ///
    /// # Errors
    ///
    /// * the queue directory cannot be listed
    pub fn list_ids(&self) -> anyhow::Result<Vec<String>> {
        let mut ids = self
            .dirpath
            .read_dir()
            .with_context(|| format!("error from read dir '{}'", self.dirpath.display()))?
            .filter_map(|entry| {
                let name = entry.ok()?.file_name().to_str()?.to_string();
                name.strip_suffix(".json")
                    .filter(|id| !id.starts_with('.'))
                    .map(str::to_string)
            })
            .collect::<Vec<_>>();

        ids.sort_unstable();
        Ok(ids)
    }
}

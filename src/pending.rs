//! Correlation and timeout table for outstanding commands.
//!
//! Every command sent on the wire has exactly one live [`PendingEntry`]
//! here until it is consumed by a matching reply, by its timeout firing,
//! or by client shutdown. The receive loop and the timer tasks race for
//! the same cookies; the single map lock is the only synchronization
//! point, and removal under it is what makes resolution exactly-once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::callback::{AppData, CommandListener, CommandOutcome};
use crate::command::Command;
use crate::error::{Error, Result};

/// Bookkeeping record for one outstanding command.
pub struct PendingEntry {
    pub command: Command,
    app_data: AppData,
    listener: Arc<dyn CommandListener>,
    timeout_task: Option<JoinHandle<()>>,
    registered_at: Instant,
}

impl PendingEntry {
    /// Consumes the entry, cancelling its timer and firing the listener.
    ///
    /// The entry has already been removed from the table when this runs,
    /// so the listener fires at most once per cookie.
    pub(crate) fn complete(mut self, outcome: CommandOutcome) {
        if let Some(task) = self.timeout_task.take() {
            task.abort();
        }
        self.listener.on_result(self.app_data.take(), outcome);
    }

    pub fn elapsed(&self) -> Duration {
        self.registered_at.elapsed()
    }
}

/// The correlation table. Cheap to clone; clones share the same map.
#[derive(Clone)]
pub struct PendingTable {
    entries: Arc<Mutex<HashMap<String, PendingEntry>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        PendingTable {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Inserts a pending entry for `command` and arms its timeout.
    ///
    /// Fails with [`Error::DuplicateCookie`] if the cookie is already
    /// outstanding; cookie allocation makes that a programming error, not
    /// a runtime condition.
    pub fn register(
        &self,
        command: Command,
        app_data: AppData,
        listener: Arc<dyn CommandListener>,
        timeout: Duration,
    ) -> Result<()> {
        let cookie = command.cookie.clone();

        {
            let mut entries = self.entries.lock();
            if entries.contains_key(&cookie) {
                warn!("Cookie {} registered twice", cookie);
                return Err(Error::DuplicateCookie(cookie));
            }
            entries.insert(
                cookie.clone(),
                PendingEntry {
                    command,
                    app_data,
                    listener,
                    timeout_task: None,
                    registered_at: Instant::now(),
                },
            );
        }

        let table = self.clone();
        let timer_cookie = cookie.clone();
        let task = tokio::spawn(async move {
            sleep(timeout).await;
            table.expire(&timer_cookie);
        });

        // The entry went in before the timer existed; attach the handle
        // under the lock, and if the entry was already claimed in the
        // meantime the fresh timer has nothing to guard.
        let mut entries = self.entries.lock();
        match entries.get_mut(&cookie) {
            Some(entry) => entry.timeout_task = Some(task),
            None => task.abort(),
        }

        Ok(())
    }

    /// Atomically removes and returns the entry for `cookie`, cancelling
    /// its timer. `None` means the cookie is unknown (already resolved,
    /// already expired, or never registered) and is a normal race outcome.
    pub fn resolve(&self, cookie: &str) -> Option<PendingEntry> {
        let mut entry = self.entries.lock().remove(cookie)?;
        if let Some(task) = entry.timeout_task.take() {
            task.abort();
        }
        Some(entry)
    }

    // Timer path: remove-if-present, then fail the command. Mutually
    // exclusive with resolve() by the map lock.
    fn expire(&self, cookie: &str) {
        let entry = {
            let mut entries = self.entries.lock();
            entries.remove(cookie)
        };

        match entry {
            Some(mut entry) => {
                // This task is the entry's own timer; dropping the handle
                // instead of aborting lets the callback below run.
                entry.timeout_task.take();
                debug!(
                    "Command {} timed out after {:?}",
                    cookie,
                    entry.elapsed()
                );
                entry.complete(CommandOutcome::Timeout);
            }
            None => {
                // The reply won the race; nothing to do.
            }
        }
    }

    /// Drains every still-pending entry and fails it with `outcome`.
    /// Used at shutdown so no callback is silently dropped.
    pub fn fail_all(&self, outcome: CommandOutcome) {
        let drained: Vec<(String, PendingEntry)> = {
            let mut entries = self.entries.lock();
            entries.drain().collect()
        };

        for (cookie, entry) in drained {
            debug!("Failing pending command {}: {:?}", cookie, outcome);
            entry.complete(outcome.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn contains(&self, cookie: &str) -> bool {
        self.entries.lock().contains_key(cookie)
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

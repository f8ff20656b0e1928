//! Master lock keeper: a background actor maintaining a single boolean,
//! "does this node hold the cluster-wide lock?".

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Notify;

use crate::repository::{Repository, MASTER_LOCK_NAME};

/// How often the keeper attempts lock operations. With a 5-minute validity
/// window this yields four renewal opportunities before the lease expires.
pub(crate) const LOCK_KEEPER_INTERVAL: Duration = Duration::from_secs(60);

/// Read-only view of the keeper's published state.
///
/// This is the only capability task runners get; they never see the
/// registry or the keeper itself.
#[derive(Clone, Default)]
pub(crate) struct MasterSignal {
    held: Arc<AtomicBool>,
}

impl MasterSignal {
    pub(crate) fn has_lock(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    fn set(&self, held: bool) {
        self.held.store(held, Ordering::SeqCst);
    }
}

/// Wake handles of every registered task runner.
///
/// The keeper pokes all of them when the lock is won so runners sleeping
/// the long non-master sleep re-evaluate promptly.
#[derive(Default)]
pub(crate) struct WakeRoster {
    notifies: RwLock<Vec<Arc<Notify>>>,
}

impl WakeRoster {
    pub(crate) fn add(&self, notify: Arc<Notify>) {
        self.notifies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notify);
    }

    pub(crate) fn wake_all(&self) {
        let notifies = self.notifies.read().unwrap_or_else(PoisonError::into_inner);
        for notify in notifies.iter() {
            notify.notify_one();
        }
    }
}

/// Background actor that acquires and heartbeats the master lock row.
pub(crate) struct MasterLockKeeper {
    repository: Arc<dyn Repository>,
    node_name: String,
    signal: MasterSignal,
    roster: Arc<WakeRoster>,
    stop: AtomicBool,
    stop_notify: Notify,
}

impl MasterLockKeeper {
    pub(crate) fn new(
        repository: Arc<dyn Repository>,
        node_name: String,
        signal: MasterSignal,
        roster: Arc<WakeRoster>,
    ) -> Self {
        Self {
            repository,
            node_name,
            signal,
            roster,
            stop: AtomicBool::new(false),
            stop_notify: Notify::new(),
        }
    }

    /// Keeper loop. The first acquisition attempt happens before this is
    /// spawned (see `Registry::start`), so the loop always sleeps first.
    pub(crate) async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.stop_notify.notified() => {}
                _ = tokio::time::sleep(LOCK_KEEPER_INTERVAL) => {}
            }
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            self.tick(Utc::now()).await;
        }

        if let Err(error) = self
            .repository
            .release_lock(MASTER_LOCK_NAME, &self.node_name)
            .await
        {
            tracing::warn!(node = %self.node_name, error = %error, "failed to release master lock on shutdown");
        }
        self.signal.set(false);
        tracing::info!(node = %self.node_name, "master lock keeper stopped");
    }

    /// One lock-protocol step at `now`: renew while holding, otherwise try
    /// to claim. A repository error while holding counts as a lost lock.
    pub(crate) async fn tick(&self, now: DateTime<Utc>) {
        if self.signal.has_lock() {
            match self
                .repository
                .keep_lock(MASTER_LOCK_NAME, &self.node_name, now)
                .await
            {
                Ok(true) => {
                    tracing::debug!(node = %self.node_name, "renewed master lock");
                }
                Ok(false) => {
                    tracing::warn!(node = %self.node_name, "lost the master lock");
                    self.signal.set(false);
                }
                Err(error) => {
                    tracing::warn!(node = %self.node_name, error = %error, "failed to renew master lock, assuming lost");
                    self.signal.set(false);
                }
            }
        } else {
            match self
                .repository
                .try_acquire_lock(MASTER_LOCK_NAME, &self.node_name, now)
                .await
            {
                Ok(true) => {
                    tracing::info!(node = %self.node_name, "acquired master lock, waking task runners");
                    self.signal.set(true);
                    self.roster.wake_all();
                }
                Ok(false) => {
                    tracing::debug!(node = %self.node_name, "master lock held elsewhere");
                }
                Err(error) => {
                    tracing::warn!(node = %self.node_name, error = %error, "failed to acquire master lock");
                }
            }
        }
    }

    pub(crate) fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.stop_notify.notify_one();
    }
}

//! Query admission control
//!
//! Bounds the number of concurrent store scans with a counting semaphore and
//! keeps a directory of registered queries for introspection. Identical
//! queries (same [`QueryHash`]) are not coalesced: each one takes its own
//! permit and runs its own scan, and the overlap is only counted as a
//! collision.
//!
//! ```text
//! wait_for_slot(hash)
//!   register (collision++ if hash present) → waiting++ → acquire permit
//!   → waiting-- → mark Running → QuerySlot
//!
//! QuerySlot dropped / done(hash)
//!   unregister → permit released
//! ```

use crate::query::descriptor::{QueryDescriptor, QueryHash};
use crate::query::error::{QueryError, QueryResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

/// Cooperative cancellation flag shared between the controller and a scan
#[derive(Debug, Clone, Default)]
pub struct KillSignal(Arc<AtomicBool>);

impl KillSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kill(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_killed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lifecycle of a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Waiting,
    Running,
}

/// Introspection entry for one registered query
#[derive(Debug, Clone, Serialize)]
pub struct RunningQuery {
    pub hash: QueryHash,
    pub descriptor: QueryDescriptor,
    pub state: SlotState,
    pub registered_at: DateTime<Utc>,
}

struct Registration {
    id: u64,
    descriptor: QueryDescriptor,
    state: SlotState,
    registered_at: DateTime<Utc>,
    kill: KillSignal,
    /// Held while running; dropping the registration frees the permit
    permit: Option<OwnedSemaphorePermit>,
}

struct Inner {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    registrations: Mutex<HashMap<QueryHash, Vec<Registration>>>,
    waiting: AtomicUsize,
    collisions: AtomicU64,
    next_id: AtomicU64,
}

impl Inner {
    fn registrations(&self) -> MutexGuard<'_, HashMap<QueryHash, Vec<Registration>>> {
        self.registrations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Remove the registration `id`; returns whether it was present
    fn unregister(&self, hash: &QueryHash, id: u64) -> bool {
        let removed = {
            let mut registrations = self.registrations();
            let Some(entries) = registrations.get_mut(hash) else {
                return false;
            };
            let removed = entries
                .iter()
                .position(|r| r.id == id)
                .map(|pos| entries.remove(pos));
            if entries.is_empty() {
                registrations.remove(hash);
            }
            removed
        };
        // Permit (if any) is released here, outside the lock
        removed.is_some()
    }
}

/// Bounds concurrent scans and tracks in-flight queries
#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<Inner>,
}

impl AdmissionController {
    /// Create a controller allowing `max_concurrent` scans at once
    pub fn new(max_concurrent: usize) -> QueryResult<Self> {
        if max_concurrent == 0 {
            return Err(QueryError::Config(
                "max_concurrent_queries must be greater than zero".into(),
            ));
        }

        Ok(Self {
            inner: Arc::new(Inner {
                semaphore: Arc::new(Semaphore::new(max_concurrent)),
                max_concurrent,
                registrations: Mutex::new(HashMap::new()),
                waiting: AtomicUsize::new(0),
                collisions: AtomicU64::new(0),
                next_id: AtomicU64::new(0),
            }),
        })
    }

    /// Register the query and wait until a permit is free
    ///
    /// The returned slot releases its permit when dropped. If this future is
    /// dropped while waiting, the registration is removed again.
    pub async fn wait_for_slot(
        &self,
        hash: QueryHash,
        descriptor: QueryDescriptor,
    ) -> QueryResult<QuerySlot> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let kill = KillSignal::new();

        {
            let mut registrations = self.inner.registrations();
            let entries = registrations.entry(hash.clone()).or_default();
            if !entries.is_empty() {
                let total = self.inner.collisions.fetch_add(1, Ordering::SeqCst) + 1;
                info!(hash = %hash, in_flight = entries.len(), collisions = total, "Query hash collision");
            }
            entries.push(Registration {
                id,
                descriptor,
                state: SlotState::Waiting,
                registered_at: Utc::now(),
                kill: kill.clone(),
                permit: None,
            });
        }

        self.inner.waiting.fetch_add(1, Ordering::SeqCst);
        let mut pending = PendingRegistration {
            inner: &self.inner,
            hash: &hash,
            id,
            waiting: true,
            armed: true,
        };

        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| QueryError::Execution("admission semaphore closed".into()))?;

        self.inner.waiting.fetch_sub(1, Ordering::SeqCst);
        pending.waiting = false;

        {
            let mut registrations = self.inner.registrations();
            let registration = registrations
                .get_mut(&hash)
                .and_then(|entries| entries.iter_mut().find(|r| r.id == id))
                .ok_or_else(|| {
                    QueryError::Execution(format!("registration for {} disappeared", hash))
                })?;
            registration.state = SlotState::Running;
            registration.permit = Some(permit);
        }
        pending.armed = false;
        drop(pending);

        info!(hash = %hash, waiting = self.waiting_count(), "Query admitted");
        Ok(QuerySlot {
            inner: Arc::clone(&self.inner),
            hash,
            id,
            kill,
            released: false,
        })
    }

    /// Release one running registration of `hash`
    ///
    /// For callers managing registrations by hash. Returns false if no
    /// running query has this hash.
    pub fn done(&self, hash: &QueryHash) -> bool {
        let id = {
            let registrations = self.inner.registrations();
            registrations.get(hash).and_then(|entries| {
                entries
                    .iter()
                    .find(|r| r.state == SlotState::Running)
                    .map(|r| r.id)
            })
        };

        match id {
            Some(id) => {
                let released = self.inner.unregister(hash, id);
                debug!(hash = %hash, "Released query slot");
                released
            }
            None => false,
        }
    }

    /// Every registered query, waiting or running, oldest first
    pub fn get_running_queries(&self) -> Vec<RunningQuery> {
        let registrations = self.inner.registrations();
        let mut queries: Vec<(u64, RunningQuery)> = registrations
            .iter()
            .flat_map(|(hash, entries)| {
                entries.iter().map(move |r| {
                    (
                        r.id,
                        RunningQuery {
                            hash: hash.clone(),
                            descriptor: r.descriptor.clone(),
                            state: r.state,
                            registered_at: r.registered_at,
                        },
                    )
                })
            })
            .collect();
        queries.sort_by_key(|(id, _)| *id);
        queries.into_iter().map(|(_, q)| q).collect()
    }

    /// Callers currently blocked waiting for a permit
    pub fn waiting_count(&self) -> usize {
        self.inner.waiting.load(Ordering::SeqCst)
    }

    /// Registrations that found their hash already in flight
    pub fn collision_count(&self) -> u64 {
        self.inner.collisions.load(Ordering::SeqCst)
    }

    /// Queries currently holding a permit
    pub fn running_count(&self) -> usize {
        self.inner
            .registrations()
            .values()
            .flatten()
            .filter(|r| r.state == SlotState::Running)
            .count()
    }

    pub fn available_permits(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// Signal every running query with this hash to stop
    ///
    /// Cancellation is cooperative: the scan observes the flag on its own.
    /// Returns how many queries were signalled.
    pub fn kill_by_hash(&self, hash: &QueryHash) -> usize {
        let registrations = self.inner.registrations();
        let killed = registrations.get(hash).map_or(0, |entries| {
            entries
                .iter()
                .filter(|r| r.state == SlotState::Running)
                .inspect(|r| r.kill.kill())
                .count()
        });
        info!(hash = %hash, killed, "Kill requested");
        killed
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("max_concurrent", &self.inner.max_concurrent)
            .field("available_permits", &self.available_permits())
            .field("waiting", &self.waiting_count())
            .field("collisions", &self.collision_count())
            .finish()
    }
}

/// Undoes a registration if `wait_for_slot` does not complete
struct PendingRegistration<'a> {
    inner: &'a Inner,
    hash: &'a QueryHash,
    id: u64,
    waiting: bool,
    armed: bool,
}

impl Drop for PendingRegistration<'_> {
    fn drop(&mut self) {
        if self.waiting {
            self.inner.waiting.fetch_sub(1, Ordering::SeqCst);
        }
        if self.armed {
            self.inner.unregister(self.hash, self.id);
            debug!(hash = %self.hash, "Abandoned wait for query slot");
        }
    }
}

/// An admitted query's permit
///
/// Dropping the slot releases the permit and removes the registration.
pub struct QuerySlot {
    inner: Arc<Inner>,
    hash: QueryHash,
    id: u64,
    kill: KillSignal,
    released: bool,
}

impl QuerySlot {
    pub fn hash(&self) -> &QueryHash {
        &self.hash
    }

    pub fn kill_signal(&self) -> &KillSignal {
        &self.kill
    }

    pub fn is_killed(&self) -> bool {
        self.kill.is_killed()
    }

    /// Release the permit now. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if self.inner.unregister(&self.hash, self.id) {
            debug!(hash = %self.hash, "Released query slot");
        }
    }
}

impl Drop for QuerySlot {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for QuerySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySlot")
            .field("hash", &self.hash)
            .field("killed", &self.kill.is_killed())
            .field("released", &self.released)
            .finish()
    }
}

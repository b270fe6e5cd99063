//! Connection admission
//!
//! One [`ConnectionPool`] per host bounds concurrent requests to that host,
//! and a global ceiling bounds the total. Blocked requests wait in a single
//! queue ordered by priority then arrival. Releasing a permit hands the freed
//! slot directly to the first eligible waiter, so there is no polling.
//!
//! Every capacity check and the matching counter increment happen under the
//! same lock.

use super::types::Priority;
use crate::core::clock::SharedClock;
use crate::core::error::NetworkError;
use crate::metrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// Per-host connection accounting
///
/// Created lazily on the first request to a host and kept for the lifetime of
/// the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionPool {
    pub host: String,
    pub max_connections: usize,
    pub current_connections: usize,
    /// Epoch milliseconds of the last admit or release
    pub last_used_at: Option<u64>,
}

impl ConnectionPool {
    fn has_capacity(&self) -> bool {
        self.current_connections < self.max_connections
    }
}

type WaitKey = (Priority, u64);

struct Waiter {
    host: String,
    tx: oneshot::Sender<()>,
}

struct AdmissionState {
    pools: HashMap<String, ConnectionPool>,
    waiters: BTreeMap<WaitKey, Waiter>,
    in_flight: usize,
    next_seq: u64,
    max_per_host: usize,
    max_total: usize,
}

impl AdmissionState {
    fn pool_mut(&mut self, host: &str) -> &mut ConnectionPool {
        let max_connections = self.max_per_host;
        self.pools
            .entry(host.to_string())
            .or_insert_with(|| ConnectionPool {
                host: host.to_string(),
                max_connections,
                current_connections: 0,
                last_used_at: None,
            })
    }

    fn release(&mut self, host: &str, now: u64) {
        if let Some(pool) = self.pools.get_mut(host) {
            pool.current_connections = pool.current_connections.saturating_sub(1);
            pool.last_used_at = Some(now);
        }
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Admit waiters in queue order while capacity allows
    ///
    /// A waiter whose host is saturated is skipped, so a busy host never
    /// blocks requests to other hosts behind it.
    fn dispatch(&mut self, now: u64) {
        while self.in_flight < self.max_total {
            let next = self
                .waiters
                .iter()
                .find(|(_, waiter)| {
                    self.pools
                        .get(&waiter.host)
                        .is_some_and(ConnectionPool::has_capacity)
                })
                .map(|(key, _)| *key);
            let Some(key) = next else { break };
            let Some(waiter) = self.waiters.remove(&key) else {
                break;
            };

            if waiter.tx.send(()).is_err() {
                // Receiver already gone; the slot stays free
                continue;
            }
            let pool = self.pool_mut(&waiter.host);
            pool.current_connections += 1;
            pool.last_used_at = Some(now);
            self.in_flight += 1;
        }
        metrics::update_admission(self.in_flight, self.waiters.len());
    }
}

/// Admits requests under per-host and global concurrency limits
pub struct AdmissionController {
    state: Mutex<AdmissionState>,
    clock: SharedClock,
}

impl AdmissionController {
    pub fn new(max_per_host: usize, max_total: usize, clock: SharedClock) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(AdmissionState {
                pools: HashMap::new(),
                waiters: BTreeMap::new(),
                in_flight: 0,
                next_seq: 0,
                max_per_host,
                max_total,
            }),
            clock,
        })
    }

    /// Change limits; queued waiters are admitted if the limits grew
    pub fn set_limits(&self, max_per_host: usize, max_total: usize) {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        state.max_per_host = max_per_host;
        state.max_total = max_total;
        for pool in state.pools.values_mut() {
            pool.max_connections = max_per_host;
        }
        state.dispatch(now);
    }

    /// Wait for a slot on `host`
    ///
    /// Dropping the returned future before it resolves withdraws the request
    /// from the queue, or gives back the slot if it was already granted.
    pub async fn acquire(
        self: &Arc<Self>,
        host: &str,
        priority: Priority,
    ) -> Result<ConnectionPermit, NetworkError> {
        let (tx, rx) = oneshot::channel();
        let key = {
            let now = self.clock.now_ms();
            let mut state = self.state.lock();
            state.pool_mut(host);
            let key = (priority, state.next_seq);
            state.next_seq += 1;
            state.waiters.insert(
                key,
                Waiter {
                    host: host.to_string(),
                    tx,
                },
            );
            state.dispatch(now);
            key
        };

        let pending = PendingAdmission {
            controller: Arc::clone(self),
            host: host.to_string(),
            key,
            rx,
            settled: false,
        };
        pending.wait().await
    }

    /// Snapshot of every pool, sorted by host
    pub fn pool_stats(&self) -> Vec<ConnectionPool> {
        let state = self.state.lock();
        let mut pools: Vec<_> = state.pools.values().cloned().collect();
        pools.sort_by(|a, b| a.host.cmp(&b.host));
        pools
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    pub fn queued(&self) -> usize {
        self.state.lock().waiters.len()
    }

    fn release(&self, host: &str) {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        state.release(host, now);
        state.dispatch(now);
    }
}

/// A request waiting in the admission queue
struct PendingAdmission {
    controller: Arc<AdmissionController>,
    host: String,
    key: WaitKey,
    rx: oneshot::Receiver<()>,
    settled: bool,
}

impl PendingAdmission {
    async fn wait(mut self) -> Result<ConnectionPermit, NetworkError> {
        match (&mut self.rx).await {
            Ok(()) => {
                self.settled = true;
                debug!("Admitted request to {}", self.host);
                Ok(ConnectionPermit {
                    controller: Arc::clone(&self.controller),
                    host: self.host.clone(),
                })
            }
            Err(_) => {
                // Sender dropped without granting a slot
                self.settled = true;
                Err(NetworkError::Internal(format!(
                    "admission for {} was abandoned",
                    self.host
                )))
            }
        }
    }
}

impl Drop for PendingAdmission {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let now = self.controller.clock.now_ms();
        let mut state = self.controller.state.lock();
        if state.waiters.remove(&self.key).is_none() {
            // Slot was granted but never claimed
            state.release(&self.host, now);
        }
        state.dispatch(now);
    }
}

/// An admitted request; the slot is released on drop
pub struct ConnectionPermit {
    controller: Arc<AdmissionController>,
    host: String,
}

impl ConnectionPermit {
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.controller.release(&self.host);
    }
}

// Session Pool
//
// Leases and reuses authenticated remote sessions keyed by host identity.
// Bounded per identity, with idle eviction by a background sweeper.

use crate::config::PoolConfig;
use crate::error::{Result, TransferError};
use crate::remote::identity::{AuthMethod, HostIdentity, PoolKey};
use crate::remote::{ConnectParams, RemoteConnector, RemoteSession};
use crate::transfer::types::{current_timestamp, Timestamp};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Capacity of the per-entry operation ring buffer
const EVENT_RING_CAPACITY: usize = 32;

/// Operation recorded against a pool entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolEventKind {
    /// New session established
    Create,
    /// First lease of a fresh entry
    Acquire,
    /// Idle entry handed out again
    Reuse,
    /// Entry returned to idle
    Release,
}

/// One entry of the bounded per-entry operation log
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolEvent {
    pub kind: PoolEventKind,
    pub at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryStatus {
    Idle,
    Leased,
}

struct PoolEntry {
    id: Uuid,
    session: Arc<dyn RemoteSession>,
    status: EntryStatus,
    last_used: Instant,
    lease_count: u64,
    events: VecDeque<PoolEvent>,
}

impl PoolEntry {
    fn new(session: Arc<dyn RemoteSession>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session,
            status: EntryStatus::Idle,
            last_used: Instant::now(),
            lease_count: 0,
            events: VecDeque::with_capacity(EVENT_RING_CAPACITY),
        }
    }

    fn push_event(&mut self, kind: PoolEventKind) {
        if self.events.len() == EVENT_RING_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(PoolEvent {
            kind,
            at: current_timestamp(),
        });
    }
}

/// Diagnostic snapshot of one pool entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEntrySnapshot {
    pub id: Uuid,
    pub leased: bool,
    pub lease_count: u64,
    pub idle_secs: u64,
    pub events: Vec<PoolEvent>,
}

/// Aggregate pool statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolStats {
    pub hosts: usize,
    pub total_entries: usize,
    pub idle: usize,
    pub leased: usize,
}

/// A leased session. Exclusively owned until handed back with
/// [`SessionPool::release`] or [`SessionPool::discard`].
pub struct SessionLease {
    entry_id: Uuid,
    pub key: PoolKey,
    pub session: Arc<dyn RemoteSession>,
}

struct PoolState {
    entries: HashMap<PoolKey, Vec<PoolEntry>>,
    /// In-flight connection attempts, counted against the per-key budget
    connecting: HashMap<PoolKey, usize>,
}

/// Session pool with per-identity connection bounds and idle reaping
pub struct SessionPool {
    connector: Arc<dyn RemoteConnector>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    slot_freed: Notify,
    shutdown: CancellationToken,
}

impl SessionPool {
    pub fn new(connector: Arc<dyn RemoteConnector>, config: PoolConfig) -> Self {
        Self {
            connector,
            config,
            state: Mutex::new(PoolState {
                entries: HashMap::new(),
                connecting: HashMap::new(),
            }),
            slot_freed: Notify::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Lease a session for the given identity and credentials.
    ///
    /// Reuses an idle entry when one exists; dials a new session while the
    /// per-key budget allows; otherwise waits for a slot until the acquire
    /// timeout elapses and fails with `PoolExhausted`. Connect failures
    /// propagate without retry.
    pub async fn acquire(
        &self,
        identity: &HostIdentity,
        auth: &AuthMethod,
        params: &ConnectParams,
    ) -> Result<SessionLease> {
        let key = PoolKey::new(identity, auth);
        let started = Instant::now();
        let deadline = started + self.config.acquire_timeout();

        loop {
            if self.shutdown.is_cancelled() {
                return Err(TransferError::Connection {
                    host: key.label(),
                    reason: "pool is shut down".into(),
                });
            }

            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            // Idle hit: lease it again
            let entries = state.entries.entry(key.clone()).or_default();
            if let Some(entry) = entries
                .iter_mut()
                .find(|e| e.status == EntryStatus::Idle)
            {
                entry.status = EntryStatus::Leased;
                entry.lease_count += 1;
                entry.push_event(PoolEventKind::Reuse);
                debug!("pool: reusing session for {}", key.label());
                return Ok(SessionLease {
                    entry_id: entry.id,
                    key,
                    session: Arc::clone(&entry.session),
                });
            }

            // Budget available: dial a fresh session outside the lock
            let live = entries.len() + state.connecting.get(&key).copied().unwrap_or(0);
            if live < self.config.max_connections {
                *state.connecting.entry(key.clone()).or_insert(0) += 1;
                drop(guard);
                return self.connect_fresh(identity, auth, params, key).await;
            }

            // Register for a wakeup while still holding the lock so a
            // release between unlock and await cannot be missed.
            let notified = self.slot_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            drop(guard);

            let now = Instant::now();
            if now >= deadline {
                return Err(TransferError::PoolExhausted {
                    host: key.label(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return Err(TransferError::PoolExhausted {
                    host: key.label(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
        }
    }

    async fn connect_fresh(
        &self,
        identity: &HostIdentity,
        auth: &AuthMethod,
        params: &ConnectParams,
        key: PoolKey,
    ) -> Result<SessionLease> {
        let connected = self.connector.connect(identity, auth, params).await;

        let mut state = self.state.lock().await;
        if let Some(count) = state.connecting.get_mut(&key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.connecting.remove(&key);
            }
        }

        match connected {
            Ok(session) => {
                let mut entry = PoolEntry::new(Arc::clone(&session));
                entry.status = EntryStatus::Leased;
                entry.lease_count = 1;
                entry.push_event(PoolEventKind::Create);
                entry.push_event(PoolEventKind::Acquire);
                let lease = SessionLease {
                    entry_id: entry.id,
                    key: key.clone(),
                    session,
                };
                state.entries.entry(key.clone()).or_default().push(entry);
                info!("pool: created session for {}", key.label());
                Ok(lease)
            }
            Err(e) => {
                // The reserved slot is free again
                self.slot_freed.notify_waiters();
                warn!("pool: connect to {} failed: {}", key.label(), e);
                Err(e)
            }
        }
    }

    /// Return a lease to the pool. The underlying session stays open and
    /// becomes available for reuse.
    pub async fn release(&self, lease: SessionLease) {
        let found = {
            let mut state = self.state.lock().await;
            state
                .entries
                .get_mut(&lease.key)
                .and_then(|entries| entries.iter_mut().find(|e| e.id == lease.entry_id))
                .map(|entry| {
                    entry.status = EntryStatus::Idle;
                    entry.last_used = Instant::now();
                    entry.push_event(PoolEventKind::Release);
                })
                .is_some()
        };
        if found {
            debug!("pool: released session for {}", lease.key.label());
            self.slot_freed.notify_waiters();
        } else {
            // Entry was removed while leased (shutdown); close the orphan.
            Self::close_session(lease.session, &lease.key);
        }
    }

    /// Remove a lease whose session is broken. The entry leaves the pool and
    /// the session is closed, so the next acquire dials a fresh one.
    pub async fn discard(&self, lease: SessionLease) {
        {
            let mut state = self.state.lock().await;
            let now_empty = match state.entries.get_mut(&lease.key) {
                Some(entries) => {
                    entries.retain(|e| e.id != lease.entry_id);
                    entries.is_empty()
                }
                None => false,
            };
            if now_empty {
                state.entries.remove(&lease.key);
            }
        }
        warn!("pool: discarding broken session for {}", lease.key.label());
        Self::close_session(lease.session, &lease.key);
        self.slot_freed.notify_waiters();
    }

    /// Start the background sweeper that evicts idle entries past the idle
    /// timeout. Stops when the pool is shut down.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(pool.config.sweep_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = pool.shutdown.cancelled() => break,
                    _ = interval.tick() => pool.sweep_idle().await,
                }
            }
        })
    }

    /// Close and remove idle entries whose last use is older than the idle
    /// timeout. Leased entries are never touched.
    pub async fn sweep_idle(&self) {
        let idle_timeout = self.config.idle_timeout();
        let mut evicted = Vec::new();

        let mut state = self.state.lock().await;
        for (key, entries) in state.entries.iter_mut() {
            entries.retain(|entry| {
                let expired = entry.status == EntryStatus::Idle
                    && entry.last_used.elapsed() >= idle_timeout;
                if expired {
                    evicted.push((key.clone(), Arc::clone(&entry.session)));
                }
                !expired
            });
        }
        state.entries.retain(|_, entries| !entries.is_empty());
        drop(state);

        if !evicted.is_empty() {
            info!("pool: evicting {} idle session(s)", evicted.len());
            for (key, session) in evicted {
                Self::close_session(session, &key);
            }
            self.slot_freed.notify_waiters();
        }
    }

    /// Close every session and stop the sweeper. Acquires fail afterwards.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut state = self.state.lock().await;
        let entries = std::mem::take(&mut state.entries);
        drop(state);

        for (key, list) in entries {
            for entry in list {
                Self::close_session(entry.session, &key);
            }
        }
        self.slot_freed.notify_waiters();
    }

    /// Aggregate counts across all identities
    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        let mut stats = PoolStats {
            hosts: state.entries.len(),
            ..Default::default()
        };
        for entries in state.entries.values() {
            for entry in entries {
                stats.total_entries += 1;
                match entry.status {
                    EntryStatus::Idle => stats.idle += 1,
                    EntryStatus::Leased => stats.leased += 1,
                }
            }
        }
        stats
    }

    /// Diagnostic snapshots (including the operation ring) for one identity
    pub async fn entries_for(&self, key: &PoolKey) -> Vec<PoolEntrySnapshot> {
        let state = self.state.lock().await;
        state
            .entries
            .get(key)
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| PoolEntrySnapshot {
                        id: e.id,
                        leased: e.status == EntryStatus::Leased,
                        lease_count: e.lease_count,
                        idle_secs: e.last_used.elapsed().as_secs(),
                        events: e.events.iter().copied().collect(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn close_session(session: Arc<dyn RemoteSession>, key: &PoolKey) {
        let label = key.label();
        tokio::spawn(async move {
            if let Err(e) = session.close().await {
                debug!("pool: close for {} failed: {}", label, e);
            }
        });
    }
}

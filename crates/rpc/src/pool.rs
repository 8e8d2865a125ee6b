//! Session pool: the single source of truth mapping peers to sessions.
//!
//! # Creation Dedup
//!
//! Each peer maps to a [`PoolEntry`] holding a `OnceCell`. Looking the entry
//! up (or inserting an empty one) is the only step done under the map's
//! lock; the dial happens inside `OnceCell::get_or_try_init`, outside any
//! lock. Concurrent demanders for the same peer wait on the same cell, so
//! exactly one of them dials. If that dial fails the cell stays empty and the
//! next waiter becomes the creator.
//!
//! # Eviction
//!
//! Entries are removed by identity (`Arc::ptr_eq`), never by key alone, so
//! evicting a stale session can never knock out a fresh one that a
//! concurrent caller already installed. A getter that finishes creating a
//! session for an entry that was removed in the meantime closes it and
//! starts over; an evicted session is never handed out.

use crate::config::PoolConfig;
use crate::dialer::{Connection, Dialer, TcpDialer};
use crate::error::{Result, RpcError};
use crate::session::Session;
use corelib::{NodeId, RouteTable};
use dashmap::DashMap;
use metrics::counter;
use std::sync::{Arc, OnceLock};
use streaming::MuxStream;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

/// Registry slot for one peer.
#[derive(Default)]
struct PoolEntry {
    session: OnceCell<Arc<Session>>,
}

impl PoolEntry {
    fn ready(session: Arc<Session>) -> Self {
        Self {
            session: OnceCell::new_with(Some(session)),
        }
    }

    fn close(&self) {
        if let Some(session) = self.session.get() {
            session.close();
        }
    }
}

/// A stream together with the session it came from.
pub(crate) struct Checkout {
    pub(crate) stream: MuxStream,
    pub(crate) session: Arc<Session>,
    /// True if the session was dialed (or redialed) by this checkout.
    pub(crate) fresh: bool,
}

/// Pool of multiplexed sessions keyed by peer.
pub struct SessionPool {
    sessions: DashMap<NodeId, Arc<PoolEntry>>,
    dialer: Arc<dyn Dialer>,
    config: PoolConfig,
}

static INSTANCE: OnceLock<Arc<SessionPool>> = OnceLock::new();

impl SessionPool {
    /// Create an empty pool bound to `dialer`.
    pub fn new<D: Dialer>(dialer: D) -> Self {
        Self::with_config(dialer, PoolConfig::default())
    }

    pub fn with_config<D: Dialer>(dialer: D, config: PoolConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            dialer: Arc::new(dialer),
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Process-wide pool.
    ///
    /// Built on first use with a [`TcpDialer`] resolving peers through
    /// [`RouteTable::global`]. Every call returns the same instance.
    pub fn instance() -> Arc<SessionPool> {
        Self::instance_with(|| TcpDialer::new(RouteTable::global()))
    }

    /// Process-wide pool, built with `make_dialer` if it does not exist yet.
    ///
    /// The dialer is fixed by whichever call constructs the pool first; later
    /// calls return that instance and never invoke `make_dialer`.
    pub fn instance_with<D, F>(make_dialer: F) -> Arc<SessionPool>
    where
        D: Dialer,
        F: FnOnce() -> D,
    {
        Arc::clone(INSTANCE.get_or_init(|| Arc::new(SessionPool::new(make_dialer()))))
    }

    /// Open a stream to `peer`, dialing a session first if needed.
    ///
    /// A cached session found broken is evicted and the operation retried
    /// once against a freshly dialed session.
    #[instrument(skip_all, fields(peer = %peer))]
    pub async fn get(&self, peer: &NodeId) -> Result<MuxStream> {
        self.checkout(peer).await.map(|checkout| checkout.stream)
    }

    pub(crate) async fn checkout(&self, peer: &NodeId) -> Result<Checkout> {
        let (session, fresh) = self.acquire(peer).await?;
        match session.open_stream().await {
            Ok(stream) => Ok(Checkout {
                stream,
                session,
                fresh,
            }),
            Err(err) if !fresh && session.is_broken() => {
                warn!(peer = %peer, error = %err, "cached session broken, redialing");
                self.evict(peer, &session);

                let (session, _) = self.acquire(peer).await?;
                let stream = session
                    .open_stream()
                    .await
                    .map_err(|err| RpcError::stream_open(peer, err))?;
                Ok(Checkout {
                    stream,
                    session,
                    fresh: true,
                })
            }
            Err(err) if session.is_broken() => {
                debug!(peer = %peer, error = %err, "fresh session broke before use");
                Err(RpcError::SessionBroken { peer: peer.clone() })
            }
            Err(err) => Err(RpcError::stream_open(peer, err)),
        }
    }

    /// Return the live session for `peer`, creating it if needed.
    ///
    /// The flag is true when this call performed the dial.
    async fn acquire(&self, peer: &NodeId) -> Result<(Arc<Session>, bool)> {
        loop {
            let entry = self.entry(peer);

            let mut dialed = false;
            let created = entry
                .session
                .get_or_try_init(|| {
                    dialed = true;
                    self.connect(peer)
                })
                .await;

            let session = match created {
                Ok(session) => Arc::clone(session),
                Err(err) => {
                    self.discard_if_abandoned(peer, &entry);
                    return Err(err);
                }
            };

            if !self.is_current(peer, &entry) {
                debug!(peer = %peer, "entry removed during creation, starting over");
                if dialed {
                    session.close();
                }
                continue;
            }

            if session.is_broken() {
                self.evict(peer, &session);
                if dialed {
                    return Err(RpcError::SessionBroken { peer: peer.clone() });
                }
                continue;
            }

            if !dialed {
                debug!(peer = %peer, "reusing session");
            }
            return Ok((session, dialed));
        }
    }

    async fn connect(&self, peer: &NodeId) -> Result<Arc<Session>> {
        counter!("rpc_pool_dials_total").increment(1);
        let conn = self
            .dialer
            .dial(peer)
            .await
            .map_err(|source| RpcError::Dial {
                peer: peer.clone(),
                source,
            })?;

        debug!(peer = %peer, "created session");
        Ok(Arc::new(Session::new(
            peer.clone(),
            conn,
            self.config.mux.clone(),
        )))
    }

    /// Install a session over an already established connection, bypassing
    /// the dialer.
    ///
    /// Returns `true` if an entry for `peer` already existed; its session is
    /// closed and replaced. Must be called from within a Tokio runtime.
    pub fn set<C: Connection>(&self, peer: NodeId, conn: C) -> bool {
        let session = Arc::new(Session::new(peer.clone(), conn, self.config.mux.clone()));
        let previous = self
            .sessions
            .insert(peer.clone(), Arc::new(PoolEntry::ready(session)));

        match previous {
            Some(old) => {
                debug!(peer = %peer, "replacing session");
                old.close();
                true
            }
            None => false,
        }
    }

    /// Close and forget the session for `peer`, if any.
    pub fn remove(&self, peer: &NodeId) {
        if let Some((_, entry)) = self.sessions.remove(peer) {
            debug!(peer = %peer, "removing session");
            entry.close();
        }
    }

    /// Close every session. The pool stays usable afterwards.
    pub fn close(&self) {
        let peers: Vec<NodeId> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for peer in peers {
            self.remove(&peer);
        }
    }

    /// Number of peers with a live session.
    ///
    /// Sessions that broke or were closed out of band are not counted, even
    /// while they still sit in the pool waiting for the next `get` to evict
    /// them.
    pub fn len(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .session
                    .get()
                    .map_or(false, |session| !session.is_broken())
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The session currently cached for `peer`, without opening a stream.
    pub fn cached_session(&self, peer: &NodeId) -> Option<Arc<Session>> {
        self.sessions
            .get(peer)
            .and_then(|entry| entry.value().session.get().cloned())
    }

    /// Evict `session` if it is still the one cached for `peer`, and close it.
    pub(crate) fn evict(&self, peer: &NodeId, session: &Arc<Session>) {
        let removed = self.sessions.remove_if(peer, |_, entry| {
            entry
                .session
                .get()
                .map_or(false, |cached| Arc::ptr_eq(cached, session))
        });
        session.close();

        if removed.is_some() {
            counter!("rpc_pool_evictions_total").increment(1);
            warn!(peer = %peer, "evicted broken session");
        }
    }

    fn entry(&self, peer: &NodeId) -> Arc<PoolEntry> {
        Arc::clone(
            self.sessions
                .entry(peer.clone())
                .or_insert_with(|| Arc::new(PoolEntry::default()))
                .value(),
        )
    }

    fn is_current(&self, peer: &NodeId, entry: &Arc<PoolEntry>) -> bool {
        self.sessions
            .get(peer)
            .map_or(false, |current| Arc::ptr_eq(current.value(), entry))
    }

    /// Drop an empty entry after a failed dial, unless other callers are
    /// still waiting on it.
    fn discard_if_abandoned(&self, peer: &NodeId, entry: &Arc<PoolEntry>) {
        // the map and this caller hold the only references; the shard lock
        // held by remove_if stops anyone else from cloning it meanwhile
        self.sessions.remove_if(peer, |_, current| {
            Arc::ptr_eq(current, entry)
                && !current.session.initialized()
                && Arc::strong_count(current) == 2
        });
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("sessions", &self.len())
            .field("config", &self.config)
            .finish()
    }
}

//! Session state: every declaration, subscription, queryable, and pending
//! query a session owns.
//!
//! # Concurrency note
//!
//! `SessionState` is a plain struct with no interior locking. The runtime
//! keeps it behind a single `tokio::sync::Mutex` shared by the API and the
//! reader task. Methods that would invoke user callbacks return
//! [`Invocation`]s instead, so the caller runs them after dropping the lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use keyspace_protocol::{
    intersect, ConsolidationMode, DeclKind, KeyExpr, Message, QueryableKind,
    ResKey, ResourceId, ResourceTable, SubInfo,
};
use tokio::sync::oneshot;

use crate::query::{PendingQuery, QueryEnd, QueryOutcome};
use crate::{
    DataCallback, Query, QueryCallback, ReplyCallback, Sample, SessionError,
};

/// A callback (or signal) to run once the state lock is released.
pub enum Invocation {
    /// Deliver a sample to a subscriber, unless it was undeclared meanwhile.
    Data {
        callback: DataCallback,
        sample: Sample,
        active: Arc<AtomicBool>,
    },
    /// Ask a local queryable for replies to a router query.
    Query {
        query_id: u64,
        callback: QueryCallback,
        query: Query,
    },
    /// Tell the router no more replies follow for `query_id`.
    ReplyFinal { query_id: u64 },
    /// Deliver one reply to a pending query's callback.
    Reply {
        callback: ReplyCallback,
        reply: crate::Reply,
    },
    /// Wake the caller waiting on a finalized query.
    Complete {
        signal: oneshot::Sender<QueryOutcome>,
        outcome: QueryOutcome,
    },
}

struct Subscription {
    pattern: KeyExpr,
    info: SubInfo,
    callback: DataCallback,
    active: Arc<AtomicBool>,
}

struct Queryable {
    pattern: KeyExpr,
    callback: QueryCallback,
}

/// Everything one session has declared, plus the router's resource ids.
pub struct SessionState {
    open: bool,
    /// Next id to issue. Starts at 1; `0` is reserved on the wire.
    next_id: ResourceId,
    /// Resources this session declared, id → path.
    local: ResourceTable,
    /// Compression index for outgoing keys, path → id.
    local_index: HashMap<String, ResourceId>,
    /// Resources the router declared, used when decoding.
    remote: ResourceTable,
    subscriptions: HashMap<ResourceId, Subscription>,
    queryables: HashMap<ResourceId, Queryable>,
    publishers: HashMap<ResourceId, KeyExpr>,
    queries: HashMap<u64, PendingQuery>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// Creates the state of a freshly opened session.
    pub fn new() -> Self {
        Self {
            open: true,
            next_id: 1,
            local: ResourceTable::new(),
            local_index: HashMap::new(),
            remote: ResourceTable::new(),
            subscriptions: HashMap::new(),
            queryables: HashMap::new(),
            publishers: HashMap::new(),
            queries: HashMap::new(),
        }
    }

    /// Returns `true` until the session is closed or its link is lost.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Fails with [`SessionError::SessionClosed`] once the session is down.
    pub fn ensure_open(&self) -> Result<(), SessionError> {
        if self.open {
            Ok(())
        } else {
            Err(SessionError::SessionClosed)
        }
    }

    fn issue_id(&mut self) -> Result<ResourceId, SessionError> {
        let id = self.next_id;
        self.next_id = id
            .checked_add(1)
            .ok_or(SessionError::IdsExhausted(id))?;
        Ok(id)
    }

    // -- Resources ---------------------------------------------------------

    /// Binds a fresh id to `path`.
    pub fn declare_resource(
        &mut self,
        path: &KeyExpr,
    ) -> Result<ResourceId, SessionError> {
        self.ensure_open()?;
        let id = self.issue_id()?;
        self.bind_local(id, path);
        Ok(id)
    }

    /// Binds a caller-chosen id to `path`.
    ///
    /// The id must not be bound and must not have been issued before, so an
    /// undeclared id can never come back with a different path. Later ids
    /// continue after it.
    pub fn declare_resource_with_id(
        &mut self,
        id: ResourceId,
        path: &KeyExpr,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        if id == 0 || id < self.next_id || self.local.contains(id) {
            return Err(SessionError::DuplicateDeclaration(id));
        }
        self.next_id =
            id.checked_add(1).ok_or(SessionError::IdsExhausted(id))?;
        self.bind_local(id, path);
        Ok(())
    }

    fn bind_local(&mut self, id: ResourceId, path: &KeyExpr) {
        self.local.insert(id, path.as_str());
        self.local_index.entry(path.to_string()).or_insert(id);
        tracing::debug!(id, path = %path, "resource declared");
    }

    /// Returns the path bound to a local resource id.
    pub fn resource_path(&self, id: ResourceId) -> Option<&str> {
        self.local.get(id)
    }

    /// Shortest wire form for `key`: a bound id, a bound id plus suffix, or
    /// the full name.
    pub fn compress(&self, key: &str) -> ResKey {
        if let Some(&id) = self.local_index.get(key) {
            return ResKey::Id(id);
        }
        // Longest declared prefix ending on a segment boundary.
        let mut best: Option<(ResourceId, usize)> = None;
        for (path, &id) in &self.local_index {
            let len = path.len();
            let boundary = key.len() > len
                && key.starts_with(path.as_str())
                && key.as_bytes()[len] == b'/';
            if boundary && best.is_none_or(|(_, l)| len > l) {
                best = Some((id, len));
            }
        }
        match best {
            Some((id, len)) => ResKey::with_suffix(id, &key[len..]),
            None => ResKey::Name(key.to_string()),
        }
    }

    /// The router's resource table, for decoding incoming frames.
    pub fn remote(&self) -> &ResourceTable {
        &self.remote
    }

    // -- Subscriptions, queryables, publishers -----------------------------

    /// Registers a subscription and returns its id.
    pub fn register_subscription(
        &mut self,
        pattern: KeyExpr,
        info: SubInfo,
        callback: DataCallback,
    ) -> Result<ResourceId, SessionError> {
        self.ensure_open()?;
        let id = self.issue_id()?;
        tracing::debug!(id, pattern = %pattern, "subscription registered");
        self.subscriptions.insert(
            id,
            Subscription {
                pattern,
                info,
                callback,
                active: Arc::new(AtomicBool::new(true)),
            },
        );
        Ok(id)
    }

    /// Registers a queryable and returns its id.
    pub fn register_queryable(
        &mut self,
        pattern: KeyExpr,
        kind: QueryableKind,
        callback: QueryCallback,
    ) -> Result<ResourceId, SessionError> {
        self.ensure_open()?;
        let id = self.issue_id()?;
        tracing::debug!(id, pattern = %pattern, ?kind, "queryable registered");
        self.queryables.insert(
            id,
            Queryable { pattern, callback },
        );
        Ok(id)
    }

    /// Registers a publisher on a concrete key and returns its id.
    pub fn register_publisher(
        &mut self,
        key: KeyExpr,
    ) -> Result<ResourceId, SessionError> {
        self.ensure_open()?;
        if key.is_wild() {
            return Err(SessionError::InvalidKeyExpr(key.into_string()));
        }
        let id = self.issue_id()?;
        self.publishers.insert(id, key);
        Ok(id)
    }

    /// Returns the key a publisher was declared on.
    pub fn publisher_key(&self, id: ResourceId) -> Option<&KeyExpr> {
        self.publishers.get(&id)
    }

    /// Returns the sub-info a subscription was declared with.
    pub fn subscription_info(&self, id: ResourceId) -> Option<SubInfo> {
        self.subscriptions.get(&id).map(|s| s.info)
    }

    /// Removes any declaration by id and reports what it was.
    ///
    /// A removed subscription is marked inactive at once, so a sample
    /// already handed to the reader is not delivered after this returns.
    pub fn unregister(
        &mut self,
        id: ResourceId,
    ) -> Result<DeclKind, SessionError> {
        self.ensure_open()?;
        if let Some(sub) = self.subscriptions.remove(&id) {
            sub.active.store(false, Ordering::Release);
            return Ok(DeclKind::Subscriber);
        }
        if self.queryables.remove(&id).is_some() {
            return Ok(DeclKind::Queryable);
        }
        if self.publishers.remove(&id).is_some() {
            return Ok(DeclKind::Publisher);
        }
        if let Some(path) = self.local.remove(id) {
            if self.local_index.get(&path) == Some(&id) {
                self.local_index.remove(&path);
                // Another id may still be bound to the same path.
                if let Some(other) = self.local.id_of(&path) {
                    self.local_index.insert(path, other);
                }
            }
            return Ok(DeclKind::Resource);
        }
        Err(SessionError::UnknownId(id))
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Number of live queryables.
    pub fn queryable_count(&self) -> usize {
        self.queryables.len()
    }

    /// Invocations delivering `sample` to matching local subscribers.
    pub fn local_matches(&self, sample: &Sample) -> Vec<Invocation> {
        self.subscriptions
            .values()
            .filter(|sub| intersect(sub.pattern.as_str(), &sample.key))
            .map(|sub| Invocation::Data {
                callback: sub.callback.clone(),
                sample: sample.clone(),
                active: sub.active.clone(),
            })
            .collect()
    }

    // -- Queries -----------------------------------------------------------

    /// Registers a pending query. The receiver resolves when it finalizes.
    pub fn register_query(
        &mut self,
        consolidation: ConsolidationMode,
        expected: Option<usize>,
        callback: ReplyCallback,
    ) -> Result<(u64, oneshot::Receiver<QueryOutcome>), SessionError> {
        self.ensure_open()?;
        let id = self.issue_id()?;
        let (query, rx) =
            PendingQuery::new(id, consolidation, expected, callback);
        self.queries.insert(id, query);
        Ok((id, rx))
    }

    /// Finalizes a pending query. Unknown ids (already finalized) yield
    /// nothing.
    pub fn finalize_query(&mut self, id: u64, end: QueryEnd) -> Vec<Invocation> {
        match self.queries.remove(&id) {
            Some(query) => query.finish(end),
            None => Vec::new(),
        }
    }

    /// Number of queries still collecting replies.
    pub fn pending_query_count(&self) -> usize {
        self.queries.len()
    }

    // -- Incoming messages ---------------------------------------------------

    /// Applies one decoded router message and returns the callbacks it
    /// triggers.
    pub fn resolve_incoming(&mut self, msg: Message) -> Vec<Invocation> {
        if !self.open {
            return Vec::new();
        }
        match msg {
            Message::Data {
                key,
                payload,
                encoding,
                kind,
            } => {
                let Some(key) = self.remote.resolve(&key) else {
                    tracing::debug!(%key, "data on unknown resource id dropped");
                    return Vec::new();
                };
                let sample = Sample {
                    key,
                    payload,
                    encoding,
                    kind,
                };
                let matches = self.local_matches(&sample);
                tracing::trace!(key = %sample.key, matches = matches.len(), "data routed");
                matches
            }

            Message::Query {
                id,
                key,
                predicate,
                target,
                consolidation,
            } => {
                let mut out = Vec::new();
                match self.remote.resolve(&key) {
                    Some(key) => {
                        let query = Query {
                            key,
                            predicate,
                            target,
                            consolidation,
                        };
                        for q in self.queryables.values() {
                            if intersect(q.pattern.as_str(), &query.key) {
                                out.push(Invocation::Query {
                                    query_id: id,
                                    callback: q.callback.clone(),
                                    query: query.clone(),
                                });
                            }
                        }
                    }
                    None => {
                        tracing::debug!(query_id = id, %key, "query on unknown resource id");
                    }
                }
                out.push(Invocation::ReplyFinal { query_id: id });
                out
            }

            Message::Reply {
                query_id,
                key,
                payload,
                encoding,
                kind,
            } => {
                let Some(query) = self.queries.get_mut(&query_id) else {
                    tracing::debug!(query_id, "late reply dropped");
                    return Vec::new();
                };
                let Some(key) = self.remote.resolve(&key) else {
                    tracing::debug!(query_id, %key, "reply on unknown resource id dropped");
                    return Vec::new();
                };
                let sample = Sample {
                    key,
                    payload,
                    encoding,
                    kind,
                };
                let mut out: Vec<Invocation> =
                    query.accept(sample).into_iter().collect();
                if query.is_satisfied() {
                    out.extend(self.finalize_query(query_id, QueryEnd::Completed));
                }
                out
            }

            Message::ReplyFinal { query_id } => {
                if !self.queries.contains_key(&query_id) {
                    tracing::debug!(query_id, "final for unknown query dropped");
                }
                self.finalize_query(query_id, QueryEnd::Completed)
            }

            Message::DeclareResource { id, key } => {
                match key.as_name() {
                    Some(_) if id == 0 => {
                        tracing::warn!(%key, "router declared the reserved id 0");
                    }
                    Some(path) => {
                        tracing::debug!(id, path, "router declared resource");
                        self.remote.insert(id, path);
                    }
                    None => {
                        tracing::warn!(id, %key, "router declared resource relative to unknown id");
                    }
                }
                Vec::new()
            }

            Message::Undeclare {
                kind: DeclKind::Resource,
                id,
            } => {
                self.remote.remove(id);
                Vec::new()
            }

            Message::Close { reason } => {
                tracing::warn!(%reason, "router closed the session");
                self.link_lost()
            }

            other => {
                tracing::debug!(kind = other.kind_name(), "unexpected message ignored");
                Vec::new()
            }
        }
    }

    // -- Teardown ------------------------------------------------------------

    /// Marks the session lost: pending queries fail with `LinkLost` and every
    /// subscription goes inactive.
    pub fn link_lost(&mut self) -> Vec<Invocation> {
        self.teardown(QueryEnd::LinkLost)
    }

    /// Closes the session: pending queries fail with `SessionClosed`.
    pub fn close(&mut self) -> Vec<Invocation> {
        self.teardown(QueryEnd::Closed)
    }

    fn teardown(&mut self, end: QueryEnd) -> Vec<Invocation> {
        if !self.open {
            return Vec::new();
        }
        self.open = false;
        for sub in self.subscriptions.values() {
            sub.active.store(false, Ordering::Release);
        }
        self.subscriptions.clear();
        self.queryables.clear();
        self.publishers.clear();
        self.local.clear();
        self.local_index.clear();
        self.remote.clear();
        let mut ids: Vec<u64> = self.queries.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .flat_map(|id| self.finalize_query(id, end))
            .collect()
    }
}

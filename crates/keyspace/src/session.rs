//! The [`Session`] handle: publish, subscribe, declare, and query.
//!
//! Every operation follows the same shape: take the state lock, update the
//! [`SessionState`], queue the outgoing message while still holding the lock,
//! release it, then run any local callbacks. Queuing under the lock is what
//! keeps a declaration ahead of every message that refers to its id.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use keyspace_protocol::{
    encode, ConsolidationMode, DeclKind, Encoding, KeyExpr, Message, PeerId,
    QueryTarget, QueryableKind, ResKey, ResourceId, SampleKind, SubInfo,
};
use keyspace_session::{
    Dispatcher, Query, QueryEnd, Reply, Sample, SessionError, SessionState,
};
use keyspace_transport::{Connection, LinkId, TransportError};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::handle::{Publisher, Queryable, Subscriber};
use crate::{runtime, Config, KeyspaceError};

/// Identity of both ends of an open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// This session's peer id.
    pub peer_id: PeerId,
    /// The router's peer id, from its `OpenAck`.
    pub router_id: PeerId,
    /// The link the session runs on.
    pub link: LinkId,
}

/// Options for [`Session::query_with`].
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Selector parameters passed to queryables as-is.
    pub predicate: String,
    pub target: QueryTarget,
    pub consolidation: ConsolidationMode,
    /// Deadline relative to the call. Defaults to `query_timeout_ms`.
    pub timeout: Option<Duration>,
    /// Finish as soon as this many replies have arrived.
    pub expected_replies: Option<usize>,
}

struct Tasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

struct Inner {
    dispatcher: Dispatcher,
    config: Config,
    info: SessionInfo,
    /// Largest frame the link accepts.
    max_frame_size: usize,
    tasks: StdMutex<Option<Tasks>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(tasks) = self.tasks.get_mut().ok().and_then(Option::take) {
            tasks.reader.abort();
            tasks.writer.abort();
        }
    }
}

/// A client session with one router.
///
/// Cheap to clone; all clones share the same state and link. The reader and
/// writer tasks stop when [`close`](Self::close) is called, when the link is
/// lost, or when the last clone (including handles) is dropped.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Performs the `Open`/`OpenAck` handshake on `conn` and starts the
    /// session's reader and writer tasks.
    ///
    /// # Errors
    /// - [`ConfigError`](crate::ConfigError) if `config` is invalid
    /// - [`SessionError::HandshakeFailed`] on timeout, version mismatch, or
    ///   an unexpected reply
    /// - [`TransportError`] if the link fails during the handshake
    pub async fn open<C>(conn: C, config: Config) -> Result<Self, KeyspaceError>
    where
        C: Connection<Error = TransportError>,
    {
        config.validate()?;
        let peer_id = config.peer_id()?;
        let link = conn.id();

        let router_id =
            match runtime::handshake(&conn, &peer_id, config.handshake_timeout())
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    let _ = conn.close().await;
                    return Err(e);
                }
            };

        let max_frame_size = conn.max_frame_size();
        let conn = Arc::new(conn);
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(SessionState::new()));
        let dispatcher = Dispatcher::new(state, tx);

        let writer = tokio::spawn(runtime::write_loop(
            Arc::clone(&conn),
            rx,
            dispatcher.clone(),
        ));
        let reader = tokio::spawn(runtime::read_loop(
            conn,
            dispatcher.clone(),
            writer.abort_handle(),
        ));

        tracing::info!(%link, %peer_id, %router_id, "session opened");

        Ok(Self {
            inner: Arc::new(Inner {
                dispatcher,
                config,
                info: SessionInfo {
                    peer_id,
                    router_id,
                    link,
                },
                max_frame_size,
                tasks: StdMutex::new(Some(Tasks { reader, writer })),
            }),
        })
    }

    /// Peer ids of both ends and the link id.
    pub fn info(&self) -> &SessionInfo {
        &self.inner.info
    }

    /// The config the session was opened with.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns `true` until the session is closed or its link is lost.
    pub async fn is_open(&self) -> bool {
        self.state().lock().await.is_open()
    }

    /// Sends `Close`, fails pending queries with
    /// [`SessionError::SessionClosed`], closes the link, and stops the
    /// reader and writer tasks.
    pub async fn close(&self) -> Result<(), KeyspaceError> {
        let invocations = {
            let mut state = self.state().lock().await;
            state.ensure_open()?;
            self.enqueue(Message::Close {
                reason: "closed by client".into(),
            })?;
            state.close()
        };
        self.dispatcher().run(invocations);

        let tasks = self.inner.tasks.lock().ok().and_then(|mut t| t.take());
        if let Some(Tasks { reader, mut writer }) = tasks {
            // The writer exits after flushing `Close` and closing the link.
            let flush = self.inner.config.handshake_timeout();
            if tokio::time::timeout(flush, &mut writer).await.is_err() {
                tracing::warn!("writer did not flush Close in time");
                writer.abort();
            }
            reader.abort();
        }
        tracing::info!(link = %self.inner.info.link, "session closed");
        Ok(())
    }

    // -- Publication ---------------------------------------------------------

    /// Publishes `payload` on a concrete key with the default encoding.
    pub async fn put(
        &self,
        key: &str,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), KeyspaceError> {
        self.write(key, payload.into(), Encoding::default(), SampleKind::Put)
            .await
    }

    /// Publishes `payload` with an explicit encoding.
    pub async fn put_with(
        &self,
        key: &str,
        payload: impl Into<Vec<u8>>,
        encoding: Encoding,
    ) -> Result<(), KeyspaceError> {
        self.write(key, payload.into(), encoding, SampleKind::Put).await
    }

    /// Publishes a deletion of `key`.
    pub async fn delete(&self, key: &str) -> Result<(), KeyspaceError> {
        self.write(key, Vec::new(), Encoding::default(), SampleKind::Delete)
            .await
    }

    async fn write(
        &self,
        key: &str,
        payload: Vec<u8>,
        encoding: Encoding,
        kind: SampleKind,
    ) -> Result<(), KeyspaceError> {
        let key = concrete(key)?;
        let sample = Sample {
            key: key.into_string(),
            payload,
            encoding,
            kind,
        };

        let local = {
            let state = self.state().lock().await;
            state.ensure_open()?;
            let local = if self.inner.config.local_routing {
                state.local_matches(&sample)
            } else {
                Vec::new()
            };
            self.enqueue_sized(Message::Data {
                key: state.compress(&sample.key),
                payload: sample.payload,
                encoding: sample.encoding,
                kind: sample.kind,
            })?;
            local
        };
        self.dispatcher().run(local);
        Ok(())
    }

    // -- Resources -----------------------------------------------------------

    /// Binds a fresh numeric id to `path`. Later messages on `path` (or
    /// below it) go out with the id instead of the string.
    pub async fn declare_resource(
        &self,
        path: &str,
    ) -> Result<ResourceId, KeyspaceError> {
        let path = KeyExpr::new(path)?;
        let mut state = self.state().lock().await;
        let id = state.declare_resource(&path)?;
        self.enqueue(Message::DeclareResource {
            id,
            key: ResKey::Name(path.into_string()),
        })?;
        tracing::info!(id, "resource declared");
        Ok(id)
    }

    /// Binds a caller-chosen id to `path`.
    ///
    /// # Errors
    /// [`SessionError::DuplicateDeclaration`] if the id is bound or was
    /// already issued by this session.
    pub async fn declare_resource_with_id(
        &self,
        id: ResourceId,
        path: &str,
    ) -> Result<(), KeyspaceError> {
        let path = KeyExpr::new(path)?;
        let mut state = self.state().lock().await;
        state.declare_resource_with_id(id, &path)?;
        self.enqueue(Message::DeclareResource {
            id,
            key: ResKey::Name(path.into_string()),
        })?;
        tracing::info!(id, "resource declared");
        Ok(())
    }

    /// Releases a resource id. The id is never issued again.
    pub async fn undeclare_resource(
        &self,
        id: ResourceId,
    ) -> Result<(), KeyspaceError> {
        let mut state = self.state().lock().await;
        state.ensure_open()?;
        if state.resource_path(id).is_none() {
            return Err(SessionError::UnknownId(id).into());
        }
        state.unregister(id)?;
        self.enqueue(Message::Undeclare {
            kind: DeclKind::Resource,
            id,
        })?;
        Ok(())
    }

    // -- Publishers ----------------------------------------------------------

    /// Announces publication on a concrete key.
    pub async fn declare_publisher(
        &self,
        key: &str,
    ) -> Result<Publisher, KeyspaceError> {
        let key = concrete(key)?;
        let mut state = self.state().lock().await;
        let id = state.register_publisher(key.clone())?;
        self.enqueue(Message::DeclarePublisher {
            id,
            key: state.compress(key.as_str()),
        })?;
        tracing::info!(id, key = %key, "publisher declared");
        Ok(Publisher::new(self.clone(), id, key))
    }

    // -- Subscriptions -------------------------------------------------------

    /// Subscribes to every key matching `pattern` (best-effort, push).
    pub async fn subscribe<F>(
        &self,
        pattern: &str,
        on_data: F,
    ) -> Result<Subscriber, KeyspaceError>
    where
        F: Fn(Sample) + Send + Sync + 'static,
    {
        self.subscribe_with(pattern, SubInfo::default(), on_data).await
    }

    /// Subscribes with explicit reliability and push/pull mode.
    pub async fn subscribe_with<F>(
        &self,
        pattern: &str,
        info: SubInfo,
        on_data: F,
    ) -> Result<Subscriber, KeyspaceError>
    where
        F: Fn(Sample) + Send + Sync + 'static,
    {
        let pattern = KeyExpr::new(pattern)?;
        let mut state = self.state().lock().await;
        let id = state.register_subscription(
            pattern.clone(),
            info,
            Arc::new(on_data),
        )?;
        self.enqueue(Message::DeclareSubscriber {
            id,
            key: state.compress(pattern.as_str()),
            info,
        })?;
        tracing::info!(id, pattern = %pattern, "subscriber declared");
        Ok(Subscriber::new(self.clone(), id, pattern, info))
    }

    /// Subscribes and returns the samples on a FIFO channel instead of a
    /// callback. The channel closes when the subscription ends.
    pub async fn subscribe_channel(
        &self,
        pattern: &str,
    ) -> Result<(Subscriber, mpsc::UnboundedReceiver<Sample>), KeyspaceError>
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber = self
            .subscribe(pattern, move |sample| {
                let _ = tx.send(sample);
            })
            .await?;
        Ok((subscriber, rx))
    }

    // -- Queryables ----------------------------------------------------------

    /// Answers queries whose pattern intersects `pattern`. The callback's
    /// samples are sent back as replies.
    pub async fn declare_queryable<F>(
        &self,
        pattern: &str,
        kind: QueryableKind,
        on_query: F,
    ) -> Result<Queryable, KeyspaceError>
    where
        F: Fn(&Query) -> Vec<Sample> + Send + Sync + 'static,
    {
        let pattern = KeyExpr::new(pattern)?;
        let mut state = self.state().lock().await;
        let id =
            state.register_queryable(pattern.clone(), kind, Arc::new(on_query))?;
        self.enqueue(Message::DeclareQueryable {
            id,
            key: state.compress(pattern.as_str()),
            kind,
        })?;
        tracing::info!(id, pattern = %pattern, ?kind, "queryable declared");
        Ok(Queryable::new(self.clone(), id, pattern))
    }

    // -- Queries -------------------------------------------------------------

    /// Queries `pattern` and waits until the router signals the end, or the
    /// timeout passes.
    ///
    /// Returns the number of replies delivered to `on_reply`.
    ///
    /// # Errors
    /// - [`SessionError::QueryTimeout`] if nothing arrived before the
    ///   deadline (replies that did arrive are always delivered)
    /// - [`SessionError::LinkLost`] / [`SessionError::SessionClosed`] if the
    ///   session went down while waiting
    pub async fn query<F>(
        &self,
        pattern: &str,
        on_reply: F,
        timeout: Duration,
    ) -> Result<usize, KeyspaceError>
    where
        F: Fn(Reply) + Send + Sync + 'static,
    {
        let options = QueryOptions {
            timeout: Some(timeout),
            ..QueryOptions::default()
        };
        self.query_with(pattern, options, on_reply).await
    }

    /// Queries with a predicate, target, consolidation, or expected count.
    pub async fn query_with<F>(
        &self,
        pattern: &str,
        options: QueryOptions,
        on_reply: F,
    ) -> Result<usize, KeyspaceError>
    where
        F: Fn(Reply) + Send + Sync + 'static,
    {
        let key = KeyExpr::new(pattern)?;
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.inner.config.query_timeout());
        let deadline = Instant::now() + timeout;

        let (query_id, mut done) = {
            let mut state = self.state().lock().await;
            let (query_id, done) = state.register_query(
                options.consolidation,
                options.expected_replies,
                Arc::new(on_reply),
            )?;
            let sent = self.enqueue_sized(Message::Query {
                id: query_id,
                key: state.compress(key.as_str()),
                predicate: options.predicate,
                target: options.target,
                consolidation: options.consolidation,
            });
            if let Err(e) = sent {
                drop(state.finalize_query(query_id, QueryEnd::Cancelled));
                return Err(e);
            }
            (query_id, done)
        };
        tracing::debug!(query_id, key = %key, ?timeout, "query sent");

        // Ends the query if this future is dropped before it finishes.
        let mut guard = QueryGuard {
            dispatcher: self.dispatcher().clone(),
            query_id,
            armed: true,
        };
        let outcome = match tokio::time::timeout_at(deadline, &mut done).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let invocations = self
                    .state()
                    .lock()
                    .await
                    .finalize_query(query_id, QueryEnd::Deadline);
                self.dispatcher().run(invocations);
                done.await
            }
        };
        guard.armed = false;
        // A dropped sender means the query record vanished without an end.
        let delivered = outcome.unwrap_or(Err(SessionError::SessionClosed))?;
        Ok(delivered)
    }

    /// Queries `pattern` and collects the replies.
    pub async fn get(
        &self,
        pattern: &str,
        timeout: Duration,
    ) -> Result<Vec<Reply>, KeyspaceError> {
        let replies = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&replies);
        self.query(
            pattern,
            move |reply| {
                if let Ok(mut replies) = sink.lock() {
                    replies.push(reply);
                }
            },
            timeout,
        )
        .await?;
        let collected = match replies.lock() {
            Ok(mut replies) => std::mem::take(&mut *replies),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        Ok(collected)
    }

    // -- Internals -----------------------------------------------------------

    /// Removes a subscriber, queryable, or publisher and tells the router.
    pub(crate) async fn undeclare(
        &self,
        id: ResourceId,
    ) -> Result<(), KeyspaceError> {
        let mut state = self.state().lock().await;
        let kind = state.unregister(id)?;
        self.enqueue(Message::Undeclare { kind, id })?;
        tracing::info!(id, %kind, "undeclared");
        Ok(())
    }

    /// Asks the router for data held for a pull subscriber.
    pub(crate) async fn pull(&self, id: ResourceId) -> Result<(), KeyspaceError> {
        let state = self.state().lock().await;
        state.ensure_open()?;
        if state.subscription_info(id).is_none() {
            return Err(SessionError::UnknownId(id).into());
        }
        self.enqueue(Message::Pull { id })?;
        Ok(())
    }

    fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    fn state(&self) -> &Arc<Mutex<SessionState>> {
        self.dispatcher().state()
    }

    /// Queues a message for the writer. Callers hold the state lock.
    fn enqueue(&self, msg: Message) -> Result<(), SessionError> {
        self.dispatcher()
            .outbound()
            .send(msg)
            .map_err(|_| SessionError::SessionClosed)
    }

    /// Like [`enqueue`](Self::enqueue), for messages carrying caller data.
    /// Refuses a message that would not fit in one frame on this link.
    fn enqueue_sized(&self, msg: Message) -> Result<(), KeyspaceError> {
        let size = encode(&msg).len();
        let max = self.inner.max_frame_size;
        if size > max {
            return Err(TransportError::FrameTooLarge { size, max }.into());
        }
        Ok(self.enqueue(msg)?)
    }
}

/// Cancels a pending query when the waiting future goes away.
struct QueryGuard {
    dispatcher: Dispatcher,
    query_id: u64,
    armed: bool,
}

impl Drop for QueryGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let state = Arc::clone(self.dispatcher.state());
        let query_id = self.query_id;
        if let Ok(mut state) = state.try_lock() {
            drop(state.finalize_query(query_id, QueryEnd::Cancelled));
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let mut state = state.lock().await;
                drop(state.finalize_query(query_id, QueryEnd::Cancelled));
            });
        }
    }
}

fn concrete(key: &str) -> Result<KeyExpr, KeyspaceError> {
    let key = KeyExpr::new(key)?;
    if key.is_wild() {
        return Err(SessionError::InvalidKeyExpr(key.into_string()).into());
    }
    Ok(key)
}

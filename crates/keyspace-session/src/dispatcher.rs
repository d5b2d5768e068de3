//! Routes incoming router messages to local callbacks.
//!
//! The reader task hands every received frame to [`Dispatcher::dispatch_frame`].
//! The dispatcher decodes it against the router's resource table, applies
//! each message to the [`SessionState`] under the lock, then releases the
//! lock and runs the resulting [`Invocation`]s.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use keyspace_protocol::{decode, Message};
use tokio::sync::{mpsc, Mutex};

use crate::{Invocation, SessionState};

/// Outbound half of the writer queue.
pub type Outbound = mpsc::UnboundedSender<Message>;

/// Applies router messages to the session state and runs the callbacks they
/// trigger. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    state: Arc<Mutex<SessionState>>,
    outbound: Outbound,
}

impl Dispatcher {
    pub fn new(state: Arc<Mutex<SessionState>>, outbound: Outbound) -> Self {
        Self { state, outbound }
    }

    /// The shared session state.
    pub fn state(&self) -> &Arc<Mutex<SessionState>> {
        &self.state
    }

    /// The writer queue replies are sent on.
    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    /// Handles one decoded message.
    ///
    /// Returns `Break` once the session is no longer open (the router sent
    /// `Close`), telling the reader to stop.
    pub async fn dispatch(&self, msg: Message) -> ControlFlow<()> {
        let (invocations, open) = {
            let mut state = self.state.lock().await;
            let invocations = state.resolve_incoming(msg);
            (invocations, state.is_open())
        };
        self.run(invocations);
        if open {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(())
        }
    }

    /// Decodes and handles every message in one frame.
    ///
    /// A decode error drops the rest of the frame; messages before it have
    /// already been applied. A later frame is unaffected.
    pub async fn dispatch_frame(&self, frame: &[u8]) -> ControlFlow<()> {
        let (invocations, open) = {
            let mut state = self.state.lock().await;
            let mut invocations = Vec::new();
            let mut pos = 0;
            while pos < frame.len() && state.is_open() {
                match decode(&frame[pos..], state.remote()) {
                    Ok((msg, used)) => {
                        pos += used;
                        tracing::trace!(kind = msg.kind_name(), "message received");
                        invocations.extend(state.resolve_incoming(msg));
                    }
                    Err(e) => {
                        tracing::debug!(
                            error = %e,
                            offset = pos,
                            len = frame.len(),
                            "dropping undecodable frame"
                        );
                        break;
                    }
                }
            }
            (invocations, state.is_open())
        };
        self.run(invocations);
        if open {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(())
        }
    }

    /// Tears the session down after the link failed.
    pub async fn link_lost(&self) {
        let invocations = self.state.lock().await.link_lost();
        self.run(invocations);
    }

    /// Runs invocations produced under the lock. Must be called without
    /// holding it.
    pub fn run(&self, invocations: Vec<Invocation>) {
        for invocation in invocations {
            match invocation {
                Invocation::Data {
                    callback,
                    sample,
                    active,
                } => {
                    if active.load(Ordering::Acquire) {
                        callback(sample);
                    }
                }
                Invocation::Query {
                    query_id,
                    callback,
                    query,
                } => {
                    for sample in callback(&query) {
                        self.send(Message::Reply {
                            query_id,
                            key: sample.key.into(),
                            payload: sample.payload,
                            encoding: sample.encoding,
                            kind: sample.kind,
                        });
                    }
                }
                Invocation::ReplyFinal { query_id } => {
                    self.send(Message::ReplyFinal { query_id });
                }
                Invocation::Reply { callback, reply } => callback(reply),
                Invocation::Complete { signal, outcome } => {
                    // The waiter may have given up already.
                    let _ = signal.send(outcome);
                }
            }
        }
    }

    fn send(&self, msg: Message) {
        if self.outbound.send(msg).is_err() {
            tracing::debug!("writer gone, outbound message dropped");
        }
    }
}

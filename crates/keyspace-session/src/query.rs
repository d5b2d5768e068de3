//! Pending queries: reply bookkeeping and consolidation.

use std::collections::{BTreeMap, HashSet};

use keyspace_protocol::ConsolidationMode;
use tokio::sync::oneshot;

use crate::{Invocation, Reply, ReplyCallback, Sample, SessionError};

/// How a query ended, as reported to the caller waiting on it.
///
/// `Ok(n)` carries the number of replies delivered to the callback.
pub type QueryOutcome = Result<usize, SessionError>;

/// Why a pending query is being finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryEnd {
    /// The router sent `ReplyFinal`, or the expected reply count was reached.
    Completed,
    /// The caller's deadline passed.
    Deadline,
    /// The link failed.
    LinkLost,
    /// The session was closed locally.
    Closed,
    /// The caller stopped waiting. Held replies are discarded.
    Cancelled,
}

/// A query that was sent and is still collecting replies.
pub(crate) struct PendingQuery {
    id: u64,
    consolidation: ConsolidationMode,
    expected: Option<usize>,
    received: usize,
    delivered: usize,
    /// Keys already delivered (lazy consolidation).
    seen: HashSet<String>,
    /// Latest reply per key, released on finish (full consolidation).
    held: BTreeMap<String, Sample>,
    callback: ReplyCallback,
    done: oneshot::Sender<QueryOutcome>,
}

impl PendingQuery {
    pub(crate) fn new(
        id: u64,
        consolidation: ConsolidationMode,
        expected: Option<usize>,
        callback: ReplyCallback,
    ) -> (Self, oneshot::Receiver<QueryOutcome>) {
        let (done, rx) = oneshot::channel();
        let query = Self {
            id,
            consolidation,
            expected,
            received: 0,
            delivered: 0,
            seen: HashSet::new(),
            held: BTreeMap::new(),
            callback,
            done,
        };
        (query, rx)
    }

    /// Records one reply. Returns the invocation delivering it now, if the
    /// consolidation mode delivers immediately.
    pub(crate) fn accept(&mut self, sample: Sample) -> Option<Invocation> {
        self.received += 1;
        let deliver_now = match self.consolidation {
            ConsolidationMode::None => true,
            ConsolidationMode::Lazy => self.seen.insert(sample.key.clone()),
            ConsolidationMode::Full => {
                self.held.insert(sample.key.clone(), sample);
                return None;
            }
        };
        if !deliver_now {
            tracing::debug!(
                query_id = self.id,
                key = %sample.key,
                "duplicate reply dropped"
            );
            return None;
        }
        self.delivered += 1;
        Some(self.deliver(sample))
    }

    /// Returns `true` once the expected number of replies has arrived.
    pub(crate) fn is_satisfied(&self) -> bool {
        self.expected.is_some_and(|n| self.received >= n)
    }

    /// Consumes the query, releasing held replies followed by the
    /// completion signal.
    pub(crate) fn finish(mut self, end: QueryEnd) -> Vec<Invocation> {
        let held = std::mem::take(&mut self.held);
        let mut out: Vec<Invocation> = Vec::with_capacity(held.len() + 1);
        if end != QueryEnd::Cancelled {
            for (_, sample) in held {
                self.delivered += 1;
                out.push(self.deliver(sample));
            }
        }

        let outcome = match end {
            QueryEnd::Completed => Ok(self.delivered),
            QueryEnd::Deadline if self.received == 0 => {
                Err(SessionError::QueryTimeout)
            }
            QueryEnd::Deadline => Ok(self.delivered),
            QueryEnd::LinkLost => Err(SessionError::LinkLost),
            QueryEnd::Closed | QueryEnd::Cancelled => {
                Err(SessionError::SessionClosed)
            }
        };
        tracing::debug!(
            query_id = self.id,
            ?end,
            received = self.received,
            delivered = self.delivered,
            "query finalized"
        );
        out.push(Invocation::Complete {
            signal: self.done,
            outcome,
        });
        out
    }

    fn deliver(&self, sample: Sample) -> Invocation {
        Invocation::Reply {
            callback: self.callback.clone(),
            reply: Reply {
                query_id: self.id,
                sample,
            },
        }
    }
}

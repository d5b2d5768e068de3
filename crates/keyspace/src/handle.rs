//! Handles returned by declarations.
//!
//! Each handle owns one declaration. Calling `undeclare` removes it and waits
//! for the `Undeclare` message to be queued; dropping the handle does the
//! same in a background task.

use keyspace_protocol::{Encoding, KeyExpr, ResourceId, SubInfo, SubMode};

use crate::{KeyspaceError, Session};

/// Spawns the undeclare for a handle dropped without `undeclare()`.
fn undeclare_in_background(session: &Session, id: ResourceId) {
    // Dropped outside a runtime (e.g. after shutdown): the session is gone
    // with it, nothing left to tell the router.
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        return;
    };
    let session = session.clone();
    runtime.spawn(async move {
        if let Err(e) = session.undeclare(id).await {
            tracing::debug!(id, error = %e, "background undeclare skipped");
        }
    });
}

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

/// A live subscription. Its callback stops firing once it is undeclared.
pub struct Subscriber {
    session: Session,
    id: ResourceId,
    pattern: KeyExpr,
    info: SubInfo,
    undeclared: bool,
}

impl Subscriber {
    pub(crate) fn new(
        session: Session,
        id: ResourceId,
        pattern: KeyExpr,
        info: SubInfo,
    ) -> Self {
        Self {
            session,
            id,
            pattern,
            info,
            undeclared: false,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn pattern(&self) -> &KeyExpr {
        &self.pattern
    }

    pub fn info(&self) -> SubInfo {
        self.info
    }

    /// Asks the router to release data it holds for this subscription.
    /// Only meaningful in pull mode.
    pub async fn pull(&self) -> Result<(), KeyspaceError> {
        if self.info.mode != SubMode::Pull {
            tracing::debug!(id = self.id, "pull on a push subscriber");
        }
        self.session.pull(self.id).await
    }

    /// Removes the subscription. No sample is delivered after this returns.
    pub async fn undeclare(mut self) -> Result<(), KeyspaceError> {
        self.undeclared = true;
        self.session.undeclare(self.id).await
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        if !self.undeclared {
            undeclare_in_background(&self.session, self.id);
        }
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// A declared publication key.
pub struct Publisher {
    session: Session,
    id: ResourceId,
    key: KeyExpr,
    undeclared: bool,
}

impl Publisher {
    pub(crate) fn new(session: Session, id: ResourceId, key: KeyExpr) -> Self {
        Self {
            session,
            id,
            key,
            undeclared: false,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn key(&self) -> &KeyExpr {
        &self.key
    }

    /// Publishes on this publisher's key.
    pub async fn put(
        &self,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), KeyspaceError> {
        self.session.put(self.key.as_str(), payload).await
    }

    /// Publishes with an explicit encoding.
    pub async fn put_with(
        &self,
        payload: impl Into<Vec<u8>>,
        encoding: Encoding,
    ) -> Result<(), KeyspaceError> {
        self.session.put_with(self.key.as_str(), payload, encoding).await
    }

    /// Publishes a deletion of this publisher's key.
    pub async fn delete(&self) -> Result<(), KeyspaceError> {
        self.session.delete(self.key.as_str()).await
    }

    pub async fn undeclare(mut self) -> Result<(), KeyspaceError> {
        self.undeclared = true;
        self.session.undeclare(self.id).await
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if !self.undeclared {
            undeclare_in_background(&self.session, self.id);
        }
    }
}

// ---------------------------------------------------------------------------
// Queryable
// ---------------------------------------------------------------------------

/// A live queryable.
pub struct Queryable {
    session: Session,
    id: ResourceId,
    pattern: KeyExpr,
    undeclared: bool,
}

impl Queryable {
    pub(crate) fn new(session: Session, id: ResourceId, pattern: KeyExpr) -> Self {
        Self {
            session,
            id,
            pattern,
            undeclared: false,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn pattern(&self) -> &KeyExpr {
        &self.pattern
    }

    pub async fn undeclare(mut self) -> Result<(), KeyspaceError> {
        self.undeclared = true;
        self.session.undeclare(self.id).await
    }
}

impl Drop for Queryable {
    fn drop(&mut self) {
        if !self.undeclared {
            undeclare_in_background(&self.session, self.id);
        }
    }
}

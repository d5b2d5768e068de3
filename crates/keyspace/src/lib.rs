//! # Keyspace
//!
//! Client sessions for key-addressed publish/subscribe and distributed
//! queries.
//!
//! A [`Session`] holds one link to a router. Through it an application
//! publishes values on hierarchical keys (`/home/kitchen/temp`), subscribes
//! to key patterns (`/home/*/temp`, `/home/**`), answers queries with a
//! queryable, and queries for values held elsewhere.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use keyspace::prelude::*;
//!
//! # async fn run() -> Result<(), KeyspaceError> {
//! keyspace::init_logger();
//! let session = keyspace::connect(Config::default()).await?;
//!
//! let _sub = session
//!     .subscribe("/demo/**", |sample| println!("{sample}"))
//!     .await?;
//! session.put("/demo/example", "hello").await?;
//!
//! for reply in session.get("/demo/**", Duration::from_secs(1)).await? {
//!     println!("{}", reply.sample);
//! }
//! session.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Layers
//!
//! ```text
//! keyspace            ← Session API, reader/writer tasks, config
//! keyspace-session    ← declaration tables, dispatch, pending queries
//! keyspace-protocol   ← messages, key expressions, binary codec
//! keyspace-transport  ← framed links (TCP, WebSocket, in-memory)
//! ```

mod config;
mod error;
mod handle;
mod logging;
mod runtime;
mod session;

pub use config::Config;
pub use error::{ConfigError, KeyspaceError};
pub use handle::{Publisher, Queryable, Subscriber};
pub use logging::{init_logger, init_logger_or};
pub use session::{QueryOptions, Session, SessionInfo};

pub use keyspace_session::{Query, Reply, Sample, SessionError};

pub use keyspace_protocol as protocol;
pub use keyspace_transport as transport;

/// Connects to the first reachable endpoint in `config.connect` and opens a
/// session on it.
///
/// # Errors
/// The last connection error if no endpoint could be reached, or any error
/// from [`Session::open`].
pub async fn connect(config: Config) -> Result<Session, KeyspaceError> {
    config.validate()?;
    let mut last_error = None;
    for endpoint in config.endpoints()? {
        match keyspace_transport::connect_with_limit(
            &endpoint,
            config.max_frame_size,
        )
        .await
        {
            Ok(link) => return Session::open(link, config).await,
            Err(e) => {
                tracing::warn!(%endpoint, error = %e, "endpoint unreachable");
                last_error = Some(e);
            }
        }
    }
    Err(match last_error {
        Some(e) => e.into(),
        None => ConfigError::Invalid("no endpoint to connect to".into()).into(),
    })
}

/// Common imports for Keyspace applications.
pub mod prelude {
    pub use crate::{
        Config, KeyspaceError, Publisher, QueryOptions, Queryable, Session,
        SessionInfo, Subscriber,
    };
    pub use keyspace_protocol::{
        ConsolidationMode, Encoding, KeyExpr, QueryTarget, QueryableKind,
        Reliability, SampleKind, SubInfo, SubMode,
    };
    pub use keyspace_session::{Query, Reply, Sample, SessionError};
}

//! Process-wide session registry
//!
//! Holds at most one joined group per process together with the runtime that
//! drives its I/O. Join and leave take the write lock; every query and
//! operation holds the read lock until it returns, so membership can never
//! change under an operation in flight.

use std::future::Future;

use parking_lot::{const_rwlock, RwLock};
use tokio::runtime::{Builder, Runtime};
use tracing::info;

use crate::error::{Error, Result};
use crate::transport::TransportConfig;

use super::{ProcessGroup, Rank, Rendezvous};

/// A joined group plus the runtime driving it
pub struct Session {
    group: ProcessGroup,
    runtime: Runtime,
}

impl Session {
    pub fn group(&self) -> &ProcessGroup {
        &self.group
    }

    /// Block the calling thread on `fut` using the session runtime
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }
}

static SESSION: RwLock<Option<Session>> = const_rwlock(None);

/// Blocking calls would deadlock or panic inside an async context
fn ensure_blocking_context() -> Result<()> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(Error::Internal(
            "blocking group calls cannot be made from inside an async runtime; use the ProcessGroup async API".into(),
        ));
    }
    Ok(())
}

/// Resolve a bootstrap and join the group, returning `(rank, size)`
pub fn join(rendezvous: &dyn Rendezvous, config: &TransportConfig) -> Result<(Rank, u32)> {
    ensure_blocking_context()?;

    let mut slot = SESSION.write();
    if let Some(existing) = slot.as_ref() {
        return Err(Error::AlreadyInitialized {
            rank: existing.group.rank(),
            size: existing.group.size(),
        });
    }

    let runtime = Builder::new_current_thread()
        .enable_all()
        .thread_name("rankmesh")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create runtime: {}", e)))?;

    info!(rendezvous = rendezvous.name(), "Joining process group");
    let group = runtime.block_on(async {
        let bootstrap = rendezvous.resolve().await?;
        ProcessGroup::join(bootstrap, config).await
    })?;

    let joined = (group.rank(), group.size());
    *slot = Some(Session { group, runtime });
    Ok(joined)
}

/// Close every connection and clear the session
pub fn leave() -> Result<()> {
    ensure_blocking_context()?;

    let session = SESSION.write().take().ok_or(Error::NotInitialized)?;
    let Session { group, runtime } = session;
    runtime.block_on(group.leave());
    Ok(())
}

pub fn is_initialized() -> bool {
    SESSION.read().is_some()
}

/// Run `f` against the joined session while holding the read lock
pub fn with_session<T>(f: impl FnOnce(&Session) -> Result<T>) -> Result<T> {
    ensure_blocking_context()?;

    let guard = SESSION.read();
    let session = guard.as_ref().ok_or(Error::NotInitialized)?;
    f(session)
}

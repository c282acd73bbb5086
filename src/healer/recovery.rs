//! Recovery sweep: re-request every connection that is not known to be up.

use tracing::{info, warn};

use crate::connection::NetworkServiceRequest;

use super::cache::ConnectionCache;
use super::{ConnectionRequester, HealingHandler};

/// Outcome of one pass over the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// `(stale key, new id)` of every restored connection.
    pub restored: Vec<(String, String)>,
    /// Keys left pending with a sentinel id.
    pub failed: Vec<String>,
}

impl SweepReport {
    /// True when at least one connection must be attempted again.
    #[must_use]
    pub fn needs_retry(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Attempt to restore every pending connection once.
///
/// A restored connection replaces its stale entry under its new id. A failed
/// one stays under its old key with its id reset to the sentinel.
pub async fn sweep<R, H>(cache: &mut ConnectionCache, requester: &R, handler: &H) -> SweepReport
where
    R: ConnectionRequester + ?Sized,
    H: HealingHandler + ?Sized,
{
    let mut report = SweepReport::default();

    for key in cache.pending_keys() {
        let Some(conn) = cache.get(&key) else {
            continue;
        };
        let request = NetworkServiceRequest::restore(conn);
        handler.healing(&request);

        match requester.request(request).await {
            Ok(restored) => {
                info!(stale = %key, id = %restored.id, "connection restored");
                handler.healed(Ok(&restored));
                report.restored.push((key.clone(), restored.id.clone()));
                cache.replace(&key, restored);
            }
            Err(e) => {
                warn!(connection = %key, error = %e, "failed to restore connection");
                handler.healed(Err(&e));
                cache.reset_id(&key);
                report.failed.push(key);
            }
        }
    }

    report
}

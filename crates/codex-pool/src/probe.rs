//! Parallel first-success probing
//!
//! Races N candidate accounts against the same probe function. The first
//! success wins; every other candidate's cancellation token is signalled so
//! in-flight work stops promptly. Late results from losers are discarded,
//! and per-candidate failures are debug noise, never errors.

use std::future::Future;

use codex_store::StoredAccount;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A candidate entering the race: the pool index it was selected at, a
/// snapshot of the account, and its private cancellation handle.
#[derive(Debug, Clone)]
pub struct ProbeCandidate {
    pub index: usize,
    pub account: StoredAccount,
    pub cancel: CancellationToken,
}

impl ProbeCandidate {
    pub fn new(index: usize, account: StoredAccount) -> Self {
        Self {
            index,
            account,
            cancel: CancellationToken::new(),
        }
    }
}

/// The winning candidate and its payload.
#[derive(Debug)]
pub struct ProbeWinner<T> {
    pub index: usize,
    pub value: T,
}

/// Race `candidates` through `probe`; first success wins.
///
/// - empty input resolves to `None`
/// - a single candidate runs directly, no race overhead
/// - with several, all launch concurrently; the first success cancels the
///   rest, and if every candidate fails the race resolves to `None`
///
/// A failure never cancels the remaining candidates, since any of them may
/// still win. The prober does not touch the trackers; the caller reports
/// the outcome afterwards.
pub async fn race<T, F, Fut>(candidates: Vec<ProbeCandidate>, probe: F) -> Option<ProbeWinner<T>>
where
    T: Send + 'static,
    F: Fn(StoredAccount, CancellationToken) -> Fut,
    Fut: Future<Output = common::Result<T>> + Send + 'static,
{
    metrics::counter!("probe_races_total").increment(1);

    if candidates.is_empty() {
        return None;
    }

    if candidates.len() == 1 {
        let candidate = candidates.into_iter().next().expect("one candidate");
        return match probe(candidate.account, candidate.cancel).await {
            Ok(value) => Some(ProbeWinner {
                index: candidate.index,
                value,
            }),
            Err(err) => {
                debug!(index = candidate.index, error = %err, "probe failed");
                None
            }
        };
    }

    let handles: Vec<(usize, CancellationToken)> = candidates
        .iter()
        .map(|candidate| (candidate.index, candidate.cancel.clone()))
        .collect();

    let mut tasks: JoinSet<(usize, common::Result<T>)> = JoinSet::new();
    for candidate in candidates {
        let fut = probe(candidate.account, candidate.cancel);
        let index = candidate.index;
        tasks.spawn(async move { (index, fut.await) });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Ok(value))) => {
                // Declare the winner, then signal every loser exactly once.
                for (loser, cancel) in &handles {
                    if *loser != index {
                        cancel.cancel();
                    }
                }
                metrics::counter!("probe_wins_total").increment(1);
                debug!(index, "probe race won");
                return Some(ProbeWinner { index, value });
            }
            Ok((index, Err(err))) => {
                debug!(index = index, error = %err, "probe candidate failed");
            }
            Err(join_err) => {
                debug!(error = %join_err, "probe task aborted");
            }
        }
    }

    debug!("all probe candidates failed");
    None
}

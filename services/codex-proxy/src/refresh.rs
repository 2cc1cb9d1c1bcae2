//! Proactive background credential refresh
//!
//! A periodic task that rotates refresh tokens before they go stale, so
//! the request path rarely pays refresh latency. Rejected tokens push
//! their account into cooldown; transient failures wait for the next
//! cycle.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use codex_auth::AuthFlow;

use crate::gateway::Gateway;

/// Spawn the refresh loop. The returned handle is aborted at shutdown.
pub fn spawn_refresh_task(
    gateway: Arc<Gateway>,
    flow: Arc<dyn AuthFlow>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Credentials were just loaded; skip the immediate first tick.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let refreshed = gateway.refresh_credentials(flow.as_ref()).await;
            debug!(refreshed, "credential refresh cycle finished");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use codex_auth::AccountMetadata;
    use codex_store::AccountStore;
    use common::{Error, ManualClock, Result};
    use std::future::Future;
    use std::pin::Pin;

    struct TransientFlow;

    impl AuthFlow for TransientFlow {
        fn login(&self) -> Pin<Box<dyn Future<Output = Result<AccountMetadata>> + Send + '_>> {
            Box::pin(async { Err(Error::timeout("not used here")) })
        }

        fn refresh<'a>(
            &'a self,
            _refresh_token: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<AccountMetadata>> + Send + 'a>> {
            Box::pin(async { Err(Error::network("token endpoint unreachable")) })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn task_survives_failing_cycles_until_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::starting_at(1_000_000);
        let store = AccountStore::with_clock(dir.path().join("accounts.json"), clock.clone());
        let gateway = Arc::new(Gateway::load_with_clock(store, clock).await);
        gateway
            .add_account(AccountMetadata {
                account_id: Some("A".into()),
                email: None,
                account_id_source: None,
                refresh_token: "rt_a".into(),
            })
            .await
            .unwrap();

        let handle = spawn_refresh_task(
            gateway.clone(),
            Arc::new(TransientFlow),
            Duration::from_secs(60),
        );

        // Two full cycles of transient failures leave the account intact.
        tokio::time::sleep(Duration::from_secs(130)).await;
        let accounts = gateway.accounts().await;
        assert_eq!(accounts[0].refresh_token, "rt_a");
        assert!(accounts[0].cooling_down_until.is_none());

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}

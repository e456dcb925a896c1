use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{OrchestratorError, Result};
use crate::models::Environment;

type LockKey = (String, Environment);

/// One async mutex per project+environment, so registry read-modify-write
/// cycles for the same pair never interleave.
#[derive(Default)]
pub struct ProjectLocks {
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `project` in `environment`. Released on drop.
    pub async fn acquire(
        &self,
        project: &str,
        environment: Environment,
    ) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| OrchestratorError::Store("project lock table poisoned".into()))?;
            // Only the table holds these: nobody owns or waits on them.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry((project.to_string(), environment))
                .or_default()
                .clone()
        };
        Ok(lock.lock_owned().await)
    }

    pub fn tracked(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_pair_is_exclusive() {
        let locks = Arc::new(ProjectLocks::new());
        let guard = locks.acquire("demo", Environment::Production).await.unwrap();

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("demo", Environment::Production).await.unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn different_pairs_do_not_block() {
        let locks = ProjectLocks::new();
        let _prod = locks.acquire("demo", Environment::Production).await.unwrap();
        let _staging = tokio::time::timeout(
            Duration::from_secs(1),
            locks.acquire("demo", Environment::Staging),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(locks.tracked(), 2);
    }

    #[tokio::test]
    async fn idle_entries_are_evicted() {
        let locks = ProjectLocks::new();
        drop(locks.acquire("demo", Environment::Production).await.unwrap());
        drop(locks.acquire("shop", Environment::Production).await.unwrap());
        let _held = locks.acquire("api", Environment::Preview).await.unwrap();
        assert_eq!(locks.tracked(), 1);
    }
}

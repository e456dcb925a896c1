use std::collections::HashSet;

use tokio::sync::Mutex;

use crate::error::{OrchestratorError, Result};
use crate::models::{Environment, ProjectSlots};

use super::state::SlotStore;

/// Hands out blue/green port pairs from an environment's reserved range.
///
/// Blue always takes the even port of a pair and green the odd port after it.
pub struct PortAllocator {
    allocating: Mutex<()>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self {
            allocating: Mutex::new(()),
        }
    }

    /// First base port in `environment`'s range whose pair is untouched by `existing`.
    pub fn allocate(environment: Environment, existing: &[ProjectSlots]) -> Result<u16> {
        let used: HashSet<u16> = existing
            .iter()
            .filter(|slots| slots.environment == environment)
            .flat_map(|slots| slots.ports())
            .collect();

        let range = environment.port_range();
        let (start, end) = (*range.start(), *range.end());
        (start..end)
            .step_by(2)
            .find(|port| !used.contains(port) && !used.contains(&(port + 1)))
            .ok_or(OrchestratorError::NoPortAvailable(environment))
    }

    /// Create and persist a fresh registry for a project that has none yet.
    ///
    /// Allocation is serialized so two first deploys can't claim the same pair.
    pub async fn initialize(
        &self,
        store: &SlotStore,
        project_name: &str,
        team_id: &str,
        environment: Environment,
    ) -> Result<ProjectSlots> {
        let _guard = self.allocating.lock().await;
        let existing = store.list_all().await?;
        let base_port = Self::allocate(environment, &existing)?;
        let slots = ProjectSlots::new(project_name, team_id, environment, base_port);
        store.upsert(&slots).await?;
        tracing::info!(
            project = project_name,
            %environment,
            blue = base_port,
            green = base_port + 1,
            "allocated slot ports"
        );
        Ok(slots)
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::state::{MemorySlotBackend, SlotBackend};
    use std::sync::Arc;

    fn registry(name: &str, environment: Environment, base: u16) -> ProjectSlots {
        ProjectSlots::new(name, "team-a", environment, base)
    }

    #[test]
    fn first_project_gets_range_start() {
        let port = PortAllocator::allocate(Environment::Production, &[]).unwrap();
        assert_eq!(port, 4100);
    }

    #[test]
    fn skips_used_pairs() {
        let existing = vec![
            registry("a", Environment::Staging, 4500),
            registry("b", Environment::Staging, 4502),
        ];
        assert_eq!(
            PortAllocator::allocate(Environment::Staging, &existing).unwrap(),
            4504
        );
    }

    #[test]
    fn reuses_gaps() {
        let existing = vec![
            registry("a", Environment::Preview, 5000),
            registry("c", Environment::Preview, 5004),
        ];
        assert_eq!(
            PortAllocator::allocate(Environment::Preview, &existing).unwrap(),
            5002
        );
    }

    #[test]
    fn half_used_pair_is_skipped() {
        let mut odd = registry("a", Environment::Production, 4100);
        odd.blue.port = None;
        // Only 4101 is taken, so the 4100/4101 pair is unusable.
        let port = PortAllocator::allocate(Environment::Production, &[odd]).unwrap();
        assert_eq!(port, 4102);
    }

    #[test]
    fn other_environments_do_not_collide() {
        let existing = vec![registry("a", Environment::Staging, 4500)];
        assert_eq!(
            PortAllocator::allocate(Environment::Production, &existing).unwrap(),
            4100
        );
    }

    #[test]
    fn allocated_port_is_even_and_in_range() {
        for environment in Environment::ALL {
            let port = PortAllocator::allocate(environment, &[]).unwrap();
            assert_eq!(port % 2, 0);
            assert!(environment.port_range().contains(&port));
            assert!(environment.port_range().contains(&(port + 1)));
        }
    }

    #[test]
    fn exhausted_range_fails() {
        let range = Environment::Production.port_range();
        let existing: Vec<ProjectSlots> = (*range.start()..*range.end())
            .step_by(2)
            .map(|base| registry(&format!("p{base}"), Environment::Production, base))
            .collect();
        assert_eq!(existing.len(), 200);
        assert!(matches!(
            PortAllocator::allocate(Environment::Production, &existing),
            Err(OrchestratorError::NoPortAvailable(Environment::Production))
        ));
    }

    #[tokio::test]
    async fn initialize_persists_the_reserved_pair() {
        let store = SlotStore::new(
            Arc::new(MemorySlotBackend::new()),
            Arc::new(MemorySlotBackend::new()),
        );
        let allocator = PortAllocator::new();
        let first = allocator
            .initialize(&store, "demo", "team-a", Environment::Production)
            .await
            .unwrap();
        let second = allocator
            .initialize(&store, "shop", "team-a", Environment::Production)
            .await
            .unwrap();
        assert_eq!(first.blue.port, Some(4100));
        assert_eq!(second.blue.port, Some(4102));
        assert_eq!(second.green.port, Some(4103));
        assert_eq!(store.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn pairs_known_only_to_the_mirror_stay_reserved() {
        let secondary = Arc::new(MemorySlotBackend::new());
        secondary
            .put(&registry("demo", Environment::Production, 4100))
            .await
            .unwrap();
        let store = SlotStore::new(Arc::new(MemorySlotBackend::new()), secondary);

        let shop = PortAllocator::new()
            .initialize(&store, "shop", "team-a", Environment::Production)
            .await
            .unwrap();
        assert_eq!(shop.blue.port, Some(4102));
        assert_eq!(shop.green.port, Some(4103));
    }
}

//! VM allocation policy: initial placement and migration decisions.

use crate::core::config::SimulationConfig;
use crate::core::error::ConfigError;
use crate::core::migration_policy::{MigrationPlan, MigrationPolicy, MigrationThresholds, ThresholdMigrationPolicy};
use crate::core::resource_pool::{ResourcePoolState, VmInfo};
use crate::core::vm::VmSpec;
use crate::core::vm_placement_algorithm::{placement_algorithm_resolver, VmPlacementAlgorithm};
use crate::core::vm_selection_policy::selection_policy_resolver;

/// Combines a placement algorithm for new VMs with an optional migration policy.
#[derive(Clone)]
pub struct VmAllocationPolicy {
    placement: Box<dyn VmPlacementAlgorithm>,
    migration: Option<Box<dyn MigrationPolicy>>,
}

impl VmAllocationPolicy {
    pub fn new(placement: Box<dyn VmPlacementAlgorithm>) -> Self {
        Self {
            placement,
            migration: None,
        }
    }

    pub fn with_migration(mut self, migration: Box<dyn MigrationPolicy>) -> Self {
        self.migration = Some(migration);
        self
    }

    /// Builds the policy from the placement algorithm and migration settings of the config.
    pub fn from_config(config: &SimulationConfig) -> Result<Self, ConfigError> {
        let mut policy = Self::new(placement_algorithm_resolver(&config.vm_placement_algorithm)?);
        let migration = &config.migration;
        let thresholds = MigrationThresholds::new(
            migration.under_utilization_threshold,
            migration.over_utilization_threshold,
        )?;
        let selection = selection_policy_resolver(&migration.selection_policy)?;
        if migration.enabled {
            policy = policy.with_migration(Box::new(ThresholdMigrationPolicy::new(thresholds, selection)));
        }
        Ok(policy)
    }

    pub fn migration_enabled(&self) -> bool {
        self.migration.is_some()
    }

    /// Thresholds of the migration policy, `None` if migration is disabled.
    pub fn migration_thresholds(&self) -> Option<MigrationThresholds> {
        self.migration.as_ref().map(|m| m.thresholds())
    }

    /// Returns the host for a new VM or `None` if no host can take it.
    pub fn find_host_for_vm(&self, vm: &VmSpec, pool_state: &ResourcePoolState) -> Option<u32> {
        self.placement.select_host(&VmInfo::from_spec(vm), pool_state)
    }

    pub fn plan_migrations(&self, pool_state: &ResourcePoolState) -> MigrationPlan {
        match &self.migration {
            Some(migration) => migration.plan(pool_state),
            None => MigrationPlan::default(),
        }
    }
}

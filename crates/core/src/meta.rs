use serde::{Deserialize, Serialize};

use crate::pricing::DEFAULT_MIN_COST;

/// Capabilities a provider advertises to the marketplace.
///
/// Carried in the node's `register` message and refreshed on re-register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicMetaInfo {
    /// Models installed on the node.
    #[serde(default)]
    pub models: Vec<String>,
    pub gpu_type: String,
    pub ncpu: u32,
    /// RAM in gigabytes.
    pub ram: u64,
    /// Lowest price the provider accepts for one task.
    #[serde(default = "default_min_cost")]
    pub min_cost: u32,
}

fn default_min_cost() -> u32 {
    DEFAULT_MIN_COST
}

/// Operator-private provider data. Never serialized to clients or nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrivateMetaInfo {
    pub succeeded_tasks: u64,
    pub failed_tasks: u64,
}

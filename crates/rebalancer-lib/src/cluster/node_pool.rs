//! Node-pool resize interface

use crate::error::ClusterError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

/// Cloud-provider node pool resizing
#[async_trait]
pub trait NodePoolResizer: Send + Sync {
    /// Request `desired` nodes in `pool`
    async fn resize(&self, pool: &str, desired: u32) -> Result<(), ClusterError>;
}

/// Records pool sizes in memory
#[derive(Debug, Default)]
pub struct SimulatedNodePool {
    sizes: RwLock<HashMap<String, u32>>,
}

impl SimulatedNodePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn size(&self, pool: &str) -> Option<u32> {
        self.sizes.read().await.get(pool).copied()
    }
}

#[async_trait]
impl NodePoolResizer for SimulatedNodePool {
    async fn resize(&self, pool: &str, desired: u32) -> Result<(), ClusterError> {
        info!(pool, desired, "Simulated node pool resize");
        self.sizes.write().await.insert(pool.to_string(), desired);
        Ok(())
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::stores::{ProcessorConfigStore, StoreError};

use super::{GatewayClient, GatewayClientFactory, GatewayError};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Failed to load payment processors: {0}")]
    Lookup(#[from] StoreError),
    #[error("Failed to build client for processor {processor_id}: {source}")]
    Client {
        processor_id: i64,
        #[source]
        source: GatewayError,
    },
}

/// One gateway client per configured recurring processor, built for a single run.
#[derive(Default, Clone)]
pub struct GatewayRegistry {
    clients: BTreeMap<i64, Arc<dyn GatewayClient>>,
}

impl GatewayRegistry {
    /// Loads every recurring-capable processor in scope and builds a client for it.
    ///
    /// No processors is not an error: the registry is simply empty.
    pub async fn build(
        processors: &dyn ProcessorConfigStore,
        factory: &dyn GatewayClientFactory,
        domain_id: Option<i64>,
    ) -> Result<Self, RegistryError> {
        let configs = processors.find_recurring_processors(domain_id).await?;

        let mut clients = BTreeMap::new();
        for config in &configs {
            let client = factory.build(config).map_err(|source| RegistryError::Client {
                processor_id: config.id,
                source,
            })?;
            clients.insert(config.id, client);
        }

        info!(
            "Built {} eWAY token client(s) for domain {:?}",
            clients.len(),
            domain_id
        );

        Ok(Self { clients })
    }

    pub fn from_clients(clients: impl IntoIterator<Item = (i64, Arc<dyn GatewayClient>)>) -> Self {
        Self {
            clients: clients.into_iter().collect(),
        }
    }

    /// Processor ids in ascending order.
    pub fn processor_ids(&self) -> Vec<i64> {
        self.clients.keys().copied().collect()
    }

    pub fn get(&self, processor_id: i64) -> Option<Arc<dyn GatewayClient>> {
        self.clients.get(&processor_id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

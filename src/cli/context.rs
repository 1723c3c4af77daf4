//! Wiring shared by the subcommands: store, connector and services built
//! from one configuration.

use super::config::CourierConfig;
use courier::messenger::{
    ActionService, AuthFlowStore, AuthService, Connector, GatewayConnector, ListenerPool,
};
use courier::store::SqliteStore;
use std::sync::Arc;

pub struct Context {
    pub config: CourierConfig,
    pub store: Arc<SqliteStore>,
    pub connector: Arc<dyn Connector>,
}

impl Context {
    /// Open the database and build the gateway connector.
    pub async fn open(config: CourierConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store = SqliteStore::open(&config.database.path).await.map_err(|e| {
            format!(
                "Failed to open database '{}': {}",
                config.database.path.display(),
                e
            )
        })?;
        let connector = GatewayConnector::new(config.gateway_config())
            .map_err(|e| format!("Failed to create gateway client: {}", e))?;

        Ok(Self {
            config,
            store: Arc::new(store),
            connector: Arc::new(connector),
        })
    }

    pub fn auth_service(&self) -> AuthService {
        AuthService::new(
            self.connector.clone(),
            self.store.clone(),
            Arc::new(AuthFlowStore::new()),
            self.config.auth_settings(),
        )
    }

    pub fn action_service(&self) -> ActionService {
        ActionService::new(self.connector.clone(), self.store.clone())
    }

    pub fn listener_pool(&self) -> ListenerPool {
        ListenerPool::new(
            self.connector.clone(),
            self.store.clone(),
            self.store.clone(),
            self.config.backoff_policy(),
        )
    }
}

//! Wiring of stores, directory source and gateway adapters from config

use crate::config::{AppConfig, DatabaseBackend, DirectoryProvider, GatewayAdapter};
use crate::error::{CliError, Result};
use std::sync::Arc;
use vpn_identity::{DirectorySource, FileDirectory, GraphDirectory};
use vpn_sessions::{FortiGateRestController, PortalGroups, SshCliController, VpnSessionController};
use vpn_sync::{Reconciler, SessionTerminator};
use vpn_users::{AuditSink, InMemoryStore, PgStore, Storage, SyncBackend};

/// One store seen through the interfaces its consumers need.
#[derive(Clone)]
pub struct StorageHandles {
    pub storage: Arc<dyn Storage>,
    pub sync: Arc<dyn SyncBackend>,
    pub audit: Arc<dyn AuditSink>,
}

impl StorageHandles {
    pub fn from_store<S: Storage + 'static>(store: Arc<S>) -> Self {
        Self {
            storage: store.clone(),
            sync: store.clone(),
            audit: store,
        }
    }
}

#[derive(Clone)]
struct Gateway {
    sessions: Arc<dyn VpnSessionController>,
    portal: Option<Arc<dyn PortalGroups>>,
}

/// Everything a command needs. Storage is opened eagerly; the directory
/// source and gateway are built on first use so that commands which do not
/// touch them work without their settings.
pub struct AppContext {
    config: AppConfig,
    stores: StorageHandles,
    postgres: Option<PgStore>,
    directory: Option<Arc<dyn DirectorySource>>,
    gateway: Option<Gateway>,
}

impl AppContext {
    pub async fn connect(config: AppConfig) -> Result<Self> {
        match config.database.backend {
            DatabaseBackend::Postgres => {
                let store = PgStore::connect(&config.database.url, config.database.max_connections)
                    .await?
                    .with_batch_size(config.sync.batch_size);
                let stores = StorageHandles::from_store(Arc::new(store.clone()));
                Ok(Self::with_stores(config, stores, Some(store)))
            }
            DatabaseBackend::Memory => {
                let store = Arc::new(InMemoryStore::new().with_batch_size(config.sync.batch_size));
                Ok(Self::with_stores(config, StorageHandles::from_store(store), None))
            }
        }
    }

    pub fn with_stores(config: AppConfig, stores: StorageHandles, postgres: Option<PgStore>) -> Self {
        Self {
            config,
            stores,
            postgres,
            directory: None,
            gateway: None,
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn DirectorySource>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_gateway(
        mut self,
        sessions: Arc<dyn VpnSessionController>,
        portal: Option<Arc<dyn PortalGroups>>,
    ) -> Self {
        self.gateway = Some(Gateway { sessions, portal });
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn stores(&self) -> &StorageHandles {
        &self.stores
    }

    pub fn postgres(&self) -> Option<&PgStore> {
        self.postgres.as_ref()
    }

    pub fn directory(&self) -> Result<Arc<dyn DirectorySource>> {
        if let Some(directory) = &self.directory {
            return Ok(directory.clone());
        }

        let settings = &self.config.directory;
        let filter = settings.domain_filter()?;
        match settings.provider {
            DirectoryProvider::Graph => Ok(Arc::new(GraphDirectory::new(
                settings.graph_config(),
                filter,
            )?)),
            DirectoryProvider::File => {
                let path = settings.file_path.as_ref().ok_or_else(|| {
                    CliError::ConfigError("directory.file_path is required for the file provider".to_string())
                })?;
                Ok(Arc::new(FileDirectory::new(path, Some(filter))))
            }
        }
    }

    fn gateway(&self) -> Result<Gateway> {
        if let Some(gateway) = &self.gateway {
            return Ok(gateway.clone());
        }

        let settings = &self.config.gateway;
        match settings.adapter {
            GatewayAdapter::Ssh => {
                let controller = Arc::new(SshCliController::connect(settings.ssh_config())?);
                Ok(Gateway {
                    sessions: controller.clone(),
                    portal: Some(controller),
                })
            }
            GatewayAdapter::Rest => Ok(Gateway {
                sessions: Arc::new(FortiGateRestController::new(settings.rest_config())?),
                portal: None,
            }),
        }
    }

    pub fn sessions(&self) -> Result<Arc<dyn VpnSessionController>> {
        Ok(self.gateway()?.sessions)
    }

    pub fn portal_groups(&self) -> Result<Arc<dyn PortalGroups>> {
        self.gateway()?.portal.ok_or_else(|| {
            CliError::Unsupported("portal group management needs the ssh gateway adapter".to_string())
        })
    }

    pub fn reconciler(&self) -> Result<Arc<Reconciler>> {
        let terminator = SessionTerminator::new(
            self.sessions()?,
            self.stores.audit.clone(),
            self.config.sync.terminator_config(),
        );
        Ok(Arc::new(Reconciler::new(
            self.directory()?,
            self.stores.sync.clone(),
            terminator,
        )))
    }
}

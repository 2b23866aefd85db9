use super::DataService;
use crate::protocol::SyncError;
use crate::remote::{HttpRemote, RemoteStore};
use crate::sync::engine::{SyncConfig, SyncEngine};
use crate::sync::network::NetworkMonitor;
use crate::sync::store::LocalStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

enum StorageTarget {
    Path(PathBuf),
    Default(String),
    Detached,
}

/// Builds a [`DataService`] with all collaborators wired explicitly:
/// local store, remote store, network monitor, and a started sync engine.
/// Tests substitute their own [`RemoteStore`] via [`remote`].
///
/// [`remote`]: DataServiceBuilder::remote
pub struct DataServiceBuilder {
    base_url: Option<String>,
    token: Option<String>,
    remote: Option<Arc<dyn RemoteStore>>,
    storage: StorageTarget,
    config: SyncConfig,
    initially_online: bool,
}

impl DataServiceBuilder {
    pub fn new(owner_id: &str) -> Self {
        Self {
            base_url: None,
            token: None,
            remote: None,
            storage: StorageTarget::Default("daylog".to_string()),
            config: SyncConfig::new(owner_id),
            initially_online: true,
        }
    }

    /// Base URL of the HTTP remote store.
    pub fn base_url(mut self, url: &str) -> Self {
        self.base_url = Some(url.to_string());
        self
    }

    /// Bearer token for the HTTP remote store.
    pub fn auth_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Use a caller-supplied remote store instead of HTTP.
    pub fn remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Store the local cache at an explicit path.
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage = StorageTarget::Path(path.into());
        self
    }

    /// Store the local cache in the user data directory under `app_name`.
    pub fn app_name(mut self, app_name: &str) -> Self {
        self.storage = StorageTarget::Default(app_name.to_string());
        self
    }

    /// Run without a storage medium: every local operation becomes a
    /// no-op returning an empty result.
    pub fn detached(mut self) -> Self {
        self.storage = StorageTarget::Detached;
        self
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.config.sync_interval = interval;
        self
    }

    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.config.remote_timeout = timeout;
        self
    }

    /// Disable the periodic timer; cycles then run only on connectivity
    /// transitions, writes, and explicit force-sync.
    pub fn auto_sync(mut self, enabled: bool) -> Self {
        self.config.auto_sync = enabled;
        self
    }

    pub fn initially_online(mut self, online: bool) -> Self {
        self.initially_online = online;
        self
    }

    pub async fn build(self) -> Result<DataService, SyncError> {
        let store = match self.storage {
            StorageTarget::Path(path) => LocalStore::open(path)?,
            StorageTarget::Default(app_name) => LocalStore::open_default(&app_name)?,
            StorageTarget::Detached => LocalStore::detached(),
        };
        let store = Arc::new(Mutex::new(store));

        let remote: Arc<dyn RemoteStore> = match self.remote {
            Some(remote) => remote,
            None => {
                let base_url = self.base_url.ok_or_else(|| {
                    SyncError::Connection("no remote base URL configured".to_string())
                })?;
                let mut http = HttpRemote::new(&base_url);
                if let Some(token) = &self.token {
                    http.set_token(token);
                }
                Arc::new(http)
            }
        };

        let network = NetworkMonitor::new(self.initially_online);
        let mut engine = SyncEngine::new(store.clone(), remote, network.clone(), self.config);
        engine.start();

        Ok(DataService::new(store, network, engine))
    }
}

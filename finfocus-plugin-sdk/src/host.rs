//! Launching and releasing the set of plugins one invocation works with.
//!
//! The engine owns its plugin clients for exactly one operation: launch
//! everything installed (or an explicit subset), run the operation, close
//! everything. [`PluginSet`] packages that lifecycle so callers cannot
//! forget the close-all half.

use crate::client::{CostSource, PluginClient};
use crate::error::PluginError;
use crate::registry::{InstalledPlugin, PluginRegistry};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// The launched plugin clients for one invocation.
pub struct PluginSet {
    clients: Vec<Arc<PluginClient>>,
}

impl PluginSet {
    /// Launch every installed plugin at its resolved (greatest) version.
    ///
    /// Plugins that fail to launch are skipped with a WARN; an invocation
    /// with some working plugins is more useful than none. Returns an
    /// error only when nothing could be scanned at all.
    pub async fn launch_installed(
        registry: &PluginRegistry,
        home_dir: &Path,
    ) -> Result<Self, PluginError> {
        let installed = registry.list()?;
        let mut newest: Vec<InstalledPlugin> = Vec::new();
        for plugin in installed {
            // list() is sorted name-ascending, version-descending; keep the
            // first entry per name.
            if newest.last().map(|p: &InstalledPlugin| p.name.as_str()) != Some(plugin.name.as_str()) {
                newest.push(plugin);
            }
        }

        let mut clients = Vec::with_capacity(newest.len());
        for plugin in newest {
            let options = registry.launch_options(&plugin, home_dir);
            match PluginClient::launch(options).await {
                Ok(client) => {
                    info!(plugin = %plugin.name, version = %plugin.version, "plugin launched");
                    clients.push(Arc::new(client));
                }
                Err(err) => {
                    warn!(plugin = %plugin.name, error = %err, "skipping plugin that failed to launch");
                }
            }
        }
        Ok(Self { clients })
    }

    /// Wrap already-launched clients.
    pub fn from_clients(clients: Vec<Arc<PluginClient>>) -> Self {
        Self { clients }
    }

    /// Number of live clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no plugin launched.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// The clients as engine-facing cost sources.
    pub fn sources(&self) -> Vec<Arc<dyn CostSource>> {
        self.clients
            .iter()
            .map(|client| Arc::clone(client) as Arc<dyn CostSource>)
            .collect()
    }

    /// Close every client. Close failures are logged, not propagated: the
    /// invocation is over either way, and close is idempotent.
    pub async fn close_all(&self) {
        for client in &self.clients {
            if let Err(err) = client.close().await {
                warn!(plugin = %client.name(), error = %err, "plugin close failed");
            }
        }
    }
}

//! Background manager initialization.
//!
//! Each eager manager starts in its own task so a missing backend never
//! delays the socket. Network is retried until it comes up; the others get
//! one attempt. The print manager is lazy and only built by
//! [`cups_factory`] when someone subscribes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dank_services::brightness::BrightnessManager;
use dank_services::cups::{self, CupsManager, SystemCommands};
use dank_services::network::{self, NetworkManager};
use dank_services::ManagerError;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::registry::{ManagerFactory, ManagerRegistry, ServiceKind, lazy_factory};
use crate::router::ManagerDyn;

pub const DEFAULT_NETWORK_RETRY: Duration = Duration::from_secs(30);
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class";

#[derive(Debug, Clone)]
pub struct InitConfig {
    /// Root holding `backlight`, `leds` and `net`.
    pub sysfs_root: PathBuf,
    pub network_retry: Duration,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            network_retry: DEFAULT_NETWORK_RETRY,
        }
    }
}

/// Builds the CUPS manager on first subscription.
pub fn cups_factory() -> ManagerFactory {
    lazy_factory(|| async {
        let manager = CupsManager::start(SystemCommands, cups::POLL_INTERVAL).await?;
        Ok::<_, ManagerError>(manager as Arc<dyn ManagerDyn>)
    })
}

/// Start every eager initializer. Abort the returned set to give up on
/// pending retries.
pub fn spawn_initializers(registry: Arc<ManagerRegistry>, config: InitConfig) -> JoinSet<()> {
    let mut tasks = JoinSet::new();
    tasks.spawn(init_brightness(registry.clone(), config.sysfs_root.clone()));
    tasks.spawn(init_network(registry, config.sysfs_root, config.network_retry));
    tasks
}

async fn init_brightness(registry: Arc<ManagerRegistry>, root: PathBuf) {
    match BrightnessManager::new(root) {
        Ok(manager) => {
            registry.publish(ServiceKind::Brightness, Arc::new(manager));
        }
        Err(e) => warn!("Brightness manager unavailable: {e}"),
    }
}

async fn init_network(registry: Arc<ManagerRegistry>, root: PathBuf, retry: Duration) {
    let mut attempt = 1u32;
    loop {
        match NetworkManager::start(&root, network::POLL_INTERVAL) {
            Ok(manager) => {
                registry.publish(ServiceKind::Network, manager);
                return;
            }
            Err(e) if attempt == 1 => {
                warn!("Network manager unavailable, retrying every {}s: {e}", retry.as_secs());
            }
            Err(e) => debug!("Network manager attempt {attempt} failed: {e}"),
        }
        attempt += 1;
        tokio::time::sleep(retry).await;
    }
}

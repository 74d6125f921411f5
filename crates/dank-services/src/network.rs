//! Read-only network interface manager over sysfs `net`.
//!
//! Polls interface link state and pushes the full state when it changes.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dank_protocol::{HandlerError, HandlerResult, Methods, Params, Services};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::params::str_param;
use crate::{Manager, ManagerError, Subscribers};

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    Wifi,
    Ethernet,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    pub name: String,
    pub kind: InterfaceKind,
    /// Raw `operstate` (`up`, `down`, `dormant`, ...)
    pub state: String,
    pub carrier: bool,
    pub mac_address: String,
}

impl Interface {
    pub fn is_connected(&self) -> bool {
        self.state == "up" && self.carrier
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkState {
    pub interfaces: Vec<Interface>,
    pub connected: bool,
    /// First connected interface, wired preferred.
    pub primary_interface: Option<String>,
}

impl NetworkState {
    fn from_interfaces(mut interfaces: Vec<Interface>) -> Self {
        interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        let primary = interfaces
            .iter()
            .filter(|i| i.is_connected())
            .min_by_key(|i| i.kind != InterfaceKind::Ethernet)
            .map(|i| i.name.clone());
        Self {
            connected: primary.is_some(),
            primary_interface: primary,
            interfaces,
        }
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn read_interfaces(net_dir: &Path) -> Result<Vec<Interface>, ManagerError> {
    let entries = std::fs::read_dir(net_dir).map_err(|e| ManagerError::io(net_dir, e))?;

    let mut interfaces = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "lo" {
            continue;
        }
        let path = entry.path();
        let kind = if path.join("wireless").exists() || path.join("phy80211").exists() {
            InterfaceKind::Wifi
        } else {
            InterfaceKind::Ethernet
        };
        interfaces.push(Interface {
            kind,
            state: read_trimmed(&path.join("operstate")).unwrap_or_else(|| "unknown".into()),
            // Reading `carrier` fails with EINVAL while the link is down.
            carrier: read_trimmed(&path.join("carrier")).is_some_and(|c| c == "1"),
            mac_address: read_trimmed(&path.join("address")).unwrap_or_default(),
            name,
        });
    }
    Ok(interfaces)
}

pub struct NetworkManager {
    net_dir: PathBuf,
    state: RwLock<NetworkState>,
    subscribers: Subscribers<Value>,
    stop: watch::Sender<bool>,
}

impl NetworkManager {
    /// Read `<root>/net` and start polling it. Fails if the directory cannot
    /// be read.
    pub fn start(root: impl AsRef<Path>, interval: Duration) -> Result<Arc<Self>, ManagerError> {
        let net_dir = root.as_ref().join("net");
        let state = NetworkState::from_interfaces(read_interfaces(&net_dir)?);
        info!(
            "Network manager tracking {} interface(s)",
            state.interfaces.len()
        );

        let (stop, stop_rx) = watch::channel(false);
        let manager = Arc::new(Self {
            net_dir,
            state: RwLock::new(state),
            subscribers: Subscribers::new(),
            stop,
        });
        tokio::spawn(poll_loop(Arc::downgrade(&manager), interval, stop_rx));
        Ok(manager)
    }

    pub fn snapshot(&self) -> NetworkState {
        self.state.read().clone()
    }

    /// Re-read interfaces. Returns true and notifies if the state changed.
    pub fn refresh(&self) -> bool {
        let interfaces = match read_interfaces(&self.net_dir) {
            Ok(interfaces) => interfaces,
            Err(e) => {
                debug!("Network poll failed: {e}");
                return false;
            }
        };
        let new_state = NetworkState::from_interfaces(interfaces);
        {
            let mut state = self.state.write();
            if *state == new_state {
                return false;
            }
            *state = new_state;
        }
        self.subscribers.notify(self.state());
        true
    }
}

async fn poll_loop(manager: Weak<NetworkManager>, interval: Duration, mut stop: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop.wait_for(|stopped| *stopped) => break,
        }
        let Some(manager) = manager.upgrade() else { break };
        manager.refresh();
    }
    debug!("Network poller stopped");
}

impl Manager for NetworkManager {
    fn capability(&self) -> &'static str {
        Services::NETWORK
    }

    async fn handle(&self, method: &str, params: Params) -> HandlerResult {
        match method {
            Methods::NETWORK_GET_STATE => Ok(self.state()),
            Methods::NETWORK_INFO => {
                let name = str_param(&params, "interface")?;
                let state = self.state.read();
                let interface = state
                    .interfaces
                    .iter()
                    .find(|i| i.name == name)
                    .ok_or_else(|| HandlerError::failed(format!("interface not found: {name}")))?;
                serde_json::to_value(interface).map_err(|e| HandlerError::context("encode interface", e))
            }
            _ => Err(HandlerError::unknown_method(method)),
        }
    }

    fn state(&self) -> Value {
        serde_json::to_value(self.snapshot()).unwrap_or(Value::Null)
    }

    fn subscribe(&self, id: &str) -> broadcast::Receiver<Value> {
        self.subscribers.subscribe(id)
    }

    fn unsubscribe(&self, id: &str) {
        self.subscribers.unsubscribe(id);
    }

    async fn close(&self) {
        self.stop.send_replace(true);
        self.subscribers.clear();
    }
}

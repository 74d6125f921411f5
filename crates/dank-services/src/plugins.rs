//! Installed-plugin management over the local plugins directory.
//!
//! Always available. Registry-backed operations (browse, install, update,
//! search) need the remote plugin registry and are answered with an error.

use std::path::{Path, PathBuf};

use dank_protocol::{HandlerError, HandlerResult, Methods, Params};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::params::str_param;

const REPOS_DIR: &str = ".repos";
const META_SUFFIX: &str = ".meta";
const MANIFEST: &str = "plugin.json";

/// `$XDG_CONFIG_HOME/DankMaterialShell/plugins`
pub fn default_plugins_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("DankMaterialShell").join("plugins"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Manifest {
    id: String,
    name: String,
    author: String,
    description: String,
    version: String,
    capabilities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub author: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    pub path: String,
    pub installed: bool,
}

pub struct PluginsService {
    dir: PathBuf,
}

impl PluginsService {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every plugin directory (or symlink to one) carrying a manifest with
    /// an id. A missing plugins directory means nothing is installed.
    pub async fn list_installed(&self) -> std::io::Result<Vec<PluginInfo>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut plugins = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == REPOS_DIR || name.ends_with(META_SUFFIX) {
                continue;
            }
            let path = entry.path();
            // Follows symlinks so linked installs count as directories.
            let is_dir = tokio::fs::metadata(&path).await.is_ok_and(|meta| meta.is_dir());
            if !is_dir {
                continue;
            }
            let Some(manifest) = read_manifest(&path).await else {
                debug!("Skip {}: no usable {MANIFEST}", path.display());
                continue;
            };
            plugins.push(PluginInfo {
                name: if manifest.name.is_empty() { manifest.id.clone() } else { manifest.name },
                id: manifest.id,
                author: manifest.author,
                description: manifest.description,
                version: manifest.version,
                capabilities: manifest.capabilities,
                path: path.display().to_string(),
                installed: true,
            });
        }
        plugins.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(plugins)
    }

    /// Remove the installed plugin whose name or id is `name`. Linked
    /// installs (symlink plus `.meta`) drop both files; plain installs are
    /// removed recursively.
    pub async fn uninstall(&self, name: &str) -> Result<(), HandlerError> {
        let plugins = self
            .list_installed()
            .await
            .map_err(|e| HandlerError::context("failed to list installed plugins", e))?;
        let plugin = plugins
            .into_iter()
            .find(|p| p.name == name || p.id == name)
            .ok_or_else(|| HandlerError::failed(format!("plugin not installed: {name}")))?;

        let path = PathBuf::from(&plugin.path);
        let meta = PathBuf::from(format!("{}{META_SUFFIX}", plugin.path));
        let removed = if tokio::fs::try_exists(&meta).await.unwrap_or(false) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tokio::fs::remove_file(&meta).await,
                Err(e) => Err(e),
            }
        } else {
            tokio::fs::remove_dir_all(&path).await
        };
        removed.map_err(|e| HandlerError::context("failed to uninstall plugin", e))?;

        info!("Uninstalled plugin {}", plugin.id);
        Ok(())
    }

    pub async fn handle(&self, method: &str, params: Params) -> HandlerResult {
        match method {
            Methods::PLUGINS_LIST_INSTALLED => {
                let plugins = self
                    .list_installed()
                    .await
                    .map_err(|e| HandlerError::context("failed to list installed plugins", e))?;
                serde_json::to_value(plugins).map_err(|e| HandlerError::context("encode plugins", e))
            }
            Methods::PLUGINS_UNINSTALL => {
                let name = str_param(&params, "name")?;
                self.uninstall(name).await?;
                Ok(json!({ "success": true, "message": format!("plugin uninstalled: {name}") }))
            }
            Methods::PLUGINS_LIST
            | Methods::PLUGINS_INSTALL
            | Methods::PLUGINS_UPDATE
            | Methods::PLUGINS_SEARCH => Err(HandlerError::failed(format!(
                "{method} requires the plugin registry, which is not available"
            ))),
            _ => Err(HandlerError::unknown_method(method)),
        }
    }
}

async fn read_manifest(dir: &Path) -> Option<Manifest> {
    let data = tokio::fs::read(dir.join(MANIFEST)).await.ok()?;
    let manifest: Manifest = serde_json::from_slice(&data).ok()?;
    (!manifest.id.is_empty()).then_some(manifest)
}

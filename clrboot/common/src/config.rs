//! Path resolution backed by the launcher's `ReloadedII.json`.
//!
//! The launcher writes this file on every start, so it is the single source of
//! truth for where the loader and launcher live. Environment variables and
//! module-relative guesses are not consulted.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Artifact, ConfigurationError};
use crate::paths::{require, BootstrapPaths, PathResolver};

pub const CONFIG_DIRECTORY: &str = "Reloaded-Mod-Loader-II";
pub const CONFIG_FILE_NAME: &str = "ReloadedII.json";

#[cfg(target_pointer_width = "64")]
const LOADER_PATH_KEY: &str = "LoaderPath64";
#[cfg(not(target_pointer_width = "64"))]
const LOADER_PATH_KEY: &str = "LoaderPath32";
const LAUNCHER_PATH_KEY: &str = "LauncherPath";

/// The subset of the launcher configuration the bootstrapper reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    #[serde(rename = "LoaderPath32", skip_serializing_if = "Option::is_none")]
    pub loader_path_32: Option<PathBuf>,
    #[serde(rename = "LoaderPath64", skip_serializing_if = "Option::is_none")]
    pub loader_path_64: Option<PathBuf>,
    #[serde(rename = "LauncherPath", skip_serializing_if = "Option::is_none")]
    pub launcher_path: Option<PathBuf>,
}

impl LoaderConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        if !path.exists() {
            return Err(ConfigurationError::MissingArtifact {
                artifact: Artifact::LoaderConfig,
                path: path.to_path_buf(),
                remediation: Some("Start the launcher once to create it.".into()),
            });
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigurationError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;

        // Files saved by some editors start with a UTF-8 byte order mark
        let content = content.strip_prefix('\u{feff}').unwrap_or(&content);

        serde_json::from_str(content).map_err(|source| ConfigurationError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loader assembly matching the bitness of this module.
    pub fn loader_path(&self) -> Option<&Path> {
        if cfg!(target_pointer_width = "64") {
            self.loader_path_64.as_deref()
        } else {
            self.loader_path_32.as_deref()
        }
    }

    pub fn launcher_path(&self) -> Option<&Path> {
        self.launcher_path.as_deref()
    }
}

/// Runtime configuration that sits next to a managed assembly.
pub fn runtime_config_for(assembly: &Path) -> PathBuf {
    assembly.with_extension("runtimeconfig.json")
}

pub struct JsonConfigResolver {
    config_path: Option<PathBuf>,
    module_path: Option<PathBuf>,
}

impl JsonConfigResolver {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: Some(config_path.into()),
            module_path: None,
        }
    }

    /// Uses `%APPDATA%\Reloaded-Mod-Loader-II\ReloadedII.json`.
    pub fn from_app_data() -> Self {
        let config_path = std::env::var_os("APPDATA").map(|app_data| {
            PathBuf::from(app_data)
                .join(CONFIG_DIRECTORY)
                .join(CONFIG_FILE_NAME)
        });
        Self {
            config_path,
            module_path: None,
        }
    }

    /// Location of the bootstrapper itself, used in uninstall hints.
    pub fn with_module_path(mut self, module_path: impl Into<PathBuf>) -> Self {
        self.module_path = Some(module_path.into());
        self
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    fn missing_loader_hint(&self) -> String {
        let mut hint = String::from("To fix this, start the launcher.");
        if let Some(module_path) = &self.module_path {
            hint.push_str(&format!(
                "\n\nIf you intended to uninstall, delete:\n\n{}",
                module_path.display()
            ));
        }
        hint
    }
}

impl PathResolver for JsonConfigResolver {
    fn resolve(&self) -> Result<BootstrapPaths, ConfigurationError> {
        let config_path = self
            .config_path
            .as_deref()
            .ok_or(ConfigurationError::AppDataUnavailable)?;
        debug!("Reading loader configuration from {:?}", config_path);
        let config = LoaderConfig::load(config_path)?;

        let loader = config
            .loader_path()
            .ok_or_else(|| ConfigurationError::MissingKey {
                artifact: Artifact::ManagedAssembly,
                key: LOADER_PATH_KEY,
                config: config_path.to_path_buf(),
            })?;
        let managed_assembly = require(
            Artifact::ManagedAssembly,
            loader.to_path_buf(),
            Some(self.missing_loader_hint()),
        )?;

        let runtime_config = require(
            Artifact::RuntimeConfig,
            runtime_config_for(&managed_assembly),
            Some("To fix this, start the launcher so it can repair the installation.".into()),
        )?;

        let launcher = config
            .launcher_path()
            .ok_or_else(|| ConfigurationError::MissingKey {
                artifact: Artifact::Launcher,
                key: LAUNCHER_PATH_KEY,
                config: config_path.to_path_buf(),
            })?;
        let launcher = require(
            Artifact::Launcher,
            launcher.to_path_buf(),
            Some("To fix this, reinstall the launcher and start it once.".into()),
        )?;

        info!("Resolved mod loader at {:?}", managed_assembly);
        Ok(BootstrapPaths::from_validated(
            managed_assembly,
            runtime_config,
            launcher,
        ))
    }
}

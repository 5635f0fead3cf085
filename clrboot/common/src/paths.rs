use std::path::{Path, PathBuf};

use crate::error::{Artifact, ConfigurationError};

/// Locations of everything needed to host the managed loader.
///
/// Every member has been checked to exist when the value was built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapPaths {
    managed_assembly: PathBuf,
    runtime_config: PathBuf,
    launcher: PathBuf,
}

impl BootstrapPaths {
    /// Validates all three paths, failing on the first one that does not exist.
    pub fn new(
        managed_assembly: impl Into<PathBuf>,
        runtime_config: impl Into<PathBuf>,
        launcher: impl Into<PathBuf>,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            managed_assembly: require(Artifact::ManagedAssembly, managed_assembly.into(), None)?,
            runtime_config: require(Artifact::RuntimeConfig, runtime_config.into(), None)?,
            launcher: require(Artifact::Launcher, launcher.into(), None)?,
        })
    }

    /// Caller has already run each path through [`require`].
    pub(crate) fn from_validated(
        managed_assembly: PathBuf,
        runtime_config: PathBuf,
        launcher: PathBuf,
    ) -> Self {
        Self {
            managed_assembly,
            runtime_config,
            launcher,
        }
    }

    pub fn managed_assembly(&self) -> &Path {
        &self.managed_assembly
    }

    pub fn runtime_config(&self) -> &Path {
        &self.runtime_config
    }

    pub fn launcher(&self) -> &Path {
        &self.launcher
    }
}

/// Returns the path unchanged if it exists, otherwise names the missing artifact.
pub(crate) fn require(
    artifact: Artifact,
    path: PathBuf,
    remediation: Option<String>,
) -> Result<PathBuf, ConfigurationError> {
    if path.exists() {
        Ok(path)
    } else {
        Err(ConfigurationError::MissingArtifact {
            artifact,
            path,
            remediation,
        })
    }
}

/// Source of [`BootstrapPaths`].
pub trait PathResolver {
    fn resolve(&self) -> Result<BootstrapPaths, ConfigurationError>;
}

impl<F> PathResolver for F
where
    F: Fn() -> Result<BootstrapPaths, ConfigurationError>,
{
    fn resolve(&self) -> Result<BootstrapPaths, ConfigurationError> {
        self()
    }
}

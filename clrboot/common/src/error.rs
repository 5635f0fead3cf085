use api::Role;
use std::fmt;
use std::path::PathBuf;

use crate::bootstrap::BootstrapState;

/// Files the bootstrapper depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    LoaderConfig,
    ManagedAssembly,
    RuntimeConfig,
    Launcher,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Artifact::LoaderConfig => "Loader configuration",
            Artifact::ManagedAssembly => "Mod loader assembly",
            Artifact::RuntimeConfig => "Mod loader runtime configuration",
            Artifact::Launcher => "Launcher executable",
        };
        f.write_str(name)
    }
}

fn hint(remediation: &Option<String>) -> String {
    match remediation {
        Some(text) => format!("\n{}", text),
        None => String::new(),
    }
}

/// A required artifact could not be located.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Failed to obtain the path of the AppData folder (APPDATA is not set)")]
    AppDataUnavailable,
    #[error("{artifact} has not been found at {}.{}", .path.display(), hint(.remediation))]
    MissingArtifact {
        artifact: Artifact,
        path: PathBuf,
        remediation: Option<String>,
    },
    #[error("{artifact} is not configured: `{key}` is missing from {}", .config.display())]
    MissingKey {
        artifact: Artifact,
        key: &'static str,
        config: PathBuf,
    },
    #[error("Failed to read {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {}: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigurationError {
    pub fn missing(artifact: Artifact, path: impl Into<PathBuf>) -> Self {
        Self::MissingArtifact {
            artifact,
            path: path.into(),
            remediation: None,
        }
    }

    /// The artifact this error is about, if it names one.
    pub fn artifact(&self) -> Option<Artifact> {
        match self {
            Self::MissingArtifact { artifact, .. } | Self::MissingKey { artifact, .. } => {
                Some(*artifact)
            }
            Self::Unreadable { .. } | Self::Malformed { .. } => Some(Artifact::LoaderConfig),
            Self::AppDataUnavailable => None,
        }
    }

    pub fn remediation(&self) -> Option<&str> {
        match self {
            Self::MissingArtifact { remediation, .. } => remediation.as_deref(),
            _ => None,
        }
    }
}

/// Errors from the native hosting API.
#[derive(Debug, thiserror::Error)]
pub enum HostingError {
    #[error("Hosting library unavailable: {0}. Did you copy nethost next to the bootstrapper?")]
    LibraryUnavailable(String),
    #[error("Hosting library has not been loaded")]
    NotLoaded,
    #[error("Runtime failed to initialize from {}: {reason}", .runtime_config.display())]
    RuntimeInit {
        runtime_config: PathBuf,
        reason: String,
    },
    #[error("Failed to resolve {type_name}::{method} in {}: {reason}", .assembly.display())]
    EntryPointNotFound {
        assembly: PathBuf,
        type_name: String,
        method: String,
        reason: String,
    },
    #[error("Path cannot be passed to the hosting API: {}", .0.display())]
    InvalidPath(PathBuf),
}

/// The launcher could not be started. The process keeps running un-rebooted.
#[derive(Debug, thiserror::Error)]
pub enum RelaunchError {
    #[error("Failed to start launcher {}: {source}", .launcher.display())]
    Spawn {
        launcher: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Fatal failure of a bootstrap attempt.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("Failed to locate the mod loader: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Failed to start the mod loader: {0}")]
    Hosting(#[from] HostingError),
}

impl BootstrapError {
    /// State the attempt was in when it failed.
    pub fn stage(&self) -> BootstrapState {
        match self {
            Self::Configuration(_) => BootstrapState::Resolving,
            Self::Hosting(_) => BootstrapState::LoadingRuntime,
        }
    }
}

/// Not an error: another actor already owns the boot sequence in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Standing down, {role} is already present in this process")]
pub struct AlreadyBootstrapped {
    pub role: Role,
}

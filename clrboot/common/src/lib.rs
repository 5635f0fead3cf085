//! Bootstrap orchestration for hosting the managed loader inside a foreign process.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod host;
pub mod marker;
pub mod paths;
pub mod relaunch;

pub use bootstrap::{BootstrapHandle, BootstrapSettings, BootstrapState, Bootstrapper, Outcome};
pub use config::{JsonConfigResolver, LoaderConfig};
pub use error::{
    AlreadyBootstrapped, Artifact, BootstrapError, ConfigurationError, HostingError, RelaunchError,
};
pub use host::{ManagedEntryPoint, RuntimeHost};
pub use marker::{InstanceMarker, LocalMarkers};
pub use paths::{BootstrapPaths, PathResolver};
pub use relaunch::{DetachedRelauncher, RelaunchCommand, Relauncher, PORTABLE_MODE_FILE};

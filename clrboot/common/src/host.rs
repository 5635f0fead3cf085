use api::EntryPointParameters;
use std::path::Path;

use crate::error::HostingError;

/// Statically named managed method the bootstrapper hands control to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedEntryPoint {
    /// Assembly qualified type name, e.g. `Namespace.Type, Assembly`.
    pub type_name: String,
    pub method_name: String,
}

impl ManagedEntryPoint {
    pub fn new(type_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            method_name: method_name.into(),
        }
    }
}

impl Default for ManagedEntryPoint {
    fn default() -> Self {
        Self::new("Reloaded.Mod.Loader.EntryPoint, Reloaded.Mod.Loader", "Initialize")
    }
}

/// Staged access to the native hosting API.
///
/// Stages are called in order, once each. None of them are retried.
pub trait RuntimeHost {
    /// Handle able to load assemblies and resolve methods in them.
    type Loader;
    /// Resolved callable managed method.
    type EntryPoint;

    /// Loads the hosting library and its required exports.
    fn load_hosting_library(&mut self) -> Result<(), HostingError>;

    /// Starts the runtime described by `runtime_config` and returns the
    /// assembly loader. The hosting context is closed before returning.
    fn initialize_for_config(&mut self, runtime_config: &Path)
        -> Result<Self::Loader, HostingError>;

    fn load_entry_point(
        &mut self,
        loader: &Self::Loader,
        assembly: &Path,
        entry_point: &ManagedEntryPoint,
    ) -> Result<Self::EntryPoint, HostingError>;

    /// Calls the entry point once with the parameter block and its size.
    /// The managed side owns everything from here on; the return code is
    /// only reported.
    fn invoke(&mut self, entry_point: &Self::EntryPoint, parameters: &EntryPointParameters<'_>)
        -> i32;
}

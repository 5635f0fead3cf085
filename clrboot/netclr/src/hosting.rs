use api::EntryPointParameters;
use common::{HostingError, ManagedEntryPoint, RuntimeHost};
use log::{debug, info};
use netcorehost::hostfxr::{DelegateLoader, Hostfxr};
use netcorehost::nethost;
use netcorehost::pdcstring::PdCString;
use std::ffi::c_void;
use std::path::Path;

/// hostfxr's default delegate signature, `int (void* arg, int size)`.
type ComponentEntryPoint = unsafe extern "system" fn(*const c_void, i32) -> i32;

/// Resolved managed `Initialize` method.
pub struct InitializeFn(ComponentEntryPoint);

fn pd_path(path: &Path) -> Result<PdCString, HostingError> {
    PdCString::from_os_str(path.as_os_str())
        .map_err(|_| HostingError::InvalidPath(path.to_path_buf()))
}

fn pd_str(value: &str) -> Result<PdCString, HostingError> {
    PdCString::from_os_str(value).map_err(|_| HostingError::InvalidPath(value.into()))
}

/// `hostfxr` based runtime host.
#[derive(Default)]
pub struct DotNetHost {
    hostfxr: Option<Hostfxr>,
}

impl DotNetHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.hostfxr.is_some()
    }
}

impl RuntimeHost for DotNetHost {
    type Loader = DelegateLoader;
    type EntryPoint = InitializeFn;

    fn load_hosting_library(&mut self) -> Result<(), HostingError> {
        // nethost locates hostfxr; loading fails if any required export is missing
        let hostfxr = nethost::load_hostfxr()
            .map_err(|e| HostingError::LibraryUnavailable(e.to_string()))?;
        debug!("Loaded hostfxr");
        self.hostfxr = Some(hostfxr);
        Ok(())
    }

    fn initialize_for_config(&mut self, runtime_config: &Path) -> Result<DelegateLoader, HostingError> {
        let hostfxr = self.hostfxr.as_ref().ok_or(HostingError::NotLoaded)?;
        let runtime_init = |reason: String| HostingError::RuntimeInit {
            runtime_config: runtime_config.to_path_buf(),
            reason,
        };

        let context = hostfxr
            .initialize_for_runtime_config(pd_path(runtime_config)?)
            .map_err(|e| runtime_init(e.to_string()))?;
        let loader = context
            .get_delegate_loader()
            .map_err(|e| runtime_init(e.to_string()))?;

        // The loader stays valid once the context is closed
        drop(context);
        info!("Initialized .NET runtime from {:?}", runtime_config);
        Ok(loader)
    }

    fn load_entry_point(
        &mut self,
        loader: &DelegateLoader,
        assembly: &Path,
        entry_point: &ManagedEntryPoint,
    ) -> Result<InitializeFn, HostingError> {
        let not_found = |reason: String| HostingError::EntryPointNotFound {
            assembly: assembly.to_path_buf(),
            type_name: entry_point.type_name.clone(),
            method: entry_point.method_name.clone(),
            reason,
        };

        let function = loader
            .load_assembly_and_get_function_with_default_signature(
                &pd_path(assembly)?,
                &pd_str(&entry_point.type_name)?,
                &pd_str(&entry_point.method_name)?,
            )
            .map_err(|e| not_found(e.to_string()))?;
        debug!(
            "Resolved {}::{} in {:?}",
            entry_point.type_name, entry_point.method_name, assembly
        );
        Ok(InitializeFn(*function))
    }

    fn invoke(&mut self, entry_point: &InitializeFn, parameters: &EntryPointParameters<'_>) -> i32 {
        // SAFETY: the managed side only reads `size_in_bytes` bytes from the
        // block, which outlives the call.
        unsafe { (entry_point.0)(parameters.as_ptr(), parameters.size_in_bytes()) }
    }
}

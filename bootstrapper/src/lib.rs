//! Native module injected into a game process. Boots the managed mod loader
//! on a background thread and exposes the exports ASI-style loaders look for.

pub mod module_path;
pub mod report;

#[cfg(windows)]
mod marker;

use anyhow::{Context, Result};
use common::{
    BootstrapHandle, BootstrapSettings, Bootstrapper, DetachedRelauncher, InstanceMarker,
    JsonConfigResolver, Outcome,
};
use log::info;
use netclr::DotNetHost;
use once_cell::sync::OnceCell;
use std::path::PathBuf;

#[cfg(windows)]
pub use marker::NamedMappingMarkers;

static BOOTSTRAP: OnceCell<BootstrapHandle> = OnceCell::new();

/// Layout expected by loaders that probe for `MainMemoryModInfo`.
#[repr(C)]
pub struct ModInfo {
    pub version: i32,
    pub padding: [u8; 256],
}

#[no_mangle]
#[allow(non_upper_case_globals)]
pub static MainMemoryModInfo: ModInfo = ModInfo {
    version: 1,
    padding: [0; 256],
};

/// Called by Ultimate ASI Loader after it loaded this module. Blocks until
/// the mod loader is up so the loader's remaining plugins see it.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn InitializeASI() {
    info!("Loaded through an ASI loader");
    join_external();
}

/// Logs to stderr, `RUST_LOG` overrides the default `info` level.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

/// Starts the one bootstrap attempt of this process. Later calls return the
/// handle of the first attempt.
pub fn start<M>(
    module_path: PathBuf,
    marker: M,
    on_finish: fn(&Outcome),
) -> Result<&'static BootstrapHandle>
where
    M: InstanceMarker + 'static,
{
    BOOTSTRAP.get_or_try_init(|| {
        let resolver = JsonConfigResolver::from_app_data().with_module_path(&module_path);
        let settings = BootstrapSettings::for_current_process(module_path);
        Bootstrapper::new(
            resolver,
            marker,
            DetachedRelauncher,
            DotNetHost::new(),
            settings,
        )
        .spawn_then(on_finish)
        .context("Failed to start the bootstrap thread")
    })
}

/// Handle of the running attempt, if one was started.
pub fn handle() -> Option<&'static BootstrapHandle> {
    BOOTSTRAP.get()
}

/// Flags the attempt as driven by an external loader and waits for it.
pub fn join_external() -> Option<Outcome> {
    let handle = BOOTSTRAP.get()?;
    handle.mark_loaded_externally();
    Some(handle.join())
}

#[cfg(windows)]
fn attach(module: windows::Win32::Foundation::HMODULE) {
    init_logging();

    let module_path = match module_path::current_module_path(module) {
        Ok(path) => path,
        Err(e) => {
            report::show_error_later(format!("{:#}", e));
            return;
        }
    };
    info!("Bootstrapper loaded from {:?}", module_path);

    if let Some(directory) = module_path.parent() {
        // nethost is shipped next to this module
        use windows::core::HSTRING;
        use windows::Win32::System::LibraryLoader::SetDllDirectoryW;
        if let Err(e) = unsafe { SetDllDirectoryW(&HSTRING::from(directory.as_os_str())) } {
            log::warn!("SetDllDirectoryW failed for {:?}: {}", directory, e);
        }
    }

    if let Err(e) = start(module_path, NamedMappingMarkers::new(), report::outcome) {
        report::show_error_later(format!("{:#}", e));
    }
}

#[cfg(windows)]
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn DllMain(
    module: windows::Win32::Foundation::HMODULE,
    reason: u32,
    _reserved: *mut std::ffi::c_void,
) -> windows::Win32::Foundation::BOOL {
    use windows::Win32::System::LibraryLoader::DisableThreadLibraryCalls;
    use windows::Win32::System::SystemServices::DLL_PROCESS_ATTACH;

    if reason == DLL_PROCESS_ATTACH {
        unsafe {
            let _ = DisableThreadLibraryCalls(module);
        }
        // Runs under the loader lock, the boot sequence itself is on its own thread
        attach(module);
    }
    windows::Win32::Foundation::TRUE
}

//! Location of the bootstrapper module on disk.

use std::borrow::Cow;
use std::path::PathBuf;

const VERBATIM: &str = r"\\?\";
const VERBATIM_UNC: &str = r"\\?\UNC\";

/// Turns `\\?\C:\x` into `C:\x` and `\\?\UNC\server\share` into `\\server\share`.
pub fn strip_verbatim_prefix(path: &str) -> Cow<'_, str> {
    if let Some(rest) = path.strip_prefix(VERBATIM_UNC) {
        Cow::Owned(format!(r"\\{}", rest))
    } else {
        Cow::Borrowed(path.strip_prefix(VERBATIM).unwrap_or(path))
    }
}

#[cfg_attr(not(windows), allow(dead_code))]
fn strip_verbatim_path(path: PathBuf) -> PathBuf {
    match path.to_str() {
        Some(text) => PathBuf::from(strip_verbatim_prefix(text).as_ref()),
        None => path,
    }
}

#[cfg(windows)]
pub use windows_impl::current_module_path;

#[cfg(windows)]
mod windows_impl {
    use super::strip_verbatim_path;
    use anyhow::{bail, Context, Result};
    use std::ffi::OsString;
    use std::os::windows::ffi::OsStringExt;
    use std::path::{Path, PathBuf};
    use windows::core::HSTRING;
    use windows::Win32::Foundation::{CloseHandle, HANDLE, HMODULE};
    use windows::Win32::Storage::FileSystem::{
        CreateFileW, GetFinalPathNameByHandleW, FILE_FLAG_BACKUP_SEMANTICS, FILE_NAME_NORMALIZED,
        FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
    };
    use windows::Win32::System::LibraryLoader::GetModuleFileNameW;

    const MAX_LONG_PATH: usize = 32767;

    /// Full path of `module` with symbolic links resolved.
    pub fn current_module_path(module: HMODULE) -> Result<PathBuf> {
        let mut buffer = vec![0u16; MAX_LONG_PATH];
        let length = unsafe { GetModuleFileNameW(module, &mut buffer) } as usize;
        if length == 0 || length >= buffer.len() {
            bail!("GetModuleFileNameW failed for the bootstrapper module");
        }
        let loaded = PathBuf::from(OsString::from_wide(&buffer[..length]));

        match final_path(&loaded) {
            Ok(path) => Ok(path),
            Err(e) => {
                log::warn!("Using unresolved module path {:?}: {:#}", loaded, e);
                Ok(loaded)
            }
        }
    }

    fn final_path(path: &Path) -> Result<PathBuf> {
        let name = HSTRING::from(path.as_os_str());
        let file = unsafe {
            CreateFileW(
                &name,
                0,
                FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                None,
                OPEN_EXISTING,
                FILE_FLAG_BACKUP_SEMANTICS,
                HANDLE::default(),
            )
        }
        .with_context(|| format!("CreateFileW failed for {:?}", path))?;

        let mut buffer = vec![0u16; MAX_LONG_PATH];
        let length =
            unsafe { GetFinalPathNameByHandleW(file, &mut buffer, FILE_NAME_NORMALIZED) } as usize;
        unsafe {
            let _ = CloseHandle(file);
        }
        if length == 0 || length >= buffer.len() {
            bail!("GetFinalPathNameByHandleW failed for {:?}", path);
        }

        Ok(strip_verbatim_path(PathBuf::from(OsString::from_wide(
            &buffer[..length],
        ))))
    }
}

//! Process role markers backed by named file mappings.
//!
//! A mapping named after the role and process id exists for as long as some
//! module in the process keeps a handle to it. The managed server creates its
//! own marker, this module only queries that one.

use api::Role;
use common::InstanceMarker;
use log::{debug, warn};
use std::sync::Mutex;
use windows::core::HSTRING;
use windows::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, HANDLE, INVALID_HANDLE_VALUE,
};
use windows::Win32::System::Memory::{
    CreateFileMappingW, OpenFileMappingW, FILE_MAP_READ, PAGE_READWRITE,
};

/// Mapping handle kept open until the process exits.
struct OwnedMapping(HANDLE);

// SAFETY: The handle is never closed and kernel handles are valid on any thread.
unsafe impl Send for OwnedMapping {}

pub struct NamedMappingMarkers {
    process_id: u32,
    held: Mutex<Vec<OwnedMapping>>,
}

impl NamedMappingMarkers {
    pub fn new() -> Self {
        Self::for_process(std::process::id())
    }

    pub fn for_process(process_id: u32) -> Self {
        Self {
            process_id,
            held: Mutex::new(Vec::new()),
        }
    }

    fn name(&self, role: Role) -> HSTRING {
        HSTRING::from(role.token_name(self.process_id))
    }
}

impl Default for NamedMappingMarkers {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceMarker for NamedMappingMarkers {
    fn try_claim(&self, role: Role) -> bool {
        let name = self.name(role);
        // Creation and the existence check are one kernel call, so only one
        // caller sees a fresh mapping.
        let handle = unsafe {
            CreateFileMappingW(INVALID_HANDLE_VALUE, None, PAGE_READWRITE, 0, 4, &name)
        };
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Could not create marker {}: {}", name, e);
                return false;
            }
        };

        if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
            debug!("Marker {} already exists", name);
            unsafe {
                let _ = CloseHandle(handle);
            }
            return false;
        }

        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(OwnedMapping(handle));
        debug!("Claimed marker {}", name);
        true
    }

    fn is_claimed(&self, role: Role) -> bool {
        let name = self.name(role);
        match unsafe { OpenFileMappingW(FILE_MAP_READ.0, false, &name) } {
            Ok(handle) => {
                unsafe {
                    let _ = CloseHandle(handle);
                }
                true
            }
            Err(_) => false,
        }
    }
}

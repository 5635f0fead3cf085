//! Types shared across the native/managed boundary.
//!
//! Everything in this crate is part of a contract with the managed loader and
//! the launcher. Layouts and names here must not change without bumping
//! [`EntryPointParameters::CURRENT_VERSION`].

mod role;
pub use role::Role;

use bitflags::bitflags;
use std::marker::PhantomData;
use widestring::U16CStr;

bitflags! {
    /// How the bootstrapper was brought into the process.
    ///
    /// An empty set means the bootstrapper was loaded on its own.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct EntryPointFlags: i32 {
        /// Another mod loader holds a reference to this module and waits for
        /// the bootstrap to finish before continuing.
        const LOADED_EXTERNALLY = 1;
    }
}

/// Parameter block handed to the managed `Initialize(void*, int)` entry point.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EntryPointParameters<'a> {
    version: i32,
    flags: EntryPointFlags,
    /// Null terminated UTF-16 path of the bootstrapper module.
    current_module_path: *const u16,
    _path: PhantomData<&'a U16CStr>,
}

impl<'a> EntryPointParameters<'a> {
    pub const CURRENT_VERSION: i32 = 1;

    /// Size in bytes the managed side expects to receive.
    pub const SIZE: usize = std::mem::size_of::<EntryPointParameters<'static>>();

    pub fn new(flags: EntryPointFlags, current_module_path: &'a U16CStr) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            flags,
            current_module_path: current_module_path.as_ptr(),
            _path: PhantomData,
        }
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn flags(&self) -> EntryPointFlags {
        self.flags
    }

    /// Raw pointer placed in the block for the managed side.
    pub fn module_path_ptr(&self) -> *const u16 {
        self.current_module_path
    }

    /// Value passed as the `argSize` argument of the managed call.
    pub fn size_in_bytes(&self) -> i32 {
        Self::SIZE as i32
    }

    pub fn is_loaded_externally(&self) -> bool {
        self.flags.contains(EntryPointFlags::LOADED_EXTERNALLY)
    }

    /// Reads back the module path. Only used for diagnostics and tests.
    pub fn module_path(&self) -> &'a U16CStr {
        // SAFETY: the field is private and only ever set in `new` from a
        // `&'a U16CStr`, the phantom borrow keeps it alive for 'a.
        unsafe { U16CStr::from_ptr_str(self.current_module_path) }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_void {
        self as *const Self as *const std::ffi::c_void
    }
}

use api::Role;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Process scoped named flags.
///
/// Creating the token is the claim, so `try_claim` must be a single atomic
/// step: of any number of concurrent callers exactly one sees `true`.
pub trait InstanceMarker: Send + Sync {
    /// Claims `role` for the caller. Returns `false` if it was already claimed.
    fn try_claim(&self, role: Role) -> bool;

    /// Checks whether `role` is claimed without claiming it.
    fn is_claimed(&self, role: Role) -> bool;
}

impl<M: InstanceMarker + ?Sized> InstanceMarker for Arc<M> {
    fn try_claim(&self, role: Role) -> bool {
        (**self).try_claim(role)
    }

    fn is_claimed(&self, role: Role) -> bool {
        (**self).is_claimed(role)
    }
}

impl<M: InstanceMarker + ?Sized> InstanceMarker for &M {
    fn try_claim(&self, role: Role) -> bool {
        (**self).try_claim(role)
    }

    fn is_claimed(&self, role: Role) -> bool {
        (**self).is_claimed(role)
    }
}

/// Markers that only exist inside this address space.
///
/// Tokens disappear with the process, which gives the same lifetime the OS
/// named objects have. Used where named kernel objects are not available.
#[derive(Debug)]
pub struct LocalMarkers {
    process_id: u32,
    tokens: Mutex<HashSet<String>>,
}

impl LocalMarkers {
    pub fn new() -> Self {
        Self::for_process(std::process::id())
    }

    pub fn for_process(process_id: u32) -> Self {
        Self {
            process_id,
            tokens: Mutex::new(HashSet::new()),
        }
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }
}

impl Default for LocalMarkers {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceMarker for LocalMarkers {
    fn try_claim(&self, role: Role) -> bool {
        let name = role.token_name(self.process_id);
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name)
    }

    fn is_claimed(&self, role: Role) -> bool {
        let name = role.token_name(self.process_id);
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&name)
    }
}

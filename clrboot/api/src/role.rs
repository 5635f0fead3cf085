use std::fmt;

/// Named per-process conditions used to coordinate single-instance startup.
///
/// The token names are also read by the managed loader and the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The managed loader is running in this process. Created by the
    /// managed side, only ever queried natively.
    ServerRunning,
    /// A bootstrapper in this process has claimed the boot sequence.
    BootstrapperClaimed,
}

impl Role {
    fn prefix(self) -> &'static str {
        match self {
            Role::ServerRunning => "Reloaded-Mod-Loader-Server-PID-",
            Role::BootstrapperClaimed => "Reloaded-Mod-Loader-Bootstrapper-PID-",
        }
    }

    /// OS visible token name for this role in the given process.
    pub fn token_name(self, process_id: u32) -> String {
        format!("{}{}", self.prefix(), process_id)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::ServerRunning => write!(f, "server running"),
            Role::BootstrapperClaimed => write!(f, "bootstrapper claimed"),
        }
    }
}

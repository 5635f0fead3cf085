//! The boot sequence and its join point.
//!
//! ```text
//! Idle -> Claiming -> Resolving -> Relaunching (terminal as Relaunched)
//!                               \-> LoadingRuntime -> Ready | Failed
//! Claiming -> StoodDown          Resolving -> Failed
//! ```

use api::{EntryPointFlags, EntryPointParameters, Role};
use log::{debug, error, info, warn};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use widestring::{U16CStr, U16CString};

use crate::error::{AlreadyBootstrapped, BootstrapError, HostingError};
use crate::host::{ManagedEntryPoint, RuntimeHost};
use crate::marker::InstanceMarker;
use crate::paths::{BootstrapPaths, PathResolver};
use crate::relaunch::{self, RelaunchCommand, Relauncher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Idle,
    Claiming,
    Resolving,
    Relaunching,
    LoadingRuntime,
    Ready,
    Relaunched,
    StoodDown,
    Failed,
}

impl BootstrapState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Ready | Self::Relaunched | Self::StoodDown | Self::Failed
        )
    }
}

/// How a bootstrap attempt ended.
#[derive(Debug, Clone)]
pub enum Outcome {
    Ready,
    /// The launcher was started and will restart the process.
    Relaunched,
    StoodDown(AlreadyBootstrapped),
    Failed(Arc<BootstrapError>),
}

impl Outcome {
    pub fn state(&self) -> BootstrapState {
        match self {
            Outcome::Ready => BootstrapState::Ready,
            Outcome::Relaunched => BootstrapState::Relaunched,
            Outcome::StoodDown(_) => BootstrapState::StoodDown,
            Outcome::Failed(_) => BootstrapState::Failed,
        }
    }

    pub fn error(&self) -> Option<&BootstrapError> {
        match self {
            Outcome::Failed(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BootstrapSettings {
    /// Location of the bootstrapper module, handed to the managed side.
    pub module_path: PathBuf,
    pub entry_point: ManagedEntryPoint,
    /// Original command line of the host process, executable first.
    pub command_line: Vec<OsString>,
    pub process_id: u32,
}

impl BootstrapSettings {
    pub fn for_current_process(module_path: impl Into<PathBuf>) -> Self {
        Self {
            module_path: module_path.into(),
            entry_point: ManagedEntryPoint::default(),
            command_line: std::env::args_os().collect(),
            process_id: std::process::id(),
        }
    }

    pub fn module_directory(&self) -> Option<&Path> {
        self.module_path.parent()
    }
}

struct Progress {
    state: BootstrapState,
    outcome: Option<Outcome>,
}

struct Shared {
    progress: Mutex<Progress>,
    finished: Condvar,
    flags: AtomicI32,
}

/// Shared view of a bootstrap attempt. Cheap to clone, usable from any thread.
#[derive(Clone)]
pub struct BootstrapHandle {
    shared: Arc<Shared>,
}

impl BootstrapHandle {
    fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                progress: Mutex::new(Progress {
                    state: BootstrapState::Idle,
                    outcome: None,
                }),
                finished: Condvar::new(),
                flags: AtomicI32::new(EntryPointFlags::empty().bits()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.shared
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Signals that an external loader depends on this bootstrap. Only
    /// affects the parameter block if called before the runtime is loaded.
    pub fn mark_loaded_externally(&self) {
        self.shared
            .flags
            .fetch_or(EntryPointFlags::LOADED_EXTERNALLY.bits(), Ordering::SeqCst);
    }

    pub fn flags(&self) -> EntryPointFlags {
        EntryPointFlags::from_bits_retain(self.shared.flags.load(Ordering::SeqCst))
    }

    pub fn state(&self) -> BootstrapState {
        self.lock().state
    }

    /// Outcome if the attempt already finished.
    pub fn outcome(&self) -> Option<Outcome> {
        self.lock().outcome.clone()
    }

    /// Blocks until the attempt reaches a terminal state.
    pub fn join(&self) -> Outcome {
        let mut progress = self.lock();
        loop {
            if let Some(outcome) = &progress.outcome {
                return outcome.clone();
            }
            progress = self
                .shared
                .finished
                .wait(progress)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn advance(&self, state: BootstrapState) {
        debug!("Bootstrap state -> {:?}", state);
        self.lock().state = state;
    }

    fn finish(&self, outcome: Outcome) {
        let mut progress = self.lock();
        progress.state = outcome.state();
        progress.outcome = Some(outcome);
        self.shared.finished.notify_all();
    }
}

/// One bootstrap attempt. Construct once per process.
pub struct Bootstrapper<R, M, L, H> {
    resolver: R,
    marker: M,
    relauncher: L,
    host: H,
    settings: BootstrapSettings,
    handle: BootstrapHandle,
}

impl<R, M, L, H> Bootstrapper<R, M, L, H>
where
    R: PathResolver,
    M: InstanceMarker,
    L: Relauncher,
    H: RuntimeHost,
{
    pub fn new(resolver: R, marker: M, relauncher: L, host: H, settings: BootstrapSettings) -> Self {
        Self {
            resolver,
            marker,
            relauncher,
            host,
            settings,
            handle: BootstrapHandle::new(),
        }
    }

    pub fn handle(&self) -> BootstrapHandle {
        self.handle.clone()
    }

    /// Runs the whole sequence on the calling thread.
    pub fn run(mut self) -> Outcome {
        let outcome = self.execute();
        match &outcome {
            Outcome::Ready => info!("Mod loader started"),
            Outcome::Relaunched => info!("Handed over to the launcher"),
            Outcome::StoodDown(reason) => info!("{}", reason),
            Outcome::Failed(err) => error!("Bootstrap failed while {:?}: {}", err.stage(), err),
        }
        self.handle.finish(outcome.clone());
        outcome
    }

    /// Runs the sequence on a dedicated background thread and returns at once.
    pub fn spawn(self) -> std::io::Result<BootstrapHandle>
    where
        R: Send + 'static,
        M: 'static,
        L: Send + 'static,
        H: Send + 'static,
    {
        self.spawn_then(|_| {})
    }

    /// Like [`Bootstrapper::spawn`], calling `on_finish` on the background
    /// thread after joiners have been released.
    pub fn spawn_then<F>(self, on_finish: F) -> std::io::Result<BootstrapHandle>
    where
        R: Send + 'static,
        M: 'static,
        L: Send + 'static,
        H: Send + 'static,
        F: FnOnce(&Outcome) + Send + 'static,
    {
        let handle = self.handle();
        thread::Builder::new()
            .name("bootstrap".into())
            .spawn(move || {
                let outcome = self.run();
                on_finish(&outcome);
            })?;
        Ok(handle)
    }

    fn execute(&mut self) -> Outcome {
        self.handle.advance(BootstrapState::Claiming);
        if let Err(reason) = self.claim() {
            return Outcome::StoodDown(reason);
        }

        self.handle.advance(BootstrapState::Resolving);
        let paths = match self.resolver.resolve() {
            Ok(paths) => paths,
            Err(err) => return Outcome::Failed(Arc::new(err.into())),
        };

        let portable = self
            .settings
            .module_directory()
            .is_some_and(relaunch::is_portable);
        if portable {
            self.handle.advance(BootstrapState::Relaunching);
            let command = RelaunchCommand::new(
                paths.launcher(),
                &self.settings.command_line,
                self.settings.process_id,
            );
            match self.relauncher.relaunch(&command) {
                Ok(()) => return Outcome::Relaunched,
                Err(err) => warn!("{}. Continuing without portable mode.", err),
            }
        }

        self.handle.advance(BootstrapState::LoadingRuntime);
        match self.load_runtime(&paths) {
            Ok(()) => Outcome::Ready,
            Err(err) => Outcome::Failed(Arc::new(err.into())),
        }
    }

    fn claim(&self) -> Result<(), AlreadyBootstrapped> {
        if self.marker.is_claimed(Role::ServerRunning) {
            return Err(AlreadyBootstrapped {
                role: Role::ServerRunning,
            });
        }
        if !self.marker.try_claim(Role::BootstrapperClaimed) {
            return Err(AlreadyBootstrapped {
                role: Role::BootstrapperClaimed,
            });
        }
        Ok(())
    }

    fn load_runtime(&mut self, paths: &BootstrapPaths) -> Result<(), HostingError> {
        self.host.load_hosting_library()?;
        let loader = self.host.initialize_for_config(paths.runtime_config())?;
        let entry_point = self.host.load_entry_point(
            &loader,
            paths.managed_assembly(),
            &self.settings.entry_point,
        )?;

        let module_path = U16CString::from_os_str(self.settings.module_path.as_os_str())
            .map_err(|_| HostingError::InvalidPath(self.settings.module_path.clone()))?;
        // The managed side may keep the path pointer for the life of the process
        let module_path: &'static U16CStr = Box::leak(module_path.into_boxed_ucstr());

        let parameters = EntryPointParameters::new(self.handle.flags(), module_path);
        if parameters.is_loaded_externally() {
            info!("Loaded by an external mod loader");
        }
        let code = self.host.invoke(&entry_point, &parameters);
        debug!("Managed entry point returned {}", code);
        Ok(())
    }
}

use api::{EntryPointFlags, EntryPointParameters, Role};
use common::{
    Artifact, BootstrapPaths, BootstrapSettings, BootstrapState, Bootstrapper, ConfigurationError,
    HostingError, InstanceMarker, LocalMarkers, ManagedEntryPoint, Outcome, RelaunchCommand,
    RelaunchError, Relauncher, RuntimeHost, PORTABLE_MODE_FILE,
};
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone)]
struct Invocation {
    declared_size: i32,
    version: i32,
    flags: EntryPointFlags,
    module_path: String,
}

#[derive(Default)]
struct HostLog {
    stages: Vec<&'static str>,
    invocations: Vec<Invocation>,
}

struct FakeHost {
    log: Arc<Mutex<HostLog>>,
    fail_at: Option<&'static str>,
    gate: Option<mpsc::Receiver<()>>,
}

impl FakeHost {
    fn new(log: Arc<Mutex<HostLog>>) -> Self {
        Self {
            log,
            fail_at: None,
            gate: None,
        }
    }

    fn failing_at(log: Arc<Mutex<HostLog>>, stage: &'static str) -> Self {
        Self {
            fail_at: Some(stage),
            ..Self::new(log)
        }
    }

    fn gated(log: Arc<Mutex<HostLog>>, gate: mpsc::Receiver<()>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(log)
        }
    }

    fn enter(&self, stage: &'static str) -> Result<(), HostingError> {
        self.log.lock().unwrap().stages.push(stage);
        if self.fail_at == Some(stage) {
            return Err(HostingError::LibraryUnavailable(format!("{} failed", stage)));
        }
        Ok(())
    }
}

impl RuntimeHost for FakeHost {
    type Loader = PathBuf;
    type EntryPoint = String;

    fn load_hosting_library(&mut self) -> Result<(), HostingError> {
        self.enter("load")
    }

    fn initialize_for_config(&mut self, runtime_config: &Path) -> Result<PathBuf, HostingError> {
        self.enter("initialize")?;
        Ok(runtime_config.to_path_buf())
    }

    fn load_entry_point(
        &mut self,
        _loader: &PathBuf,
        _assembly: &Path,
        entry_point: &ManagedEntryPoint,
    ) -> Result<String, HostingError> {
        self.enter("entry_point")?;
        Ok(format!("{}::{}", entry_point.type_name, entry_point.method_name))
    }

    fn invoke(&mut self, _entry_point: &String, parameters: &EntryPointParameters<'_>) -> i32 {
        self.log.lock().unwrap().stages.push("invoke");
        if let Some(gate) = &self.gate {
            gate.recv().unwrap();
        }
        self.log.lock().unwrap().invocations.push(Invocation {
            declared_size: parameters.size_in_bytes(),
            version: parameters.version(),
            flags: parameters.flags(),
            module_path: parameters.module_path().to_string().unwrap(),
        });
        0
    }
}

#[derive(Default, Clone)]
struct FakeRelauncher {
    commands: Arc<Mutex<Vec<RelaunchCommand>>>,
    fail: bool,
}

impl Relauncher for FakeRelauncher {
    fn relaunch(&self, command: &RelaunchCommand) -> Result<(), RelaunchError> {
        self.commands.lock().unwrap().push(command.clone());
        if self.fail {
            return Err(RelaunchError::Spawn {
                launcher: command.launcher().to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "launcher missing"),
            });
        }
        Ok(())
    }
}

struct Fixture {
    dir: TempDir,
    paths: BootstrapPaths,
    resolves: Arc<AtomicUsize>,
}

impl Fixture {
    fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let dir = TempDir::new().unwrap();
        let loader = dir.path().join("loader");
        fs::create_dir_all(&loader).unwrap();
        fs::create_dir_all(dir.path().join("game")).unwrap();

        let assembly = loader.join("Reloaded.Mod.Loader.dll");
        let runtime_config = loader.join("Reloaded.Mod.Loader.runtimeconfig.json");
        let launcher = dir.path().join("Reloaded-II.exe");
        fs::write(&assembly, b"MZ").unwrap();
        fs::write(&runtime_config, b"{}").unwrap();
        fs::write(&launcher, b"MZ").unwrap();

        Self {
            paths: BootstrapPaths::new(assembly, runtime_config, launcher).unwrap(),
            dir,
            resolves: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn module_path(&self) -> PathBuf {
        self.dir.path().join("game").join("Reloaded.Mod.Loader.Bootstrapper.dll")
    }

    fn enable_portable_mode(&self) {
        fs::write(self.dir.path().join("game").join(PORTABLE_MODE_FILE), b"").unwrap();
    }

    fn settings(&self) -> BootstrapSettings {
        BootstrapSettings {
            module_path: self.module_path(),
            entry_point: ManagedEntryPoint::default(),
            command_line: vec![OsString::from("C:/Games/game.exe"), OsString::from("-dx11")],
            process_id: 4242,
        }
    }

    fn resolver(&self) -> impl Fn() -> Result<BootstrapPaths, ConfigurationError> + Send + 'static {
        let paths = self.paths.clone();
        let resolves = self.resolves.clone();
        move || {
            resolves.fetch_add(1, Ordering::SeqCst);
            Ok(paths.clone())
        }
    }
}

#[test]
fn test_all_stages_succeed_reaches_ready() {
    let fixture = Fixture::new();
    let log = Arc::new(Mutex::new(HostLog::default()));
    let bootstrapper = Bootstrapper::new(
        fixture.resolver(),
        LocalMarkers::for_process(4242),
        FakeRelauncher::default(),
        FakeHost::new(log.clone()),
        fixture.settings(),
    );
    let handle = bootstrapper.handle();
    assert_eq!(handle.state(), BootstrapState::Idle);

    let outcome = bootstrapper.run();

    assert!(matches!(outcome, Outcome::Ready));
    assert_eq!(handle.state(), BootstrapState::Ready);
    let log = log.lock().unwrap();
    assert_eq!(log.stages, vec!["load", "initialize", "entry_point", "invoke"]);
    assert_eq!(log.invocations.len(), 1);

    let invocation = &log.invocations[0];
    assert_eq!(invocation.declared_size as usize, EntryPointParameters::SIZE);
    assert_eq!(invocation.version, EntryPointParameters::CURRENT_VERSION);
    assert_eq!(invocation.flags, EntryPointFlags::empty());
    assert_eq!(
        invocation.module_path,
        fixture.module_path().to_string_lossy()
    );
}

#[test]
fn test_server_role_present_stands_down_without_side_effects() {
    let fixture = Fixture::new();
    let log = Arc::new(Mutex::new(HostLog::default()));
    let relauncher = FakeRelauncher::default();
    let markers = LocalMarkers::for_process(4242);
    assert!(markers.try_claim(Role::ServerRunning));
    fixture.enable_portable_mode();

    let outcome = Bootstrapper::new(
        fixture.resolver(),
        &markers,
        relauncher.clone(),
        FakeHost::new(log.clone()),
        fixture.settings(),
    )
    .run();

    match outcome {
        Outcome::StoodDown(reason) => assert_eq!(reason.role, Role::ServerRunning),
        other => panic!("expected stand down, got {:?}", other),
    }
    assert_eq!(fixture.resolves.load(Ordering::SeqCst), 0);
    assert!(log.lock().unwrap().stages.is_empty());
    assert!(relauncher.commands.lock().unwrap().is_empty());
    // Standing down must not claim the bootstrapper role either
    assert!(!markers.is_claimed(Role::BootstrapperClaimed));
}

#[test]
fn test_second_bootstrapper_in_process_stands_down() {
    let fixture = Fixture::new();
    let log = Arc::new(Mutex::new(HostLog::default()));
    let markers = Arc::new(LocalMarkers::for_process(4242));

    let first = Bootstrapper::new(
        fixture.resolver(),
        markers.clone(),
        FakeRelauncher::default(),
        FakeHost::new(log.clone()),
        fixture.settings(),
    )
    .run();
    let second = Bootstrapper::new(
        fixture.resolver(),
        markers.clone(),
        FakeRelauncher::default(),
        FakeHost::new(log.clone()),
        fixture.settings(),
    )
    .run();

    assert!(matches!(first, Outcome::Ready));
    match second {
        Outcome::StoodDown(reason) => assert_eq!(reason.role, Role::BootstrapperClaimed),
        other => panic!("expected stand down, got {:?}", other),
    }
    assert_eq!(fixture.resolves.load(Ordering::SeqCst), 1);
    assert_eq!(log.lock().unwrap().invocations.len(), 1);
}

#[test]
fn test_concurrent_bootstrappers_initialize_runtime_once() {
    const CALLERS: usize = 8;
    let fixture = Fixture::new();
    let log = Arc::new(Mutex::new(HostLog::default()));
    let markers = Arc::new(LocalMarkers::for_process(4242));

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            Bootstrapper::new(
                fixture.resolver(),
                markers.clone(),
                FakeRelauncher::default(),
                FakeHost::new(log.clone()),
                fixture.settings(),
            )
            .spawn()
            .unwrap()
        })
        .collect();

    let outcomes: Vec<Outcome> = handles.iter().map(|h| h.join()).collect();
    let ready = outcomes
        .iter()
        .filter(|o| matches!(o, Outcome::Ready))
        .count();
    let stood_down = outcomes
        .iter()
        .filter(|o| matches!(o, Outcome::StoodDown(_)))
        .count();

    assert_eq!(ready, 1);
    assert_eq!(stood_down, CALLERS - 1);
    assert_eq!(log.lock().unwrap().invocations.len(), 1);
}

#[test]
fn test_portable_mode_relaunches_and_skips_runtime() {
    let fixture = Fixture::new();
    fixture.enable_portable_mode();
    let log = Arc::new(Mutex::new(HostLog::default()));
    let relauncher = FakeRelauncher::default();

    let bootstrapper = Bootstrapper::new(
        fixture.resolver(),
        LocalMarkers::for_process(4242),
        relauncher.clone(),
        FakeHost::new(log.clone()),
        fixture.settings(),
    );
    let handle = bootstrapper.handle();
    let outcome = bootstrapper.run();

    assert!(matches!(outcome, Outcome::Relaunched));
    assert_eq!(handle.state(), BootstrapState::Relaunched);
    assert!(log.lock().unwrap().stages.is_empty());

    let commands = relauncher.commands.lock().unwrap();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].launcher(), fixture.paths.launcher());
    assert_eq!(commands[0].launch_path(), OsStr::new("C:/Games/game.exe"));
    assert_eq!(commands[0].arguments(), OsStr::new(" -dx11"));
    assert_eq!(commands[0].kill_pid(), 4242);
}

#[test]
fn test_failed_relaunch_falls_back_to_loading_in_place() {
    let fixture = Fixture::new();
    fixture.enable_portable_mode();
    let log = Arc::new(Mutex::new(HostLog::default()));
    let relauncher = FakeRelauncher {
        fail: true,
        ..Default::default()
    };

    let outcome = Bootstrapper::new(
        fixture.resolver(),
        LocalMarkers::for_process(4242),
        relauncher.clone(),
        FakeHost::new(log.clone()),
        fixture.settings(),
    )
    .run();

    assert!(matches!(outcome, Outcome::Ready));
    assert_eq!(relauncher.commands.lock().unwrap().len(), 1);
    assert_eq!(log.lock().unwrap().invocations.len(), 1);
}

#[test]
fn test_resolution_failure_is_fatal_and_names_artifact() {
    let fixture = Fixture::new();
    let log = Arc::new(Mutex::new(HostLog::default()));
    let missing = fixture.dir.path().join("Reloaded-II.exe");
    fs::remove_file(&missing).unwrap();
    let paths = fixture.paths.clone();

    let outcome = Bootstrapper::new(
        move || {
            BootstrapPaths::new(
                paths.managed_assembly(),
                paths.runtime_config(),
                paths.launcher(),
            )
        },
        LocalMarkers::for_process(4242),
        FakeRelauncher::default(),
        FakeHost::new(log.clone()),
        fixture.settings(),
    )
    .run();

    let err = outcome.error().expect("bootstrap should fail");
    assert_eq!(err.stage(), BootstrapState::Resolving);
    match err {
        common::BootstrapError::Configuration(config) => {
            assert_eq!(config.artifact(), Some(Artifact::Launcher));
            assert!(config.to_string().contains("Reloaded-II.exe"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(log.lock().unwrap().stages.is_empty());
}

#[test]
fn test_hosting_failure_stops_before_invoke() {
    let fixture = Fixture::new();
    let log = Arc::new(Mutex::new(HostLog::default()));

    let outcome = Bootstrapper::new(
        fixture.resolver(),
        LocalMarkers::for_process(4242),
        FakeRelauncher::default(),
        FakeHost::failing_at(log.clone(), "initialize"),
        fixture.settings(),
    )
    .run();

    let err = outcome.error().expect("bootstrap should fail");
    assert_eq!(err.stage(), BootstrapState::LoadingRuntime);
    assert!(err.to_string().contains("initialize failed"));
    assert_eq!(log.lock().unwrap().stages, vec!["load", "initialize"]);
}

#[test]
fn test_join_returns_only_after_ready() {
    let fixture = Fixture::new();
    let log = Arc::new(Mutex::new(HostLog::default()));
    let (release, gate) = mpsc::channel();

    let handle = Bootstrapper::new(
        fixture.resolver(),
        LocalMarkers::for_process(4242),
        FakeRelauncher::default(),
        FakeHost::gated(log.clone(), gate),
        fixture.settings(),
    )
    .spawn()
    .unwrap();

    let joined = Arc::new(AtomicBool::new(false));
    let joiner = {
        let handle = handle.clone();
        let joined = joined.clone();
        thread::spawn(move || {
            let outcome = handle.join();
            joined.store(true, Ordering::SeqCst);
            outcome
        })
    };

    for _ in 0..500 {
        if handle.state() == BootstrapState::LoadingRuntime {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(handle.state(), BootstrapState::LoadingRuntime);
    thread::sleep(Duration::from_millis(50));
    assert!(!joined.load(Ordering::SeqCst));
    assert!(handle.outcome().is_none());

    release.send(()).unwrap();
    let outcome = joiner.join().unwrap();

    assert!(matches!(outcome, Outcome::Ready));
    assert!(joined.load(Ordering::SeqCst));
    assert_eq!(handle.state(), BootstrapState::Ready);
    // Joining again after completion returns immediately
    assert!(matches!(handle.join(), Outcome::Ready));
}

#[test]
fn test_external_loader_flag_reaches_parameters() {
    let fixture = Fixture::new();
    let log = Arc::new(Mutex::new(HostLog::default()));
    let (release, gate) = mpsc::channel();

    let bootstrapper = Bootstrapper::new(
        fixture.resolver(),
        LocalMarkers::for_process(4242),
        FakeRelauncher::default(),
        FakeHost::gated(log.clone(), gate),
        fixture.settings(),
    );
    let handle = bootstrapper.handle();
    handle.mark_loaded_externally();
    let handle = bootstrapper.spawn().unwrap();
    release.send(()).unwrap();

    assert!(matches!(handle.join(), Outcome::Ready));
    let log = log.lock().unwrap();
    assert_eq!(log.invocations[0].flags, EntryPointFlags::LOADED_EXTERNALLY);
}

#[test]
fn test_many_threads_can_join() {
    let fixture = Fixture::new();
    let log = Arc::new(Mutex::new(HostLog::default()));
    let handle = Bootstrapper::new(
        fixture.resolver(),
        LocalMarkers::for_process(4242),
        FakeRelauncher::default(),
        FakeHost::new(log),
        fixture.settings(),
    )
    .spawn()
    .unwrap();

    let barrier = Arc::new(Barrier::new(4));
    let joiners: Vec<_> = (0..4)
        .map(|_| {
            let handle = handle.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                handle.join().state()
            })
        })
        .collect();

    for joiner in joiners {
        assert_eq!(joiner.join().unwrap(), BootstrapState::Ready);
    }
}

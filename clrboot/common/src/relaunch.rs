//! Restarting the host process through the launcher in portable mode.

use log::info;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::RelaunchError;

/// Presence of this file next to the bootstrapper enables portable mode.
pub const PORTABLE_MODE_FILE: &str = "ReloadedPortable.txt";

const PARAMETER_LAUNCH: &str = "--launch";
const PARAMETER_ARGUMENTS: &str = "--arguments";
const PARAMETER_KILL: &str = "--kill";

pub fn is_portable(module_directory: &Path) -> bool {
    module_directory.join(PORTABLE_MODE_FILE).exists()
}

/// Launcher invocation that restarts the current program and then kills
/// this process once the new instance is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaunchCommand {
    launcher: PathBuf,
    launch_path: OsString,
    arguments: OsString,
    kill_pid: u32,
}

impl RelaunchCommand {
    /// `command_line` is the original argv, executable first.
    pub fn new<I, S>(launcher: &Path, command_line: I, kill_pid: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command_line = command_line.into_iter();
        let launch_path = command_line
            .next()
            .map(|exe| exe.as_ref().to_os_string())
            .unwrap_or_default();

        // The launcher takes the remaining arguments as a single string and
        // splits it again with the usual Windows argv rules
        let mut arguments = OsString::new();
        for argument in command_line {
            arguments.push(" ");
            push_quoted(&mut arguments, argument.as_ref());
        }

        Self {
            launcher: launcher.to_path_buf(),
            launch_path,
            arguments,
            kill_pid,
        }
    }

    pub fn launcher(&self) -> &Path {
        &self.launcher
    }

    pub fn launch_path(&self) -> &OsStr {
        &self.launch_path
    }

    pub fn arguments(&self) -> &OsStr {
        &self.arguments
    }

    pub fn kill_pid(&self) -> u32 {
        self.kill_pid
    }

    /// Arguments passed to the launcher executable.
    pub fn args(&self) -> Vec<OsString> {
        vec![
            PARAMETER_LAUNCH.into(),
            self.launch_path.clone(),
            PARAMETER_ARGUMENTS.into(),
            self.arguments.clone(),
            PARAMETER_KILL.into(),
            self.kill_pid.to_string().into(),
        ]
    }
}

/// Appends `argument` so that `CommandLineToArgvW` reads it back unchanged.
fn push_quoted(out: &mut OsString, argument: &OsStr) {
    let text = argument.to_string_lossy();
    let needs_quotes = text.is_empty() || text.chars().any(|c| c == '"' || c.is_whitespace());
    if !needs_quotes {
        out.push(argument);
        return;
    }

    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    let mut backslashes = 0;
    for c in text.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                // Backslashes before a quote are escapes, so double them
                quoted.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.extend(std::iter::repeat('\\').take(backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    // Trailing backslashes would otherwise escape the closing quote
    quoted.extend(std::iter::repeat('\\').take(backslashes * 2));
    quoted.push('"');
    out.push(quoted);
}

pub trait Relauncher {
    /// Starts the launcher without waiting for it.
    fn relaunch(&self, command: &RelaunchCommand) -> Result<(), RelaunchError>;
}

/// Spawns the launcher as a detached process.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedRelauncher;

impl Relauncher for DetachedRelauncher {
    fn relaunch(&self, command: &RelaunchCommand) -> Result<(), RelaunchError> {
        let mut process = Command::new(command.launcher());
        process
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            use windows::Win32::System::Threading::DETACHED_PROCESS;
            process.creation_flags(DETACHED_PROCESS.0);
        }

        let child = process.spawn().map_err(|source| RelaunchError::Spawn {
            launcher: command.launcher().to_path_buf(),
            source,
        })?;

        info!(
            "Portable mode: launcher {:?} started (pid {}), it will restart this process",
            command.launcher(),
            child.id()
        );
        Ok(())
    }
}

use common::Outcome;
use log::{error, warn};
use std::io;
use std::thread;

pub const FAILURE_TITLE: &str = "[Bootstrapper] Failed to load the mod loader";

/// Text shown to the user for a failed outcome.
pub fn failure_message(outcome: &Outcome) -> Option<String> {
    let err = outcome.error()?;
    Some(format!("{}\n\nThe game will continue without mods.", err))
}

/// Surfaces a failed bootstrap to whoever is playing. Other outcomes are
/// already logged by the bootstrapper.
pub fn outcome(outcome: &Outcome) {
    if let Some(message) = failure_message(outcome) {
        error!("{}", message);
        display(&message);
    }
}

/// Logs `message` at once and shows it from a fresh thread. Used while the
/// loader lock is held, where a message box can deadlock the host.
pub fn show_error_later(message: String) {
    error!("{}", message);
    if let Err(e) = display_on_thread(message, display) {
        warn!("Failed to start the report thread: {}", e);
    }
}

fn display_on_thread<F>(message: String, show: F) -> io::Result<thread::JoinHandle<()>>
where
    F: FnOnce(&str) + Send + 'static,
{
    thread::Builder::new()
        .name("bootstrap-report".into())
        .spawn(move || show(&message))
}

fn display(message: &str) {
    #[cfg(windows)]
    message_box(message);
    #[cfg(not(windows))]
    let _ = message;
}

#[cfg(windows)]
fn message_box(message: &str) {
    use windows::core::HSTRING;
    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::WindowsAndMessaging::{MessageBoxW, MB_ICONERROR, MB_OK};

    unsafe {
        MessageBoxW(
            HWND::default(),
            &HSTRING::from(message),
            &HSTRING::from(FAILURE_TITLE),
            MB_OK | MB_ICONERROR,
        );
    }
}

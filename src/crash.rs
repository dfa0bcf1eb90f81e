//! Crash diagnostics
//!
//! Panics and fatal unix signals are appended to `crash.log` in the log
//! directory. Writes are synchronous so the record survives the process
//! going down; the signal path allocates nothing.

use std::fs::OpenOptions;
use std::io::Write;
use std::panic::PanicHookInfo;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::error;

const CRASH_LOG_FILENAME: &str = "crash.log";

static CRASH_LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Descriptor the signal handler writes to; opened before handlers are installed
#[cfg(unix)]
static CRASH_LOG_FD: OnceLock<std::os::unix::io::RawFd> = OnceLock::new();

#[cfg(unix)]
const FATAL_SIGNALS: [(libc::c_int, &str); 5] = [
    (libc::SIGSEGV, "SIGSEGV (segmentation fault)"),
    (libc::SIGABRT, "SIGABRT (abort)"),
    (libc::SIGBUS, "SIGBUS (bus error)"),
    (libc::SIGFPE, "SIGFPE (floating point exception)"),
    (libc::SIGILL, "SIGILL (illegal instruction)"),
];

/// Install the panic hook and, on unix, fatal signal handlers.
/// Returns the crash log path.
pub fn init_crash_handler(log_dir: &Path) -> std::io::Result<PathBuf> {
    let crash_log_path = log_dir.join(CRASH_LOG_FILENAME);
    let _ = CRASH_LOG_PATH.set(crash_log_path.clone());

    #[cfg(unix)]
    {
        use std::os::unix::io::IntoRawFd;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&crash_log_path)?;
        // Kept open for the life of the process
        let _ = CRASH_LOG_FD.set(file.into_raw_fd());
    }

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        record_panic(info);
        default_hook(info);
    }));

    #[cfg(unix)]
    unsafe {
        install_signal_handlers();
    }

    Ok(crash_log_path)
}

fn record_panic(info: &PanicHookInfo<'_>) {
    let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };

    let location = info
        .location()
        .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
        .unwrap_or_else(|| "unknown location".to_string());

    let thread = std::thread::current();
    let report = panic_report(
        &chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        thread.name().unwrap_or("unnamed"),
        &location,
        &message,
        &std::backtrace::Backtrace::force_capture().to_string(),
    );

    if let Some(path) = CRASH_LOG_PATH.get() {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = file.write_all(report.as_bytes());
            let _ = file.sync_all();
        }
    }

    error!("Panic in thread '{}' at {}: {}", thread.name().unwrap_or("unnamed"), location, message);
}

fn panic_report(timestamp: &str, thread: &str, location: &str, message: &str, backtrace: &str) -> String {
    let rule = "=".repeat(72);
    format!(
        "\n{rule}\nPANIC {timestamp} in thread '{thread}'\n{rule}\n\
         Location: {location}\nMessage: {message}\n\nBacktrace:\n{backtrace}\n{rule}\n"
    )
}

#[cfg(unix)]
unsafe fn install_signal_handlers() {
    for (sig, _) in FATAL_SIGNALS {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_fatal_signal as libc::sighandler_t;
        // One shot: the default disposition is restored before re-raising
        action.sa_flags = libc::SA_RESETHAND | libc::SA_SIGINFO;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(sig, &action, std::ptr::null_mut());
    }
}

/// Only async-signal-safe calls below: write, fsync, signal, raise
#[cfg(unix)]
extern "C" fn on_fatal_signal(sig: libc::c_int, _info: *mut libc::siginfo_t, _ctx: *mut libc::c_void) {
    let name = FATAL_SIGNALS
        .iter()
        .find(|(s, _)| *s == sig)
        .map(|(_, name)| *name)
        .unwrap_or("unknown signal");

    let mut buf = [0u8; 160];
    let len = signal_record(&mut buf, sig, name);

    unsafe {
        if let Some(&fd) = CRASH_LOG_FD.get() {
            libc::write(fd, buf.as_ptr() as *const libc::c_void, len);
            libc::fsync(fd);
        }
        libc::write(2, buf.as_ptr() as *const libc::c_void, len);
        libc::signal(sig, libc::SIG_DFL);
        libc::raise(sig);
    }
}

/// `"\nCRASH: <name> (signal <n>)\n"` into `buf` without allocating; returns the length
#[cfg(unix)]
fn signal_record(buf: &mut [u8; 160], sig: libc::c_int, name: &str) -> usize {
    let mut len = 0;
    let mut push = |bytes: &[u8], len: &mut usize| {
        let n = bytes.len().min(buf.len() - *len);
        buf[*len..*len + n].copy_from_slice(&bytes[..n]);
        *len += n;
    };

    push(b"\nCRASH: ", &mut len);
    push(name.as_bytes(), &mut len);
    push(b" (signal ", &mut len);

    let mut digits = [0u8; 12];
    let mut n = sig.unsigned_abs();
    let mut i = digits.len();
    loop {
        i -= 1;
        digits[i] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    push(&digits[i..], &mut len);
    push(b")\n", &mut len);
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_report_layout() {
        let report = panic_report(
            "2024-01-01 12:00:00.000",
            "video-capture",
            "src/session/video_loop.rs:10:5",
            "boom",
            "<frames>",
        );
        assert!(report.contains("PANIC 2024-01-01 12:00:00.000 in thread 'video-capture'"));
        assert!(report.contains("Location: src/session/video_loop.rs:10:5"));
        assert!(report.contains("Message: boom"));
        assert!(report.contains("Backtrace:\n<frames>"));
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_record() {
        let mut buf = [0u8; 160];
        let len = signal_record(&mut buf, libc::SIGSEGV, "SIGSEGV (segmentation fault)");
        let text = std::str::from_utf8(&buf[..len]).unwrap();
        assert_eq!(
            text,
            format!("\nCRASH: SIGSEGV (segmentation fault) (signal {})\n", libc::SIGSEGV)
        );
    }
}

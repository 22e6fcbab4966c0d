//! Signal handling: handlers only flip atomic flags, the event loop
//! consumes them. These statics are the only process-global mutable
//! state in the daemon.

use libc;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);
static RELOAD: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(signal: libc::c_int) {
    match signal {
        libc::SIGTERM | libc::SIGINT => SHUTDOWN.store(true, Ordering::SeqCst),
        libc::SIGHUP => RELOAD.store(true, Ordering::SeqCst),
        _ => (),
    }
}

/// Install the handlers for SIGTERM, SIGINT and SIGHUP.
pub fn install() -> io::Result<()> {
    unsafe {
        for &signal in &[libc::SIGTERM, libc::SIGINT, libc::SIGHUP] {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handle_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
            libc::sigemptyset(&mut action.sa_mask);

            if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }

    Ok(())
}

/// True once a clean shutdown was requested.
pub fn shutdown() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

/// Consume a pending reload request.
pub fn take_reload() -> bool {
    RELOAD.swap(false, Ordering::SeqCst)
}

//! Signal installation (C11).
//!
//! `SIGINT`/`SIGTERM` flip a shared `Arc<AtomicBool>`, consumed only from the
//! main thread's run loop — never read from inside the handler itself,
//! matching the corpus's convention of treating signal handlers as nothing
//! more than flag-setters. `SIGPIPE` is ignored so a write to a peer that has
//! already closed its socket surfaces as an `EPIPE`-shaped `io::Error`
//! instead of terminating the process.
//!
//! `signal-hook` has no portable `SIG_IGN` helper, so `SIGPIPE` is silenced
//! with a direct `libc::signal` call — documented here as the one place in
//! this crate that reaches past a safe wrapper into raw libc FFI.

use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Registers `SIGINT` and `SIGTERM` to set `flag`, and ignores `SIGPIPE`.
pub fn install(flag: &Arc<AtomicBool>) -> io::Result<()> {
    signal_hook::flag::register(signal_hook::consts::SIGINT, flag.clone())?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, flag.clone())?;
    ignore_sigpipe();
    Ok(())
}

fn ignore_sigpipe() {
    // SAFETY: SIG_IGN is a valid sigaction disposition and SIGPIPE is a
    // valid, always-defined signal number on the platforms this crate
    // targets; this call has no aliasing or lifetime preconditions.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[test]
    fn register_flips_flag_on_sigterm() {
        let flag = Arc::new(AtomicBool::new(false));
        install(&flag).unwrap();

        assert!(!flag.load(Ordering::Relaxed));
        unsafe {
            libc::raise(libc::SIGTERM);
        }
        std::thread::sleep(Duration::from_millis(50));
        assert!(flag.load(Ordering::Relaxed));
    }
}

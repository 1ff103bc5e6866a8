//! Process lifetime state: the run flag and the two thread counters mato
//! tracks (spec §7, "Threading and lifetime").
//!
//! Grounded in `original_source/mato/mato_core.c`'s `program_runs`,
//! `threads_started`/`mato_inc_thread_count`/`mato_dec_thread_count`/
//! `mato_threads_running` (module-owned worker threads, started by module
//! `start()` implementations) and `system_threads_started`/
//! `mato_inc_system_thread_count`/`mato_dec_system_thread_count`/
//! `mato_system_threads_running` (the framework's own redistribution/net
//! tasks). `core_mato_shutdown()` stops accepting new work and blocks until
//! every system thread has unwound; we do the equivalent with a
//! `tokio::sync::watch` run flag and an async wait on an atomic counter.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tokio::sync::watch;

/// Tracks whether the framework is still accepting work, plus the two
/// thread populations the original process distinguished.
pub(crate) struct Shutdown {
    run_tx: watch::Sender<bool>,
    run_rx: watch::Receiver<bool>,
    /// Module-owned worker threads/tasks, counted via
    /// [`Self::inc_thread_count`]/[`Self::dec_thread_count`].
    module_threads: AtomicI64,
    /// The framework's own long-running tasks (redistribution loop,
    /// acceptor, reconnector, per-connection readers, log writer).
    system_threads: AtomicI64,
}

impl Shutdown {
    pub fn new() -> Self {
        let (run_tx, run_rx) = watch::channel(true);
        Self {
            run_tx,
            run_rx,
            module_threads: AtomicI64::new(0),
            system_threads: AtomicI64::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        *self.run_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.run_rx.clone()
    }

    /// `mato_inc_thread_count`.
    pub fn inc_thread_count(&self) {
        self.module_threads.fetch_add(1, Ordering::SeqCst);
    }

    /// `mato_dec_thread_count`.
    pub fn dec_thread_count(&self) {
        self.module_threads.fetch_sub(1, Ordering::SeqCst);
    }

    /// `mato_threads_running`.
    pub fn threads_running(&self) -> i64 {
        self.module_threads.load(Ordering::SeqCst)
    }

    /// `mato_inc_system_thread_count`.
    pub fn inc_system_thread_count(&self) {
        self.system_threads.fetch_add(1, Ordering::SeqCst);
    }

    /// `mato_dec_system_thread_count`.
    pub fn dec_system_thread_count(&self) {
        self.system_threads.fetch_sub(1, Ordering::SeqCst);
    }

    /// `mato_system_threads_running`.
    pub fn system_threads_running(&self) -> i64 {
        self.system_threads.load(Ordering::SeqCst)
    }

    /// `core_mato_shutdown`: flips the run flag so every loop watching it
    /// exits, then blocks until the framework's own tasks have all wound
    /// down. Does not wait on `module_threads` — those are owned by module
    /// code and the spec leaves draining them to the caller, matching the
    /// original never joining `threads_started` either.
    pub async fn shutdown(&self) {
        let _ = self.run_tx.send(false);
        while self.system_threads_running() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// RAII guard pairing with [`Shutdown::inc_thread_count`]/`inc_system_thread_count`
/// so a task that exits early (panic, early return, cancellation) still
/// decrements. Mirrors every module worker loop in the original being
/// structured as `inc(); while (program_runs) {...}; dec();` — the guard
/// makes that pairing exception-safe.
pub(crate) struct ThreadCountGuard<'a> {
    shutdown: &'a Shutdown,
    system: bool,
}

impl<'a> ThreadCountGuard<'a> {
    pub fn module(shutdown: &'a Shutdown) -> Self {
        shutdown.inc_thread_count();
        Self {
            shutdown,
            system: false,
        }
    }

    pub fn system(shutdown: &'a Shutdown) -> Self {
        shutdown.inc_system_thread_count();
        Self {
            shutdown,
            system: true,
        }
    }
}

impl Drop for ThreadCountGuard<'_> {
    fn drop(&mut self) {
        if self.system {
            self.shutdown.dec_system_thread_count();
        } else {
            self.shutdown.dec_thread_count();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_completes_once_system_threads_drain() {
        let sd = Shutdown::new();
        let guard = ThreadCountGuard::system(&sd);
        assert_eq!(sd.system_threads_running(), 1);
        let sd_ref = &sd;
        let waiter = async move {
            sd_ref.shutdown().await;
        };
        drop(guard);
        waiter.await;
        assert!(!sd.is_running());
    }

    #[test]
    fn module_and_system_counters_are_independent() {
        let sd = Shutdown::new();
        let _m = ThreadCountGuard::module(&sd);
        let _s = ThreadCountGuard::system(&sd);
        assert_eq!(sd.threads_running(), 1);
        assert_eq!(sd.system_threads_running(), 1);
    }
}

// src/controller.rs
// module: controller | role: Execution Controller (C5)
// summary: the single cooperative cancel/pause primitive every suspendable node
// and every C1 primitive calls at its entry point (SPEC_FULL.md §4.5, §9).
// Grounded on the teacher's parking_lot usage for shared synchronization primitives
// throughout core/adapters and services/adb/session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Shared stop/pause signal. Cheap to clone (wraps an `Arc`); every
/// suspendable operation holds a reference to the same controller.
#[derive(Clone)]
pub struct ExecutionController {
    inner: Arc<Inner>,
}

struct Inner {
    active: AtomicBool,
    stop_requested: AtomicBool,
    paused: AtomicBool,
    // Pairs with `paused` purely so `check_and_wait` can block instead of
    // spin-polling; the bits above remain the source of truth.
    wake: Condvar,
    wake_lock: Mutex<()>,
}

impl Default for ExecutionController {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionController {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                active: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                wake: Condvar::new(),
                wake_lock: Mutex::new(()),
            }),
        }
    }

    pub fn start(&self) {
        self.inner.active.store(true, Ordering::SeqCst);
        self.inner.stop_requested.store(false, Ordering::SeqCst);
        self.inner.paused.store(false, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.inner.stop_requested.store(true, Ordering::SeqCst);
        self.inner.paused.store(false, Ordering::SeqCst);
        self.wake_all();
    }

    /// Only takes effect if the controller is active and not already stopped.
    pub fn pause(&self) {
        if self.inner.active.load(Ordering::SeqCst) && !self.inner.stop_requested.load(Ordering::SeqCst) {
            self.inner.paused.store(true, Ordering::SeqCst);
        }
    }

    /// `resume` without a prior pause is a no-op (SPEC_FULL.md §8 idempotence).
    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        self.wake_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stop_requested.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// If stopped, returns `false` immediately. If paused, blocks until
    /// resumed or stopped. Otherwise returns `true`. Every Step Graph node
    /// entry and every C1 primitive call this before doing any work.
    pub fn check_and_wait(&self) -> bool {
        if self.is_stopped() {
            return false;
        }

        if self.is_paused() {
            let mut guard = self.inner.wake_lock.lock();
            while self.is_paused() && !self.is_stopped() {
                self.inner.wake.wait(&mut guard);
            }
        }

        !self.is_stopped()
    }

    fn wake_all(&self) {
        let _guard = self.inner.wake_lock.lock();
        self.inner.wake.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn stop_short_circuits_check_and_wait() {
        let ctrl = ExecutionController::new();
        ctrl.start();
        ctrl.stop();
        assert!(!ctrl.check_and_wait());
    }

    #[test]
    fn resume_without_pause_is_noop() {
        let ctrl = ExecutionController::new();
        ctrl.start();
        ctrl.resume();
        assert!(!ctrl.is_paused());
        assert!(ctrl.check_and_wait());
    }

    #[test]
    fn pause_blocks_until_resume() {
        let ctrl = ExecutionController::new();
        ctrl.start();
        ctrl.pause();

        let waiter = ctrl.clone();
        let handle = thread::spawn(move || waiter.check_and_wait());

        thread::sleep(Duration::from_millis(50));
        ctrl.resume();

        let proceeded = handle.join().unwrap();
        assert!(proceeded);
    }

    #[test]
    fn pause_blocks_until_stop() {
        let ctrl = ExecutionController::new();
        ctrl.start();
        ctrl.pause();

        let waiter = ctrl.clone();
        let handle = thread::spawn(move || waiter.check_and_wait());

        thread::sleep(Duration::from_millis(50));
        ctrl.stop();

        let proceeded = handle.join().unwrap();
        assert!(!proceeded);
    }

    #[test]
    fn pause_noop_once_stopped() {
        let ctrl = ExecutionController::new();
        ctrl.start();
        ctrl.stop();
        ctrl.pause();
        assert!(!ctrl.is_paused());
    }
}

//! A port used by the unit tests. CPU Lock and the timer state are
//! thread-local, so tests running in parallel don't interfere.
use std::cell::Cell;

use crate::{PortThreading, PortTimer};

pub(crate) struct TestPort;

thread_local! {
    static CPU_LOCK: Cell<bool> = Cell::new(false);
    static TIMER_RUNNING: Cell<bool> = Cell::new(false);
}

unsafe impl PortThreading for TestPort {
    unsafe fn try_enter_cpu_lock() -> bool {
        !CPU_LOCK.with(|x| x.replace(true))
    }

    unsafe fn leave_cpu_lock() {
        assert!(CPU_LOCK.with(|x| x.replace(false)));
    }

    fn is_cpu_lock_active() -> bool {
        CPU_LOCK.with(Cell::get)
    }
}

impl PortTimer for TestPort {
    fn start_timer() {
        TIMER_RUNNING.with(|x| x.set(true));
    }

    fn stop_timer() {
        TIMER_RUNNING.with(|x| x.set(false));
    }
}

impl TestPort {
    pub(crate) fn is_timer_running() -> bool {
        TIMER_RUNNING.with(Cell::get)
    }
}

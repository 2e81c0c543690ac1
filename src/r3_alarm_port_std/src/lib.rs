#![doc = include_str!("./lib.md")]
#![deny(unsafe_op_in_unsafe_fn)]
use r3_alarm::{AlarmManager, PortThreading, TickError};
use spin::Mutex as SpinMutex;
use std::{
    cell::Cell,
    sync::atomic::{AtomicBool, Ordering},
    thread::ThreadId,
};

mod ticker;


pub use self::ticker::{Ticker, TickerConfig, TickerConfigError, ENV_TICK_PERIOD};

/// Used by `use_port!`
#[doc(hidden)]
pub extern crate r3_alarm;

/// Implemented on a port type by [`use_port!`].
///
/// # Safety
///
/// Only meant to be implemented by [`use_port!`].
#[doc(hidden)]
pub unsafe trait PortInstance: Send + Sync + 'static {
    fn port_state() -> &'static State;
}

/// The internal state of a simulated CPU.
///
/// Each port type defined by [`use_port!`] owns one `State`, so alarm
/// managers on different port types don't contend for CPU Lock.
#[doc(hidden)]
pub struct State {
    /// The thread currently holding CPU Lock.
    cpu_lock: SpinMutex<Option<ThreadId>>,
    timer_running: AtomicBool,
}

/// The role of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadRole {
    Unknown,
    /// The backing thread for the timer interrupt (or a simulated one).
    Interrupt,
}

thread_local! {
    /// The current thread's role. Threads not created by the port start as
    /// `Unknown`.
    static THREAD_ROLE: Cell<ThreadRole> = Cell::new(ThreadRole::Unknown);
}

impl State {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            cpu_lock: SpinMutex::new(None),
            timer_running: AtomicBool::new(false),
        }
    }

    /// Wait until no other thread holds CPU Lock, then take it.
    ///
    /// A real CPU Lock masks the timer interrupt, deferring it until the lock
    /// is released. Blocking here is the hosted equivalent. Returns `false`
    /// if the current thread already holds CPU Lock.
    pub fn try_enter_cpu_lock(&self) -> bool {
        let current = std::thread::current().id();
        loop {
            let mut owner = self.cpu_lock.lock();
            match *owner {
                Some(id) if id == current => {
                    log::trace!("try_enter_cpu_lock: already held by this thread");
                    return false;
                }
                Some(_) => {}
                None => {
                    *owner = Some(current);
                    return true;
                }
            }
            drop(owner);
            std::thread::yield_now();
        }
    }

    pub fn leave_cpu_lock(&self) {
        let mut owner = self.cpu_lock.lock();
        assert_eq!(
            *owner,
            Some(std::thread::current().id()),
            "CPU Lock is not held by the current thread"
        );
        *owner = None;
    }

    pub fn is_cpu_lock_active(&self) -> bool {
        *self.cpu_lock.lock() == Some(std::thread::current().id())
    }

    pub fn start_timer(&self) {
        log::debug!("start_timer");
        self.timer_running.store(true, Ordering::Release);
    }

    pub fn stop_timer(&self) {
        log::debug!("stop_timer");
        self.timer_running.store(false, Ordering::Release);
    }

    /// Get a flag indicating whether the timer interrupt is enabled.
    pub fn is_timer_running(&self) -> bool {
        self.timer_running.load(Ordering::Acquire)
    }
}

/// Get a flag indicating whether the current thread is running the timer
/// interrupt handler.
///
/// Alarm callbacks always observe `true`.
pub fn is_interrupt_context() -> bool {
    THREAD_ROLE.with(|role| role.get() == ThreadRole::Interrupt)
}

/// Sets [`THREAD_ROLE`] to `Interrupt` and restores the previous role on drop.
struct InterruptContextGuard(ThreadRole);

impl InterruptContextGuard {
    fn enter() -> Self {
        Self(THREAD_ROLE.with(|role| role.replace(ThreadRole::Interrupt)))
    }
}

impl Drop for InterruptContextGuard {
    fn drop(&mut self) {
        THREAD_ROLE.with(|role| role.set(self.0));
    }
}

/// Deliver one timer interrupt on the current thread.
///
/// Unlike [`Ticker`], this ignores whether the timer is running, which makes
/// it suitable for driving an [`AlarmManager`] deterministically in tests.
///
/// # Errors
///
/// `BadContext` if the current thread holds CPU Lock (an interrupt can't be
/// taken there).
pub fn simulate_tick<Traits: PortThreading, const N: usize>(
    alarms: &AlarmManager<'_, Traits, N>,
) -> Result<(), TickError> {
    let _guard = InterruptContextGuard::enter();
    log::trace!("simulate_tick");

    // Safety: We are the port, and this is (simulated) interrupt context
    unsafe { alarms.timer_tick() }
}

/// Install `env_logger` as the logger. Does nothing if a logger is already
/// installed, so every test can call this.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Define a port type backed by its own simulated CPU.
///
/// ```
/// r3_alarm_port_std::use_port!(unsafe struct MyPort);
///
/// static ALARMS: r3_alarm::AlarmManager<'static, MyPort, 8> =
///     r3_alarm::AlarmManager::new();
/// # assert_eq!(ALARMS.scheduled_len(), Ok(0));
/// ```
#[macro_export]
macro_rules! use_port {
    ($(#[$meta:meta])* unsafe $vis:vis struct $Traits:ident) => {
        $(#[$meta])*
        $vis struct $Traits;

        unsafe impl $crate::PortInstance for $Traits {
            #[inline]
            fn port_state() -> &'static $crate::State {
                static PORT_STATE: $crate::State = $crate::State::new();
                &PORT_STATE
            }
        }

        unsafe impl $crate::r3_alarm::PortThreading for $Traits {
            unsafe fn try_enter_cpu_lock() -> bool {
                <Self as $crate::PortInstance>::port_state().try_enter_cpu_lock()
            }

            unsafe fn leave_cpu_lock() {
                <Self as $crate::PortInstance>::port_state().leave_cpu_lock()
            }

            fn is_cpu_lock_active() -> bool {
                <Self as $crate::PortInstance>::port_state().is_cpu_lock_active()
            }
        }

        impl $crate::r3_alarm::PortTimer for $Traits {
            fn start_timer() {
                <Self as $crate::PortInstance>::port_state().start_timer()
            }

            fn stop_timer() {
                <Self as $crate::PortInstance>::port_state().stop_timer()
            }
        }
    };
}

use_port!(
    /// The default hosted port.
    unsafe pub struct StdPort
);

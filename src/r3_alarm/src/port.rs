//! The interface between the scheduler and the platform.
//!
//! A *port* supplies two things the scheduler can't do portably: masking the
//! timer interrupt source (*CPU Lock*) and controlling the periodic hardware
//! timer. Installing the interrupt handler and configuring the timer's period
//! are entirely up to the port.

/// Masking of the timer interrupt, i.e., the *CPU Lock* state.
///
/// # Safety
///
/// Implementing a port is inherently unsafe because the scheduler's memory
/// safety depends on CPU Lock providing mutual exclusion between the timer
/// interrupt handler and every other context that calls into
/// [`AlarmManager`](crate::AlarmManager).
///
/// These methods are only meant to be called by the scheduler.
pub unsafe trait PortThreading: Sized + Send + Sync + 'static {
    /// Disable the timer interrupt (and any other interrupt whose handler may
    /// call into the scheduler), thus activating CPU Lock. Return `true` if
    /// CPU Lock was inactive in the current context and has just been
    /// activated. Return `false` if CPU Lock was already active in the
    /// current context, in which case nothing should happen.
    ///
    /// If another context holds CPU Lock (this can only happen on a hosted or
    /// multi-core port), this method should wait until it's released.
    unsafe fn try_enter_cpu_lock() -> bool;

    /// Re-enable the interrupts previously disabled by
    /// [`try_enter_cpu_lock`](Self::try_enter_cpu_lock), thus deactivating
    /// CPU Lock.
    ///
    /// Precondition: CPU Lock active
    unsafe fn leave_cpu_lock();

    /// Return a flag indicating whether CPU Lock is active in the current
    /// context.
    fn is_cpu_lock_active() -> bool;
}

/// Control of the periodic timer that drives
/// [`AlarmManager::timer_tick`](crate::AlarmManager::timer_tick).
pub trait PortTimer {
    /// Start (or resume) delivering timer ticks.
    fn start_timer();

    /// Stop delivering timer ticks. Outstanding alarms stay scheduled and
    /// resume counting down when the timer is started again.
    fn stop_timer();
}

/// Represents a complete port.
pub trait Port: PortThreading + PortTimer {}
impl<T: PortThreading + PortTimer> Port for T {}

//! The alarm manager
use core::fmt;

use crate::{
    error::{InitError, QueryError, RequestAlarmError, TickError},
    klock::{lock_cpu, CpuLockCell},
    pool::SlotPool,
    tick::{self, Tick, DELAY_MAX},
    utils::Init,
    Callback, PortThreading, PortTimer,
};

#[cfg(test)]
mod tests;

/// The default number of slots in an [`AlarmManager`].
pub const DEFAULT_CAPACITY: usize = 64;

#[doc = svgbobdoc::transform!(
/// A fixed-capacity scheduler that invokes callbacks after a requested number
/// of timer ticks.
///
/// `AlarmManager` owns `N` statically allocated slots. Each slot is on one of
/// two singly linked lists threaded through the slot array by index: the
/// *free list* and the *scheduled list*, which is sorted by fire tick.
///
/// ```svgbob
///            scheduled_head
///                  |
///                  v
///   .---------.    .---------.    .---------.    .---------.
///   | slot 3  |--->| slot 0  |--->| slot 2  |--->| slot 4  |---> END
///   | tick 5  |    | tick 5  |    | tick 8  |    | tick 10 |
///   '---------'    '---------'    '---------'    '---------'
///        ^
///        |                      .---------.    .---------.
///   (3 is the head)  free_head->| slot 1  |--->| slot 5  |---> END
///                               '---------'    '---------'
/// ```
///
/// A request ([`request_alarm`]) moves a slot from the free list into the
/// scheduled list with an O(n) sorted insertion. A tick ([`timer_tick`])
/// pops due slots from the head of the scheduled list and returns them to
/// the free list in O(1) each.
///
/// Both paths run inside *CPU Lock*, provided by the port `Traits`. CPU Lock
/// masks the timer interrupt, so the tick handler can't observe the lists in
/// the middle of an insertion.
///
/// The lifetime `'a` bounds the callbacks' captured state. A `static` manager
/// only accepts `'static` callbacks.
///
/// # Examples
///
/// ```
/// use r3_alarm::{AlarmManager, Callback};
/// # use r3_alarm::{PortThreading, PortTimer};
/// # use std::{cell::Cell, sync::atomic::{AtomicUsize, Ordering}};
/// # struct MyPort;
/// # thread_local! { static LOCKED: Cell<bool> = Cell::new(false); }
/// # unsafe impl PortThreading for MyPort {
/// #     unsafe fn try_enter_cpu_lock() -> bool { !LOCKED.with(|l| l.replace(true)) }
/// #     unsafe fn leave_cpu_lock() { LOCKED.with(|l| l.set(false)) }
/// #     fn is_cpu_lock_active() -> bool { LOCKED.with(|l| l.get()) }
/// # }
/// # impl PortTimer for MyPort { fn start_timer() {} fn stop_timer() {} }
/// static FIRED: AtomicUsize = AtomicUsize::new(0);
/// fn on_alarm() {
///     FIRED.fetch_add(1, Ordering::Relaxed);
/// }
///
/// static ALARMS: AlarmManager<'static, MyPort, 4> = AlarmManager::new();
///
/// ALARMS.request_alarm(2, Callback::new(&on_alarm)).unwrap();
///
/// // The port calls this from its timer interrupt handler
/// unsafe { ALARMS.timer_tick().unwrap() };
/// assert_eq!(FIRED.load(Ordering::Relaxed), 0);
/// unsafe { ALARMS.timer_tick().unwrap() };
/// assert_eq!(FIRED.load(Ordering::Relaxed), 1);
/// ```
///
/// [`request_alarm`]: Self::request_alarm
/// [`timer_tick`]: Self::timer_tick
)]
pub struct AlarmManager<'a, Traits, const N: usize = DEFAULT_CAPACITY> {
    state: CpuLockCell<Traits, AlarmState<'a, N>>,
}

/// The state protected by CPU Lock.
pub(crate) struct AlarmState<'a, const N: usize> {
    pub(crate) pool: SlotPool<'a, N>,

    /// The number of slots in the scheduled list.
    pub(crate) total_callbacks: u8,

    /// The tick counter. Incremented once per [`AlarmManager::timer_tick`].
    pub(crate) now: Tick,
}

impl<const N: usize> Init for AlarmState<'_, N> {
    const INIT: Self = Self {
        pool: Init::INIT,
        total_callbacks: Init::INIT,
        now: Init::INIT,
    };
}

impl<'a, const N: usize> AlarmState<'a, N> {
    /// Discard every scheduled alarm. The tick counter keeps running.
    pub(crate) fn reset(&mut self) {
        self.pool.reset();
        self.total_callbacks = 0;
    }

    /// Claim a free slot and link it into the scheduled list. Returns the
    /// slot index.
    pub(crate) fn schedule(
        &mut self,
        delay: Tick,
        callback: Callback<'a>,
    ) -> Result<usize, RequestAlarmError> {
        if usize::from(self.total_callbacks) >= N {
            return Err(RequestAlarmError::CapacityExceeded);
        }

        let now = self.now;
        let i = self
            .pool
            .pop_free()
            .ok_or(RequestAlarmError::CapacityExceeded)?;

        let slot = self.pool.slot_mut(i);
        // The earliest fire tick is the next one. An alarm requested by a
        // callback is never due in the `timer_tick` call that invoked it.
        slot.fire_tick = now.wrapping_add(delay.max(1));
        slot.callback = callback;
        slot.in_use = true;

        self.pool.insert_scheduled(i, now);
        self.total_callbacks += 1;

        Ok(i)
    }

    /// If the earliest scheduled alarm is due, return it to the free list and
    /// return its callback.
    pub(crate) fn take_due(&mut self) -> Option<Callback<'a>> {
        let head = self.pool.scheduled_head()?;
        if !tick::is_due(self.pool.slots()[head].fire_tick, self.now) {
            return None;
        }

        let slot = self.pool.slot_mut(head);
        let callback = core::mem::take(&mut slot.callback);
        slot.in_use = false;
        self.total_callbacks -= 1;

        let i = self.pool.pop_scheduled();
        debug_assert_eq!(i, Some(head));
        self.pool.push_free(head);

        Some(callback)
    }
}

impl<'a, Traits, const N: usize> AlarmManager<'a, Traits, N> {
    /// The number of slots.
    pub const CAPACITY: usize = N;

    /// Construct an `AlarmManager` with all slots free and the tick counter
    /// at zero.
    ///
    /// The constructed manager is ready for use; calling [`init`] is not
    /// required.
    ///
    /// [`init`]: Self::init
    pub const fn new() -> Self {
        Self {
            state: CpuLockCell::new(AlarmState::INIT),
        }
    }

    /// Get the number of slots.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<'a, Traits, const N: usize> Init for AlarmManager<'a, Traits, N> {
    const INIT: Self = Self::new();
}

impl<'a, Traits, const N: usize> Default for AlarmManager<'a, Traits, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, Traits: PortThreading, const N: usize> AlarmManager<'a, Traits, N> {
    /// Discard every pending alarm and relink all slots into the free list.
    ///
    /// The tick counter is not affected.
    pub fn init(&self) -> Result<(), InitError> {
        let mut lock = lock_cpu::<Traits>()?;
        self.state.write(&mut *lock).reset();
        log::trace!("init: {N} slots free");
        Ok(())
    }

    /// Request that `callback` be invoked `delay` ticks from now.
    ///
    /// The callback is invoked by the [`timer_tick`] call that advances the
    /// tick counter to the fire tick, or by the first one after that. A
    /// `delay` of zero is treated as one and fires on the next tick, even
    /// when requested from a callback that is running inside `timer_tick`.
    ///
    /// # Errors
    ///
    ///  - `InvalidCallback`: `callback` is [null](Callback::NULL).
    ///  - `DelayOutOfRange`: `delay` is greater than [`DELAY_MAX`].
    ///  - `BadContext`: CPU Lock is already active in the current context.
    ///  - `CapacityExceeded`: all `N` slots are already scheduled.
    ///
    /// No state is modified on failure.
    ///
    /// [`timer_tick`]: Self::timer_tick
    pub fn request_alarm(
        &self,
        delay: Tick,
        callback: Callback<'a>,
    ) -> Result<(), RequestAlarmError> {
        if callback.is_null() {
            log::trace!("request_alarm: rejecting a null callback");
            return Err(RequestAlarmError::InvalidCallback);
        }

        if delay > DELAY_MAX {
            log::trace!("request_alarm: rejecting delay {delay}");
            return Err(RequestAlarmError::DelayOutOfRange);
        }

        let mut lock = lock_cpu::<Traits>()?;
        let state = self.state.write(&mut *lock);
        match state.schedule(delay, callback) {
            Ok(i) => {
                log::trace!(
                    "request_alarm: slot {i} fires at {}",
                    state.pool.slots()[i].fire_tick
                );
                Ok(())
            }
            Err(e) => {
                log::trace!("request_alarm: {e:?}");
                Err(e)
            }
        }
    }

    /// Advance the tick counter and invoke every callback that has become
    /// due, earliest first.
    ///
    /// CPU Lock is released while each callback runs, so a callback may call
    /// [`request_alarm`] (e.g., to re-arm itself). The slot of the firing
    /// alarm is already back in the free list by then.
    ///
    /// If the scheduled list is empty, this only increments the counter.
    ///
    /// # Errors
    ///
    ///  - `BadContext`: CPU Lock is already active in the current context.
    ///    If this happens after some callbacks were invoked, the remaining
    ///    due alarms are left for the next tick.
    ///
    /// # Safety
    ///
    /// Only meant to be called by the port, once per timer period, from the
    /// timer interrupt handler (or its simulation). Calling it from elsewhere
    /// makes every outstanding alarm fire early.
    ///
    /// [`request_alarm`]: Self::request_alarm
    pub unsafe fn timer_tick(&self) -> Result<(), TickError> {
        let mut lock = lock_cpu::<Traits>()?;

        {
            let state = self.state.write(&mut *lock);
            state.now = state.now.wrapping_add(1);
            if state.total_callbacks == 0 {
                return Ok(());
            }
        }

        // Could have multiple alarms in the same tick
        loop {
            let Some(callback) = self.state.write(&mut *lock).take_due() else {
                break;
            };

            // The slot is already free. Release CPU Lock so that the callback
            // can request another alarm.
            drop(lock);
            callback.call();
            lock = lock_cpu::<Traits>()?;
        }

        Ok(())
    }

    /// Get the current value of the tick counter.
    pub fn now(&self) -> Result<Tick, QueryError> {
        let lock = lock_cpu::<Traits>()?;
        Ok(self.state.read(&*lock).now)
    }

    /// Get the number of scheduled alarms.
    pub fn scheduled_len(&self) -> Result<usize, QueryError> {
        let lock = lock_cpu::<Traits>()?;
        Ok(usize::from(self.state.read(&*lock).total_callbacks))
    }

    /// Get the number of free slots.
    pub fn free_len(&self) -> Result<usize, QueryError> {
        let lock = lock_cpu::<Traits>()?;
        Ok(self.state.read(&*lock).pool.free_iter().count())
    }

    /// Call `f` with the fire tick and the `in_use` flag of each scheduled
    /// alarm, earliest first.
    ///
    /// `f` is called with CPU Lock active. Any call it makes to `self` will
    /// fail with `BadContext`.
    pub fn for_each_scheduled(&self, mut f: impl FnMut(Tick, bool)) -> Result<(), QueryError> {
        let lock = lock_cpu::<Traits>()?;
        let pool = &self.state.read(&*lock).pool;
        for i in pool.scheduled_iter() {
            let slot = &pool.slots()[i];
            f(slot.fire_tick, slot.in_use);
        }
        Ok(())
    }

    /// Check the structural invariants of the lists. Returns `false` if
    /// they're broken.
    ///
    /// Intended for tests and debug assertions; runs in O(N) with CPU Lock
    /// active.
    pub fn check_consistency(&self) -> Result<bool, QueryError> {
        let lock = lock_cpu::<Traits>()?;
        Ok(self.state.read(&*lock).is_consistent())
    }
}

impl<const N: usize> AlarmState<'_, N> {
    fn is_consistent(&self) -> bool {
        let mut owner = [None; N];

        for (list, iter) in [
            (false, self.pool.free_iter()),
            (true, self.pool.scheduled_iter()),
        ] {
            for i in iter {
                if owner[i].replace(list).is_some() {
                    return false;
                }
            }
        }

        let scheduled = self.pool.scheduled_iter().count();
        let sorted = self
            .pool
            .scheduled_iter()
            .map(|i| tick::ticks_until(self.pool.slots()[i].fire_tick, self.now))
            .try_fold(i32::MIN, |last, x| (last <= x).then_some(x))
            .is_some();

        owner.iter().all(Option::is_some)
            && scheduled == usize::from(self.total_callbacks)
            && sorted
            && self
                .pool
                .scheduled_iter()
                .all(|i| self.pool.slots()[i].in_use)
    }
}

impl<'a, Traits: PortThreading + PortTimer, const N: usize> AlarmManager<'a, Traits, N> {
    /// Start the port's periodic timer.
    pub fn start_timer(&self) {
        log::trace!("start_timer");
        Traits::start_timer();
    }

    /// Stop the port's periodic timer. Pending alarms stay scheduled.
    pub fn stop_timer(&self) {
        log::trace!("stop_timer");
        Traits::stop_timer();
    }
}

impl<Traits: PortThreading, const N: usize> fmt::Debug for AlarmManager<'_, Traits, N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AlarmManager")
            .field(
                "state",
                &self.state.debug_fmt_with_ref(|state, f| {
                    f.debug_struct("AlarmState")
                        .field("now", &state.now)
                        .field("total_callbacks", &state.total_callbacks)
                        .field("pool", &state.pool)
                        .finish()
                }),
            )
            .finish()
    }
}

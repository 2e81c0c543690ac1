//! Tick counts and their wrap-aware ordering.
//!
//! The tick counter is a free-running 32-bit value that wraps around after
//! `u32::MAX`. Fire ticks are absolute values on the same circle, so the
//! natural integer order breaks down near the wrap point. Instead, every fire
//! tick is compared by its signed distance from the current tick:
//!
//! ```text
//!                 overdue ◀──┼──▶ pending
//! ═══════════════════════════╤════════════════════════════════════
//!   ..., now-1               now    now+1, ..., now+DELAY_MAX
//! ```
//!
//! Because a request can't ask for more than [`DELAY_MAX`] ticks, and every
//! alarm fires as soon as it becomes due, all outstanding fire ticks stay
//! within `now - 1 ..= now + DELAY_MAX`. This span fits in `i32`, which makes
//! the order total and stable across the wrap.

/// An absolute tick count.
pub type Tick = u32;

/// The maximum delay accepted by
/// [`AlarmManager::request_alarm`](crate::AlarmManager::request_alarm).
pub const DELAY_MAX: Tick = i32::MAX as Tick;

/// Get the signed number of ticks from `now` until `fire_tick`. The result is
/// zero or negative if the fire tick has been reached.
#[inline]
pub const fn ticks_until(fire_tick: Tick, now: Tick) -> i32 {
    fire_tick.wrapping_sub(now) as i32
}

/// Get a flag indicating whether an alarm set for `fire_tick` should fire at
/// tick `now`.
#[inline]
pub const fn is_due(fire_tick: Tick, now: Tick) -> bool {
    ticks_until(fire_tick, now) <= 0
}

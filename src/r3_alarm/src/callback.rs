//! Provides [`Callback`], a borrowed handle to an alarm's callback function.
use core::fmt;

use crate::utils::Init;

/// A borrowed, zero-argument callback invoked when an alarm fires.
///
/// The scheduler stores only the reference. Whatever the callback captures
/// must outlive the alarm, which the lifetime parameter of
/// [`AlarmManager`](crate::AlarmManager) enforces.
///
/// Callbacks are invoked in the timer interrupt context and therefore must
/// not block.
///
/// A `Callback` can be *null* ([`Callback::NULL`]), which is what
/// [`Default::default`] returns. A null callback is rejected by
/// [`AlarmManager::request_alarm`](crate::AlarmManager::request_alarm).
///
/// # Examples
///
/// ```
/// use r3_alarm::Callback;
///
/// fn blink() {}
///
/// static BLINK: Callback<'static> = Callback::new(&blink);
/// assert!(!BLINK.is_null());
/// assert!(Callback::NULL.is_null());
/// ```
#[derive(Clone, Copy)]
pub struct Callback<'a>(Option<&'a (dyn Fn() + Sync + 'a)>);

impl<'a> Callback<'a> {
    /// The null callback.
    pub const NULL: Self = Self(None);

    /// Construct a `Callback` referring to `func`.
    #[inline]
    pub const fn new(func: &'a (dyn Fn() + Sync + 'a)) -> Self {
        Self(Some(func))
    }

    /// Get a flag indicating whether `self` is [null](Self::NULL).
    #[inline]
    pub const fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// Call the callback. Does nothing if `self` is null.
    #[inline]
    pub fn call(self) {
        if let Some(func) = self.0 {
            func();
        }
    }
}

impl Init for Callback<'_> {
    const INIT: Self = Self::NULL;
}

impl Default for Callback<'_> {
    #[inline]
    fn default() -> Self {
        Self::INIT
    }
}

impl<'a, F: Fn() + Sync + 'a> From<&'a F> for Callback<'a> {
    #[inline]
    fn from(func: &'a F) -> Self {
        Self::new(func)
    }
}

impl fmt::Debug for Callback<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            // Only the address is printed; the pointee is opaque
            Some(func) => f
                .debug_tuple("Callback")
                .field(&(func as *const _ as *const ()))
                .finish(),
            None => f.write_str("Callback(null)"),
        }
    }
}

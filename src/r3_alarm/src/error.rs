//! Result codes and per-operation error types
use core::{fmt, mem::transmute};

/// The macro to define [`ResultCode`].
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            ///
            /// # Examples
            ///
            /// ```
            /// use r3_alarm::ResultCode;
            /// assert_eq!(ResultCode::CapacityExceeded.as_str(), "CapacityExceeded");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }

            fn fmt(self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                (*self).fmt(f)
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that the scheduler's operations
    /// can produce.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful.
        Success = 0,
        /// The supplied callback is [null](crate::Callback::NULL).
        InvalidCallback = -17,
        /// The requested delay exceeds [`DELAY_MAX`](crate::DELAY_MAX) and
        /// would make the fire tick ambiguous across the tick counter's
        /// wraparound.
        DelayOutOfRange = -18,
        /// The current context disallows the operation. This happens when the
        /// caller already holds CPU Lock (e.g., inside
        /// [`AlarmManager::for_each_scheduled`]'s visitor).
        ///
        /// [`AlarmManager::for_each_scheduled`]: crate::AlarmManager::for_each_scheduled
        BadContext = -25,
        /// Every slot in the pool is already scheduled.
        CapacityExceeded = -43,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    ///
    /// Failure codes have negative values.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i8) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    ///
    /// Success codes have non-negative values.
    #[inline]
    pub fn is_ok(self) -> bool {
        !self.is_err()
    }
}

macro_rules! define_error {
    (
        mod $mod_name:ident {}
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident $(: $($subty:ident),* $(,)*)? {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i8)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                // Use the same discriminants as `ResultCode` for cost-free
                // conversion
                $vname = ResultCode::$vname as i8
            ),*
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                match x {
                    Ok(()) => Self::Success,
                    Err(e) => Self::from(e),
                }
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                // Safety: `ResultCode` and `$name` has the same representation
                //         type, and the representation of `ResultCode` is a
                //         superset of `x`.
                unsafe { transmute(x) }
            }
        }

        #[cfg(test)]
        mod $mod_name {
            use super::*;

            #[test]
            fn to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from($name::$vname),
                    );
                )*
            }

            #[test]
            fn result_to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from(Err($name::$vname)),
                    );
                )*
                assert_eq!(
                    ResultCode::Success,
                    ResultCode::from(Result::<(), $name>::Ok(())),
                );
            }
        }

        $($(
            $subty!(impl From<_> for $name);
        )*)?

        #[allow(unused_macros)]
        macro_rules! $name {
            (impl From<_> for $dest_ty:ty) => {
                impl From<$name> for $dest_ty {
                    #[inline]
                    fn from(x: $name) -> Self {
                        match x {
                            $(
                                $name::$vname => Self::$vname,
                            )*
                        }
                    }
                }
            };
        }
    };
}

define_error! {
    mod bad_context_error {}
    /// Error type indicating that CPU Lock is already active in the current
    /// context.
    pub enum BadContextError {
        BadContext,
    }
}

define_error! {
    mod init_error {}
    /// Error type for [`AlarmManager::init`].
    ///
    /// [`AlarmManager::init`]: crate::AlarmManager::init
    pub enum InitError: BadContextError {
        BadContext,
    }
}

define_error! {
    mod request_alarm_error {}
    /// Error type for [`AlarmManager::request_alarm`].
    ///
    /// [`AlarmManager::request_alarm`]: crate::AlarmManager::request_alarm
    pub enum RequestAlarmError: BadContextError {
        InvalidCallback,
        DelayOutOfRange,
        BadContext,
        CapacityExceeded,
    }
}

define_error! {
    mod query_error {}
    /// Error type for the state queries of [`AlarmManager`].
    ///
    /// [`AlarmManager`]: crate::AlarmManager
    pub enum QueryError: BadContextError {
        BadContext,
    }
}

define_error! {
    mod tick_error {}
    /// Error type for [`AlarmManager::timer_tick`].
    ///
    /// [`AlarmManager::timer_tick`]: crate::AlarmManager::timer_tick
    pub enum TickError: BadContextError {
        BadContext,
    }
}

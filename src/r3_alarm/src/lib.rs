#![doc = include_str!("./lib.md")]
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]
mod callback;
mod error;
mod klock;
mod manager;
pub mod pool;
mod port;
mod tick;
pub mod utils;

#[cfg(test)]
mod test_port;

pub use self::{
    callback::Callback,
    error::{
        BadContextError, InitError, QueryError, RequestAlarmError, ResultCode, TickError,
    },
    manager::{AlarmManager, DEFAULT_CAPACITY},
    port::{Port, PortThreading, PortTimer},
    tick::{is_due, ticks_until, Tick, DELAY_MAX},
};

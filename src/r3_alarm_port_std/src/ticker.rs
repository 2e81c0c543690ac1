//! The timer thread
use r3_alarm::{AlarmManager, Port};
use std::{
    sync::mpsc,
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crate::{InterruptContextGuard, PortInstance};

/// The environment variable overriding [`TickerConfig::period`], in
/// microseconds.
pub const ENV_TICK_PERIOD: &str = "R3_ALARM_TICK_PERIOD_US";

/// The configuration of a [`Ticker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickerConfig {
    /// The interval between timer interrupts.
    pub period: Duration,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TickerConfigError {
    #[error("`R3_ALARM_TICK_PERIOD_US` is not a valid UTF-8 string")]
    NotUnicode,
    #[error("`R3_ALARM_TICK_PERIOD_US` must be a positive number of microseconds, got {0:?}")]
    BadPeriod(String),
    #[error("the tick period must be non-zero")]
    ZeroPeriod,
}

impl TickerConfig {
    pub const DEFAULT_PERIOD: Duration = Duration::from_millis(1);

    /// Construct a `TickerConfig` from [`ENV_TICK_PERIOD`], falling back to
    /// [`DEFAULT_PERIOD`](Self::DEFAULT_PERIOD) if it's unset or empty.
    pub fn from_env() -> Result<Self, TickerConfigError> {
        Self::from_var(std::env::var(ENV_TICK_PERIOD))
    }

    fn from_var(var: Result<String, std::env::VarError>) -> Result<Self, TickerConfigError> {
        let period = match var {
            Ok(x) if !x.is_empty() => parse_period(&x)?,
            Ok(_) | Err(std::env::VarError::NotPresent) => Self::DEFAULT_PERIOD,
            Err(std::env::VarError::NotUnicode(_)) => return Err(TickerConfigError::NotUnicode),
        };
        log::debug!("tick period = {period:?}");
        Ok(Self { period })
    }
}

fn check_period(period: Duration) -> Result<Duration, TickerConfigError> {
    if period.is_zero() {
        Err(TickerConfigError::ZeroPeriod)
    } else {
        Ok(period)
    }
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            period: Self::DEFAULT_PERIOD,
        }
    }
}

fn parse_period(s: &str) -> Result<Duration, TickerConfigError> {
    match s.trim().parse::<u64>() {
        Ok(micros) if micros > 0 => Ok(Duration::from_micros(micros)),
        _ => Err(TickerConfigError::BadPeriod(s.to_owned())),
    }
}

enum TickerCmd {
    SetPeriod { period: Duration },
}

/// A thread delivering timer interrupts to an [`AlarmManager`] at a fixed
/// period.
///
/// Interrupts are only delivered while the port's timer is running (see
/// [`AlarmManager::start_timer`]). Dropping the `Ticker` stops and joins the
/// thread.
pub struct Ticker {
    cmd_send: Option<mpsc::Sender<TickerCmd>>,
    join_handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Start a timer thread for `alarms`.
    pub fn spawn<Traits, const N: usize>(
        alarms: &'static AlarmManager<'static, Traits, N>,
        config: TickerConfig,
    ) -> std::io::Result<Self>
    where
        Traits: PortInstance + Port,
    {
        check_period(config.period)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        let (cmd_send, cmd_recv) = mpsc::channel();

        log::trace!("starting the timer thread");
        let join_handle = std::thread::Builder::new()
            .name("r3_alarm timer".to_owned())
            .spawn(move || {
                let _guard = InterruptContextGuard::enter();
                let state = Traits::port_state();
                let mut period = config.period;
                let mut next_deadline = Instant::now() + period;
                loop {
                    let timeout = next_deadline.saturating_duration_since(Instant::now());
                    match cmd_recv.recv_timeout(timeout) {
                        Err(mpsc::RecvTimeoutError::Disconnected) => {
                            break;
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            next_deadline += period;
                            if !state.is_timer_running() {
                                continue;
                            }

                            // Safety: We are the port, and this thread is
                            // the timer interrupt context
                            if let Err(e) = unsafe { alarms.timer_tick() } {
                                log::warn!("timer_tick failed: {e:?}");
                            }
                        }
                        Ok(TickerCmd::SetPeriod { period: new_period }) => {
                            log::trace!("period = {new_period:?}");
                            period = new_period;
                            next_deadline = Instant::now() + period;
                        }
                    }
                }
            })?;

        Ok(Self {
            cmd_send: Some(cmd_send),
            join_handle: Some(join_handle),
        })
    }

    /// Change the interval between timer interrupts. The next interrupt is
    /// delivered `period` from now.
    ///
    /// Returns `ZeroPeriod` and leaves the period unchanged if `period` is
    /// zero.
    pub fn set_period(&self, period: Duration) -> Result<(), TickerConfigError> {
        let period = check_period(period)?;
        if let Some(cmd_send) = &self.cmd_send {
            // The thread only exits after `cmd_send` is dropped
            let _ = cmd_send.send(TickerCmd::SetPeriod { period });
        }
        Ok(())
    }

    /// Stop the timer thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // `cmd_recv.recv_timeout` will return `Disconnected` when we drop the
        // corresponding sender (`cmd_send`).
        log::trace!("stopping the timer thread");
        self.cmd_send = None;

        if let Some(join_handle) = self.join_handle.take() {
            let result = join_handle.join();
            log::trace!("stopped the timer thread");

            // Propagate any panic that occured in a callback
            if let Err(e) = result {
                if !std::thread::panicking() {
                    std::panic::resume_unwind(e);
                }
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn default_period() {
        assert_eq!(TickerConfig::default().period, Duration::from_millis(1));
    }

    #[test]
    fn parse_period_rejects_garbage() {
        for s in ["", "0", "-5", "1.5", "1ms", "hoge"] {
            assert_eq!(
                parse_period(s),
                Err(TickerConfigError::BadPeriod(s.to_owned())),
                "{s:?}"
            );
        }
    }

    #[test]
    fn parse_period_trims_whitespace() {
        assert_eq!(parse_period(" 250\n"), Ok(Duration::from_micros(250)));
    }

    #[test]
    fn from_var_falls_back_to_default() {
        let default = TickerConfig::default();
        assert_eq!(
            TickerConfig::from_var(Err(std::env::VarError::NotPresent)),
            Ok(default)
        );
        assert_eq!(TickerConfig::from_var(Ok(String::new())), Ok(default));
    }

    #[test]
    fn from_var_rejects_bad_values() {
        assert_eq!(
            TickerConfig::from_var(Err(std::env::VarError::NotUnicode("\u{fffd}".into()))),
            Err(TickerConfigError::NotUnicode)
        );
        assert_eq!(
            TickerConfig::from_var(Ok("0".to_owned())),
            Err(TickerConfigError::BadPeriod("0".to_owned()))
        );
        assert_eq!(
            TickerConfig::from_var(Ok("250".to_owned())).map(|c| c.period),
            Ok(Duration::from_micros(250))
        );
    }

    /// The only test in this crate touching the environment variable
    #[test]
    fn from_env_reads_variable() {
        std::env::set_var(ENV_TICK_PERIOD, "750");
        let config = TickerConfig::from_env();
        std::env::remove_var(ENV_TICK_PERIOD);
        assert_eq!(config.map(|c| c.period), Ok(Duration::from_micros(750)));

        assert_eq!(TickerConfig::from_env(), Ok(TickerConfig::default()));
    }

    #[test]
    fn zero_period_is_rejected() {
        assert_eq!(
            check_period(Duration::ZERO),
            Err(TickerConfigError::ZeroPeriod)
        );
        assert_eq!(
            check_period(Duration::from_nanos(1)),
            Ok(Duration::from_nanos(1))
        );
    }

    #[quickcheck]
    fn parse_period_accepts_positive_integers(micros: u64) -> bool {
        let result = parse_period(&micros.to_string());
        if micros == 0 {
            result.is_err()
        } else {
            result == Ok(Duration::from_micros(micros))
        }
    }
}

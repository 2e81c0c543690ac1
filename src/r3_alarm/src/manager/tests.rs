use super::*;
use crate::{klock::lock_cpu, test_port::TestPort};
use assert_matches::assert_matches;
use quickcheck_macros::quickcheck;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

fn tick<const N: usize>(alarms: &AlarmManager<'_, TestPort, N>) {
    // Safety: We are the port
    unsafe { alarms.timer_tick() }.unwrap();
}

fn scheduled_ticks<const N: usize>(alarms: &AlarmManager<'_, TestPort, N>) -> Vec<Tick> {
    let mut ticks = Vec::new();
    alarms
        .for_each_scheduled(|fire_tick, in_use| {
            assert!(in_use);
            ticks.push(fire_tick);
        })
        .unwrap();
    ticks
}

fn assert_consistent<const N: usize>(alarms: &AlarmManager<'_, TestPort, N>) {
    assert!(alarms.check_consistency().unwrap(), "{alarms:?}");
    assert_eq!(
        alarms.free_len().unwrap() + alarms.scheduled_len().unwrap(),
        N
    );
}

fn set_now<const N: usize>(alarms: &AlarmManager<'_, TestPort, N>, now: Tick) {
    let mut lock = lock_cpu::<TestPort>().unwrap();
    alarms.state.write(&mut *lock).now = now;
}

#[test]
fn starts_empty() {
    let alarms = AlarmManager::<TestPort, 8>::new();
    assert_eq!(alarms.now().unwrap(), 0);
    assert_eq!(alarms.scheduled_len().unwrap(), 0);
    assert_eq!(alarms.free_len().unwrap(), 8);
    assert_eq!(alarms.capacity(), 8);
    assert_eq!(<AlarmManager<TestPort>>::CAPACITY, DEFAULT_CAPACITY);
    assert_consistent(&alarms);
}

/// Requests made at tick 3 land in the order 5, 5, 8, 9, 10, and both tick-5
/// alarms fire in the same `timer_tick` call.
#[test]
fn sorted_insertion_and_same_tick_firing() {
    let _ = env_logger::builder().is_test(true).try_init();

    let fired = Mutex::new(Vec::new());
    let foo = || fired.lock().unwrap().push("foo");
    let bar = || fired.lock().unwrap().push("bar");
    let baz = || fired.lock().unwrap().push("baz");

    let alarms = AlarmManager::<TestPort, 8>::new();
    for _ in 0..3 {
        tick(&alarms);
    }
    assert_eq!(alarms.now().unwrap(), 3);

    alarms.request_alarm(2, Callback::new(&foo)).unwrap();
    alarms.request_alarm(4, Callback::new(&foo)).unwrap();
    alarms.request_alarm(2, Callback::new(&foo)).unwrap();
    alarms.request_alarm(5, Callback::new(&bar)).unwrap();
    alarms.request_alarm(3, Callback::new(&baz)).unwrap();

    assert_eq!(scheduled_ticks(&alarms), [5, 5, 8, 9, 10]);
    assert_eq!(alarms.scheduled_len().unwrap(), 5);
    assert_consistent(&alarms);

    tick(&alarms); // 4
    assert!(fired.lock().unwrap().is_empty());

    tick(&alarms); // 5
    assert_eq!(*fired.lock().unwrap(), ["foo", "foo"]);
    assert_eq!(scheduled_ticks(&alarms), [8, 9, 10]);
    assert_consistent(&alarms);

    for _ in 6..=10 {
        tick(&alarms);
    }
    assert_eq!(*fired.lock().unwrap(), ["foo", "foo", "baz", "foo", "bar"]);
    assert_eq!(alarms.scheduled_len().unwrap(), 0);
    assert_eq!(alarms.free_len().unwrap(), 8);
}

#[test]
fn null_callback_is_rejected() {
    let alarms = AlarmManager::<TestPort, 4>::new();
    assert_matches!(
        alarms.request_alarm(1, Callback::NULL),
        Err(RequestAlarmError::InvalidCallback)
    );
    assert_eq!(alarms.scheduled_len().unwrap(), 0);
    assert_eq!(alarms.free_len().unwrap(), 4);
    assert_consistent(&alarms);
}

#[test]
fn capacity_exceeded_until_an_alarm_fires() {
    let count = AtomicUsize::new(0);
    let bump = || {
        count.fetch_add(1, Ordering::Relaxed);
    };

    let alarms = AlarmManager::<TestPort, 4>::new();
    for delay in 1..=4 {
        alarms.request_alarm(delay, Callback::new(&bump)).unwrap();
    }

    let before = scheduled_ticks(&alarms);
    assert_matches!(
        alarms.request_alarm(1, Callback::new(&bump)),
        Err(RequestAlarmError::CapacityExceeded)
    );
    assert_eq!(scheduled_ticks(&alarms), before);
    assert_eq!(alarms.free_len().unwrap(), 0);
    assert_consistent(&alarms);

    tick(&alarms);
    assert_eq!(count.load(Ordering::Relaxed), 1);

    alarms.request_alarm(1, Callback::new(&bump)).unwrap();
    assert_eq!(scheduled_ticks(&alarms), [2, 2, 3, 4]);
    assert_consistent(&alarms);
}

#[test]
fn init_discards_pending_alarms() {
    let count = AtomicUsize::new(0);
    let bump = || {
        count.fetch_add(1, Ordering::Relaxed);
    };

    let alarms = AlarmManager::<TestPort, 4>::new();
    tick(&alarms);
    for delay in [3, 1, 2] {
        alarms.request_alarm(delay, Callback::new(&bump)).unwrap();
    }

    alarms.init().unwrap();
    assert_eq!(alarms.scheduled_len().unwrap(), 0);
    assert_eq!(alarms.free_len().unwrap(), 4);
    assert_eq!(alarms.now().unwrap(), 1);
    assert_consistent(&alarms);

    // Idempotent
    alarms.init().unwrap();
    assert_eq!(alarms.free_len().unwrap(), 4);

    for _ in 0..5 {
        tick(&alarms);
    }
    assert_eq!(count.load(Ordering::Relaxed), 0);
}

#[test]
fn zero_delay_fires_on_next_tick() {
    let count = AtomicUsize::new(0);
    let bump = || {
        count.fetch_add(1, Ordering::Relaxed);
    };

    let alarms = AlarmManager::<TestPort, 4>::new();
    alarms.request_alarm(3, Callback::new(&bump)).unwrap();
    alarms.request_alarm(0, Callback::new(&bump)).unwrap();
    assert_eq!(scheduled_ticks(&alarms), [1, 3]);

    tick(&alarms);
    assert_eq!(count.load(Ordering::Relaxed), 1);
    assert_eq!(scheduled_ticks(&alarms), [3]);
}

#[test]
fn delay_out_of_range() {
    let f = || {};
    let alarms = AlarmManager::<TestPort, 4>::new();
    assert_matches!(
        alarms.request_alarm(DELAY_MAX + 1, Callback::new(&f)),
        Err(RequestAlarmError::DelayOutOfRange)
    );
    assert_matches!(
        alarms.request_alarm(Tick::MAX, Callback::new(&f)),
        Err(RequestAlarmError::DelayOutOfRange)
    );
    assert_eq!(alarms.scheduled_len().unwrap(), 0);

    alarms.request_alarm(DELAY_MAX, Callback::new(&f)).unwrap();
    assert_eq!(scheduled_ticks(&alarms), [DELAY_MAX]);
}

#[test]
fn wraparound() {
    let fired = Mutex::new(Vec::new());
    let early = || fired.lock().unwrap().push("early");
    let late = || fired.lock().unwrap().push("late");

    let alarms = AlarmManager::<TestPort, 4>::new();
    set_now(&alarms, Tick::MAX - 1);

    // Fires at tick 2, after the wrap
    alarms.request_alarm(4, Callback::new(&late)).unwrap();
    // Fires at tick `Tick::MAX`
    alarms.request_alarm(1, Callback::new(&early)).unwrap();
    assert_eq!(scheduled_ticks(&alarms), [Tick::MAX, 2]);
    assert_consistent(&alarms);

    tick(&alarms);
    assert_eq!(*fired.lock().unwrap(), ["early"]);

    tick(&alarms); // 0
    tick(&alarms); // 1
    assert_eq!(*fired.lock().unwrap(), ["early"]);

    tick(&alarms); // 2
    assert_eq!(*fired.lock().unwrap(), ["early", "late"]);
    assert_eq!(alarms.now().unwrap(), 2);
}

#[test]
fn far_future_alarm_does_not_fire_early() {
    let count = AtomicUsize::new(0);
    let bump = || {
        count.fetch_add(1, Ordering::Relaxed);
    };

    let alarms = AlarmManager::<TestPort, 4>::new();
    set_now(&alarms, 100);
    alarms.request_alarm(DELAY_MAX, Callback::new(&bump)).unwrap();
    alarms.request_alarm(1, Callback::new(&bump)).unwrap();
    assert_eq!(scheduled_ticks(&alarms), [101, 100 + DELAY_MAX]);

    tick(&alarms);
    tick(&alarms);
    assert_eq!(count.load(Ordering::Relaxed), 1);
    assert_eq!(alarms.scheduled_len().unwrap(), 1);

    set_now(&alarms, 100 + DELAY_MAX - 1);
    tick(&alarms);
    assert_eq!(count.load(Ordering::Relaxed), 2);
}

#[test]
fn nested_calls_are_rejected() {
    let f = || {};
    let alarms = AlarmManager::<TestPort, 4>::new();
    alarms.request_alarm(1, Callback::new(&f)).unwrap();

    let mut visited = 0;
    alarms
        .for_each_scheduled(|_, _| {
            visited += 1;
            assert_matches!(
                alarms.request_alarm(1, Callback::new(&f)),
                Err(RequestAlarmError::BadContext)
            );
            assert_matches!(alarms.init(), Err(InitError::BadContext));
            assert_matches!(alarms.now(), Err(QueryError::BadContext));
        })
        .unwrap();
    assert_eq!(visited, 1);

    let lock = lock_cpu::<TestPort>().unwrap();
    assert_matches!(unsafe { alarms.timer_tick() }, Err(TickError::BadContext));
    drop(lock);

    assert_eq!(alarms.now().unwrap(), 0);
    assert_consistent(&alarms);
}

static REARM_ALARMS: AlarmManager<'static, TestPort, 1> = AlarmManager::new();
static REARM_COUNT: AtomicUsize = AtomicUsize::new(0);
static REARM: Callback<'static> = Callback::new(&rearm);

fn rearm() {
    // The manager has only one slot, which was released before this call
    if REARM_COUNT.fetch_add(1, Ordering::Relaxed) < 2 {
        REARM_ALARMS.request_alarm(2, REARM).unwrap();
    }
}

#[test]
fn callback_can_rearm_itself() {
    REARM_ALARMS.request_alarm(1, REARM).unwrap();
    for _ in 0..10 {
        tick(&REARM_ALARMS);
    }
    assert_eq!(REARM_COUNT.load(Ordering::Relaxed), 3);
    assert_eq!(REARM_ALARMS.scheduled_len().unwrap(), 0);
    assert_consistent(&REARM_ALARMS);
}

static SPIN_ALARMS: AlarmManager<'static, TestPort, 2> = AlarmManager::new();
static SPIN_COUNT: AtomicUsize = AtomicUsize::new(0);
static SPIN: Callback<'static> = Callback::new(&spin);

fn spin() {
    if SPIN_COUNT.fetch_add(1, Ordering::Relaxed) < 1000 {
        SPIN_ALARMS.request_alarm(0, SPIN).unwrap();
    }
}

/// A callback re-arming itself with zero delay fires once per tick instead
/// of keeping `timer_tick` busy.
#[test]
fn zero_delay_rearm_waits_for_next_tick() {
    SPIN_ALARMS.request_alarm(0, SPIN).unwrap();

    tick(&SPIN_ALARMS);
    assert_eq!(SPIN_COUNT.load(Ordering::Relaxed), 1);
    assert_eq!(scheduled_ticks(&SPIN_ALARMS), [2]);

    tick(&SPIN_ALARMS);
    assert_eq!(SPIN_COUNT.load(Ordering::Relaxed), 2);
    assert_eq!(scheduled_ticks(&SPIN_ALARMS), [3]);
    assert_consistent(&SPIN_ALARMS);
}

#[test]
fn timer_control_is_forwarded_to_port() {
    let alarms = AlarmManager::<TestPort, 1>::new();
    alarms.start_timer();
    assert!(TestPort::is_timer_running());
    alarms.stop_timer();
    assert!(!TestPort::is_timer_running());
}

#[test]
fn debug_fmt() {
    let f = || {};
    let alarms = AlarmManager::<TestPort, 4>::new();
    alarms.request_alarm(7, Callback::new(&f)).unwrap();
    let s = format!("{alarms:?}");
    assert!(s.starts_with("AlarmManager"), "{s}");
    assert!(s.contains("scheduled: [7]"), "{s}");

    let _lock = lock_cpu::<TestPort>().unwrap();
    assert!(format!("{alarms:?}").contains("< locked >"));
}

/// A modifying operation on `AlarmManager`.
#[derive(Debug)]
enum Cmd {
    Request { delay: Tick, id: usize },
    Tick,
}

/// Map random bytes to operations on `AlarmManager`.
fn interpret(bytecode: &[u8], num_ids: usize) -> impl Iterator<Item = Cmd> + '_ {
    bytecode.chunks_exact(2).map(move |instr| {
        if instr[0] % 3 == 0 {
            Cmd::Tick
        } else {
            Cmd::Request {
                delay: Tick::from(instr[1] % 16),
                id: usize::from(instr[0]) % num_ids,
            }
        }
    })
}

fn test_inner<const N: usize>(bytecode: Vec<u8>) {
    const NUM_IDS: usize = 5;

    let fired = Mutex::new(Vec::new());
    let callbacks: Vec<_> = (0..NUM_IDS)
        .map(|id| {
            let fired = &fired;
            move || fired.lock().unwrap().push(id)
        })
        .collect();

    let alarms = AlarmManager::<TestPort, N>::new();

    // `(fire_tick, id)`
    let mut reference: Vec<(Tick, usize)> = Vec::new();
    let mut now: Tick = 0;

    log::debug!("N = {}, bytecode len = {}", N, bytecode.len());

    for cmd in interpret(&bytecode, NUM_IDS) {
        log::trace!("    {:?}", cmd);
        match cmd {
            Cmd::Request { delay, id } => {
                let result = alarms.request_alarm(delay, Callback::new(&callbacks[id]));
                if reference.len() == N {
                    assert_matches!(result, Err(RequestAlarmError::CapacityExceeded));
                } else {
                    result.unwrap();
                    reference.push((now.wrapping_add(delay.max(1)), id));
                }
            }
            Cmd::Tick => {
                tick(&alarms);
                now += 1;

                let (mut due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut reference)
                    .into_iter()
                    .partition(|&(fire_tick, _)| fire_tick <= now);
                reference = pending;

                let mut fired = std::mem::take(&mut *fired.lock().unwrap());
                fired.sort_unstable();
                due.sort_unstable_by_key(|&(_, id)| id);
                assert_eq!(fired, due.iter().map(|&(_, id)| id).collect::<Vec<_>>());
            }
        }

        let mut expected: Vec<Tick> = reference.iter().map(|&(t, _)| t).collect();
        expected.sort_unstable();
        log::trace!("[reference: {:?}]", expected);
        assert_eq!(scheduled_ticks(&alarms), expected);
        assert_eq!(alarms.scheduled_len().unwrap(), reference.len());
        assert_consistent(&alarms);
    }
}

#[quickcheck]
fn qc_cap_1(bytecode: Vec<u8>) {
    test_inner::<1>(bytecode);
}

#[quickcheck]
fn qc_cap_4(bytecode: Vec<u8>) {
    test_inner::<4>(bytecode);
}

#[quickcheck]
fn qc_cap_64(bytecode: Vec<u8>) {
    test_inner::<64>(bytecode);
}

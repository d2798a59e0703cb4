//! Cross-domain access ordering

use lockstep_core::{Event, Frequency, Mode, Scheduler, SchedulerSettings};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Last write seen on the shared bus byte: (value, write time)
type BusByte = Arc<Mutex<(u8, Option<i64>)>>;

/// Reads recorded by the reader: (read time, value, write time observed)
type ReadLog = Arc<Mutex<Vec<(i64, u8, Option<i64>)>>>;

/// A writer domain stamping the bus every step and a reader domain that
/// catches the writer up before every read.
fn writer_reader(
    scheduler: &Scheduler,
    writer_ticks: u64,
    reader_ticks: u64,
    reads: usize,
    write: impl Fn(i64) -> Option<u8> + Send + Sync + 'static,
) -> (lockstep_core::ClockDomain, lockstep_core::ClockDomain, ReadLog) {
    let bus: BusByte = Arc::new(Mutex::new((0, None)));
    let log: ReadLog = Arc::new(Mutex::new(Vec::new()));

    let writer = scheduler.domain("writer", Frequency::ticks(writer_ticks));
    let reader = scheduler.domain("reader", Frequency::ticks(reader_ticks));
    let to_writer = reader.depends_on(&writer);

    let writer_bus = Arc::clone(&bus);
    let writer_steps = Arc::new(AtomicI64::new(0));
    let ticks = writer_ticks as i64;
    writer
        .create(move |thread| {
            let now = writer_steps.fetch_add(1, Ordering::SeqCst) * ticks;
            if let Some(value) = write(now) {
                *writer_bus.lock() = (value, Some(now));
            }
            thread.step(1);
        })
        .unwrap();

    let reader_log = Arc::clone(&log);
    let reader_steps = Arc::new(AtomicI64::new(0));
    let ticks = reader_ticks as i64;
    reader
        .create(move |thread| {
            thread.synchronize(&to_writer);
            let n = reader_steps.fetch_add(1, Ordering::SeqCst);
            let (value, written) = *bus.lock();
            reader_log.lock().push((n * ticks, value, written));
            thread.step(1);
            if n as usize + 1 == reads {
                thread.exit(Event::Frame);
            }
        })
        .unwrap();

    scheduler.power(&writer);
    (writer, reader, log)
}

#[test]
fn test_read_after_write_observes_new_value() {
    const X: u8 = 0x5A;
    let scheduler = Scheduler::default();
    let (_a, _b, log) = writer_reader(&scheduler, 2, 3, 5, |now| (now == 10).then_some(X));

    assert_eq!(scheduler.enter(Mode::Run), Event::Frame);

    let log = log.lock();
    let at = |time: i64| log.iter().find(|entry| entry.0 == time).map(|entry| entry.1);
    assert_eq!(at(9), Some(0), "read at tick 9 must see the prior value");
    assert_eq!(at(12), Some(X), "read at tick 12 must see the write at tick 10");
}

#[test]
fn test_read_at_the_write_tick_observes_new_value() {
    const X: u8 = 0xA5;
    let scheduler = Scheduler::default();
    let (_a, _b, log) = writer_reader(&scheduler, 2, 5, 4, |now| (now == 10).then_some(X));

    assert_eq!(scheduler.enter(Mode::Run), Event::Frame);

    let log = log.lock();
    let at = |time: i64| log.iter().find(|entry| entry.0 == time).copied();
    assert_eq!(at(5).map(|entry| entry.1), Some(0), "read at tick 5 must see the prior value");
    assert_eq!(at(10), Some((10, X, Some(10))), "read at tick 10 must see the write at tick 10");
}

#[test]
fn test_reads_never_see_future_or_miss_past_writes() {
    let pairs = [(2, 3), (3, 2), (5, 7), (7, 5), (1, 4), (4, 1), (12, 1364), (1364, 12)];

    for (writer_ticks, reader_ticks) in pairs {
        let scheduler = Scheduler::default();
        let (_a, _b, log) =
            writer_reader(&scheduler, writer_ticks, reader_ticks, 200, |now| Some(now as u8));
        scheduler.enter(Mode::Run);

        let writer = writer_ticks as i64;
        for &(read, _, written) in log.lock().iter() {
            if let Some(written) = written {
                assert!(
                    written <= read,
                    "{writer_ticks}/{reader_ticks}: read at {read} saw a write from {written}"
                );
            }
            if read > 0 {
                let latest_before = (read - 1) / writer * writer;
                assert!(
                    written.map(|w| w >= latest_before).unwrap_or(false),
                    "{writer_ticks}/{reader_ticks}: read at {read} missed the write at {latest_before}"
                );
            }
        }
    }
}

#[test]
fn test_slack_bounds_lead() {
    let scheduler = Scheduler::new(SchedulerSettings {
        slack_ticks: 100,
        ..Default::default()
    });
    let lead = Arc::new(AtomicI64::new(0));

    let fast = scheduler.domain("fast", Frequency::ticks(1));
    let slow = scheduler.domain("slow", Frequency::ticks(10));
    let slow_id = slow.id();

    let max_lead = Arc::clone(&lead);
    fast.create(move |thread| {
        let ahead = thread.clock() - thread.scheduler().clock(slow_id);
        max_lead.fetch_max(ahead, Ordering::SeqCst);
        thread.step(1);
    })
    .unwrap();

    let steps = Arc::new(AtomicI64::new(0));
    slow.create(move |thread| {
        thread.step(1);
        if steps.fetch_add(1, Ordering::SeqCst) == 500 {
            thread.exit(Event::Frame);
        }
    })
    .unwrap();

    scheduler.power(&fast);
    scheduler.enter(Mode::Run);
    assert!(lead.load(Ordering::SeqCst) <= 100);
    assert!(lead.load(Ordering::SeqCst) > 0);
}

#[test]
#[should_panic(expected = "already in progress")]
fn test_enter_from_a_domain_is_fatal() {
    let scheduler = Scheduler::default();
    let rogue = scheduler.domain("rogue", Frequency::ticks(1));
    rogue
        .create(|thread| {
            thread.step(1);
            thread.scheduler().enter(Mode::Synchronize);
        })
        .unwrap();
    scheduler.power(&rogue);
    scheduler.enter(Mode::Run);
}

#[test]
#[should_panic(expected = "chip fault")]
fn test_domain_panic_reaches_host() {
    let scheduler = Scheduler::default();
    let healthy = scheduler.domain("healthy", Frequency::ticks(1));
    let faulty = scheduler.domain("faulty", Frequency::ticks(1));
    healthy.create(|thread| thread.step(1)).unwrap();
    faulty
        .create(|thread| {
            thread.step(1);
            panic!("chip fault");
        })
        .unwrap();
    scheduler.power(&healthy);
    scheduler.enter(Mode::Run);
}

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use common::XorShift;
use valve_core::pending::{PendingWork, TaskSet};

const SOURCES: [TaskSet; 4] = [
    TaskSet::KEYBOARD,
    TaskSet::COM,
    TaskSet::MOTOR_PULSE,
    TaskSet::RTC,
];

#[test]
fn posting_twice_is_observed_once() {
    let pending = PendingWork::new();
    pending.post(TaskSet::COM);
    pending.post(TaskSet::COM);

    assert_eq!(pending.drain_and_clear(TaskSet::all()), TaskSet::COM);
    assert!(pending.drain_and_clear(TaskSet::all()).is_empty());
}

#[test]
fn drain_leaves_unmasked_bits_for_later() {
    let pending = PendingWork::new();
    pending.post(TaskSet::LCD_REFRESH | TaskSet::RTC);

    assert_eq!(pending.drain_and_clear(TaskSet::RTC), TaskSet::RTC);
    assert_eq!(pending.pending(), TaskSet::LCD_REFRESH);
}

/// Randomised interleaving of interrupt posts and main-loop drains. Each
/// source tracks whether it has a post that no drain has reported yet; a
/// drain may only report a bit that is outstanding, and at the end nothing
/// may remain outstanding.
#[test]
fn interleaved_posts_are_observed_exactly_once() {
    for seed in [1_u64, 7, 0xDEAD_BEEF, 0x1234_5678_9ABC] {
        let mut rng = XorShift::new(seed);
        let pending = PendingWork::new();
        let mut outstanding = [false; SOURCES.len()];
        let mut posts = [0_usize; SOURCES.len()];
        let mut observed = [0_usize; SOURCES.len()];

        for _ in 0..5_000 {
            if rng.below(3) == 0 {
                let mask = TaskSet::from_bits_truncate(rng.next_u64().to_le_bytes()[0]);
                let drained = pending.drain_and_clear(mask);
                for (index, source) in SOURCES.iter().enumerate() {
                    if drained.contains(*source) {
                        assert!(outstanding[index], "seed {seed}: duplicate service");
                        outstanding[index] = false;
                        observed[index] += 1;
                    }
                }
            } else {
                let index = usize::try_from(rng.below(SOURCES.len() as u64)).unwrap();
                pending.post(SOURCES[index]);
                outstanding[index] = true;
                posts[index] += 1;
            }
        }

        let drained = pending.drain_and_clear(TaskSet::all());
        for (index, source) in SOURCES.iter().enumerate() {
            if drained.contains(*source) {
                assert!(outstanding[index]);
                outstanding[index] = false;
                observed[index] += 1;
            }
            assert!(!outstanding[index], "seed {seed}: post lost");
            assert!(observed[index] <= posts[index]);
        }
    }
}

/// Producers on real threads stand in for interrupt contexts. Each producer
/// waits until its previous post was drained before posting again, so every
/// post must be observed by exactly one drain.
#[test]
fn concurrent_producers_never_lose_a_post() {
    const ROUNDS: usize = 2_000;

    let pending = Arc::new(PendingWork::new());
    let posted: Arc<[AtomicUsize; 4]> = Arc::new(Default::default());
    let observed: Arc<[AtomicUsize; 4]> = Arc::new(Default::default());
    let done = Arc::new(AtomicBool::new(false));

    let consumer = {
        let pending = Arc::clone(&pending);
        let posted = Arc::clone(&posted);
        let observed = Arc::clone(&observed);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                let drained = pending.drain_and_clear(TaskSet::all());
                for (index, source) in SOURCES.iter().enumerate() {
                    if drained.contains(*source) {
                        let seen = observed[index].fetch_add(1, Ordering::AcqRel) + 1;
                        assert!(
                            seen <= posted[index].load(Ordering::Acquire),
                            "source {index} observed more often than posted"
                        );
                    }
                }
                thread::yield_now();
            }
        })
    };

    let producers: Vec<_> = SOURCES
        .iter()
        .enumerate()
        .map(|(index, source)| {
            let source = *source;
            let pending = Arc::clone(&pending);
            let posted = Arc::clone(&posted);
            let observed = Arc::clone(&observed);
            thread::spawn(move || {
                let deadline = Instant::now() + Duration::from_secs(30);
                for round in 1..=ROUNDS {
                    posted[index].store(round, Ordering::Release);
                    pending.post(source);
                    while observed[index].load(Ordering::Acquire) < round {
                        assert!(Instant::now() < deadline, "post {round} of {index} lost");
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().expect("producer panicked");
    }
    done.store(true, Ordering::Release);
    consumer.join().expect("consumer panicked");

    for index in 0..SOURCES.len() {
        assert_eq!(observed[index].load(Ordering::Acquire), ROUNDS);
    }
    assert!(pending.pending().is_empty());
}

#[test]
fn sample_request_is_consumed_once() {
    let pending = PendingWork::new();
    pending.request_sample();
    pending.request_sample();

    assert!(pending.take_sample_request());
    assert!(!pending.take_sample_request());
}

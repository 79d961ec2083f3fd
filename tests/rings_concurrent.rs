//! Multi-threaded ring buffer and append-vector tests: claim exclusivity,
//! multi-producer accounting, broadcast delivery order, and unique-tag
//! appends.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use shmkit::{BroadcastRing, MpmcRing, ShmVector, SpmcRing, Status};

#[test]
fn spmc_each_element_claimed_exactly_once() {
    const PRODUCE: u64 = 10_000;
    const CONSUMERS: usize = 4;

    let ring = Arc::new(SpmcRing::<u64, 1024>::new());
    let consumed = Arc::new(AtomicUsize::new(0));

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let ring = ring.clone();
            let consumed = consumed.clone();
            std::thread::spawn(move || {
                let mut got = Vec::new();
                while consumed.load(Ordering::Acquire) < PRODUCE as usize {
                    match ring.pop() {
                        Some(v) => {
                            got.push(v);
                            consumed.fetch_add(1, Ordering::AcqRel);
                        }
                        None => std::thread::yield_now(),
                    }
                }
                got
            })
        })
        .collect();

    let producer = {
        let ring = ring.clone();
        std::thread::spawn(move || {
            for i in 0..PRODUCE {
                while !ring.push(i) {
                    std::thread::yield_now();
                }
            }
        })
    };

    producer.join().unwrap();
    let mut all = Vec::new();
    for c in consumers {
        all.extend(c.join().unwrap());
    }

    assert_eq!(all.len(), PRODUCE as usize);
    let unique: HashSet<u64> = all.iter().copied().collect();
    assert_eq!(unique.len(), PRODUCE as usize, "duplicate deliveries");
    assert_eq!(unique, (0..PRODUCE).collect::<HashSet<u64>>());
}

#[test]
fn mpmc_conserves_every_element() {
    const PRODUCERS: u64 = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: u64 = 2_500;
    const TOTAL: u64 = PRODUCERS * PER_PRODUCER;

    let ring = Arc::new(MpmcRing::<u64, 256>::new());
    let consumed = Arc::new(AtomicUsize::new(0));

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let ring = ring.clone();
            let consumed = consumed.clone();
            std::thread::spawn(move || {
                let mut got = Vec::new();
                while consumed.load(Ordering::Acquire) < TOTAL as usize {
                    match ring.pop() {
                        Some(v) => {
                            got.push(v);
                            consumed.fetch_add(1, Ordering::AcqRel);
                        }
                        None => std::thread::yield_now(),
                    }
                }
                got
            })
        })
        .collect();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let ring = ring.clone();
            std::thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let tag = p * PER_PRODUCER + i;
                    while !ring.push(tag) {
                        std::thread::yield_now();
                    }
                }
            })
        })
        .collect();

    for p in producers {
        p.join().unwrap();
    }
    let mut all = Vec::new();
    for c in consumers {
        all.extend(c.join().unwrap());
    }

    all.sort_unstable();
    let expected: Vec<u64> = (0..TOTAL).collect();
    assert_eq!(all, expected, "lost or duplicated elements");
}

#[test]
fn broadcast_every_consumer_receives_everything_in_order() {
    const PRODUCE: u64 = 50_000;
    const READERS: usize = 3;

    let ring = Arc::new(BroadcastRing::<u64, 1024, READERS>::new());

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let ring = ring.clone();
            std::thread::spawn(move || {
                let mut reader = ring.reader().expect("registration");
                let mut expected = 0u64;
                while expected < PRODUCE {
                    match reader.try_pop() {
                        Some(v) => {
                            assert_eq!(v, expected, "out-of-order delivery");
                            expected += 1;
                        }
                        None => std::thread::yield_now(),
                    }
                }
            })
        })
        .collect();

    for i in 0..PRODUCE {
        assert_eq!(ring.push(i), Status::Success, "push {i}");
    }

    for r in readers {
        r.join().unwrap();
    }
}

#[test]
fn vector_concurrent_pushes_keep_every_tag_once() {
    const THREADS: u64 = 8;
    const PER_THREAD: u64 = 100;

    let vec = Arc::new(ShmVector::<u64, 800>::new());

    let threads: Vec<_> = (0..THREADS)
        .map(|t| {
            let vec = vec.clone();
            std::thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let tag = t * PER_THREAD + i;
                    assert!(vec.push(tag).is_some(), "vector filled early");
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(vec.len(), (THREADS * PER_THREAD) as usize);
    let mut tags: Vec<u64> = vec.as_slice().to_vec();
    tags.sort_unstable();
    let expected: Vec<u64> = (0..THREADS * PER_THREAD).collect();
    assert_eq!(tags, expected, "each tag must appear exactly once");
}

#[test]
fn vector_allocate_ranges_never_overlap() {
    const THREADS: usize = 4;
    const ALLOCS: usize = 50;

    let vec = Arc::new(ShmVector::<u64, 4096>::new());

    let threads: Vec<_> = (0..THREADS)
        .map(|_| {
            let vec = vec.clone();
            std::thread::spawn(move || {
                let mut ranges = Vec::new();
                for n in 1..=ALLOCS {
                    if let Some(start) = vec.allocate(n % 7 + 1) {
                        ranges.push((start, n % 7 + 1));
                    }
                }
                ranges
            })
        })
        .collect();

    let mut all_ranges = Vec::new();
    for t in threads {
        all_ranges.extend(t.join().unwrap());
    }
    all_ranges.sort_unstable();
    for pair in all_ranges.windows(2) {
        let (start_a, len_a) = pair[0];
        let (start_b, _) = pair[1];
        assert!(start_a + len_a <= start_b, "overlapping reservations");
    }
}

use abyss::HashMap;
use rand::prelude::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;
use std::thread;

fn threads() -> usize {
    if cfg!(miri) {
        2
    } else {
        num_cpus::get_physical().min(8)
    }
}

#[test]
fn contains_key_stress() {
    const ITERATIONS: usize = if cfg!(miri) { 1 } else { 64 };
    const ENTRIES: usize = if cfg!(miri) { 64 } else { 1 << 10 };
    const ROUNDS: usize = if cfg!(miri) { 1 } else { 32 };

    let map = HashMap::new();

    {
        let guard = map.guard();
        for k in 0..ENTRIES {
            map.insert(k, k, &guard);
        }
    }

    for _ in 0..ITERATIONS {
        let threads = threads();
        let barrier = Barrier::new(threads);
        thread::scope(|s| {
            for _ in 0..threads {
                s.spawn(|| {
                    barrier.wait();
                    let guard = map.guard();
                    for i in 0..ENTRIES * ROUNDS {
                        assert!(map.contains_key(&(i % ENTRIES), &guard));
                    }
                });
            }
        });
    }
}

#[test]
fn insert_stress() {
    const ITERATIONS: usize = if cfg!(miri) { 1 } else { 32 };
    const ENTRIES: usize = if cfg!(miri) { 64 } else { 1 << 12 };

    #[derive(Hash, PartialEq, Eq, Clone, Copy)]
    struct KeyVal {
        _data: usize,
    }

    impl KeyVal {
        pub fn new() -> Self {
            let mut rng = rand::thread_rng();
            Self { _data: rng.gen() }
        }
    }

    for _ in 0..ITERATIONS {
        let map: HashMap<KeyVal, KeyVal> = HashMap::new();
        let threads = threads();
        let barrier = Barrier::new(threads);
        thread::scope(|s| {
            for _ in 0..threads {
                s.spawn(|| {
                    barrier.wait();
                    for _ in 0..ENTRIES {
                        let key = KeyVal::new();
                        map.insert(key, key, &map.guard());
                        assert!(map.contains_key(&key, &map.guard()));
                    }
                });
            }
        });
    }
}

// Concurrent writers force several resizes; every key written by any thread
// must survive the migrations.
#[test]
fn resize_stress() {
    const ITERATIONS: usize = if cfg!(miri) { 1 } else { 16 };
    const CHUNK: usize = if cfg!(miri) { 48 } else { 1 << 12 };

    for _ in 0..ITERATIONS {
        let map: HashMap<usize, usize> = HashMap::with_capacity(1);
        let threads = threads();
        let barrier = Barrier::new(threads);

        thread::scope(|s| {
            for t in 0..threads {
                let barrier = &barrier;
                let map = &map;
                s.spawn(move || {
                    barrier.wait();
                    let guard = map.guard();
                    for i in (CHUNK * t)..(CHUNK * (t + 1)) {
                        map.insert(i, i + 1, &guard);
                    }
                });
            }
        });

        let guard = map.guard();
        for i in 0..CHUNK * threads {
            assert_eq!(map.get(&i, &guard), Some(&(i + 1)));
        }
        assert_eq!(map.len(), CHUNK * threads);
        assert!(map.capacity(&guard).is_power_of_two());
    }
}

// Writers all target the same key; readers must observe one of the written
// values, never a missing one.
#[test]
fn single_key_stress() {
    const ITERATIONS: usize = if cfg!(miri) { 1 } else { 32 };
    const WRITES: usize = if cfg!(miri) { 64 } else { 1 << 10 };

    for _ in 0..ITERATIONS {
        let map: HashMap<usize, usize> = HashMap::new();
        let threads = threads();
        let barrier = Barrier::new(threads);

        {
            let guard = map.guard();
            map.insert(5, 0, &guard);
        }

        thread::scope(|s| {
            for t in 0..threads {
                let barrier = &barrier;
                let map = &map;
                s.spawn(move || {
                    barrier.wait();
                    let guard = map.guard();
                    for i in 0..WRITES {
                        if t % 2 == 0 {
                            map.insert(5, t * WRITES + i, &guard);
                        } else {
                            assert!(map.get(&5, &guard).is_some());
                        }
                    }
                });
            }
        });

        let guard = map.guard();
        assert!(map.get(&5, &guard).is_some());
        assert_eq!(map.len(), 1);
    }
}

// Interleaved inserts and removes over disjoint key ranges, racing resizes.
#[test]
fn mixed_stress() {
    const ITERATIONS: usize = if cfg!(miri) { 1 } else { 16 };
    const CHUNK: usize = if cfg!(miri) { 48 } else { 1 << 12 };

    for _ in 0..ITERATIONS {
        let map: HashMap<usize, usize> = HashMap::with_capacity(1);
        let threads = threads();
        let barrier = Barrier::new(threads);

        thread::scope(|s| {
            for t in 0..threads {
                let barrier = &barrier;
                let map = &map;
                s.spawn(move || {
                    barrier.wait();
                    let guard = map.guard();
                    let (start, end) = (CHUNK * t, CHUNK * (t + 1));

                    for i in start..end {
                        assert_eq!(map.insert(i, i, &guard), None);
                    }

                    for i in start..end {
                        assert_eq!(map.get(&i, &guard), Some(&i));
                    }

                    for i in start..end {
                        assert_eq!(map.remove(&i, &guard), Some(&i));
                    }

                    for i in start..end {
                        assert_eq!(map.get(&i, &guard), None);
                    }

                    for i in start..end {
                        assert_eq!(map.insert(i, i + 1, &guard), None);
                    }
                });
            }
        });

        let guard = map.guard();
        for i in 0..CHUNK * threads {
            assert_eq!(map.get(&i, &guard), Some(&(i + 1)));
        }
        assert_eq!(map.len(), CHUNK * threads);
    }
}

// An erased key must stay erased until its owner writes it again, even
// while other threads keep migrations in flight underneath it.
#[test]
fn erase_stays_erased_stress() {
    const ITERATIONS: usize = if cfg!(miri) { 1 } else { 8 };
    const ROUNDS: usize = if cfg!(miri) { 16 } else { 1 << 10 };

    for _ in 0..ITERATIONS {
        let map: HashMap<usize, usize> = HashMap::with_capacity(1);
        let threads = threads().max(2);
        let barrier = Barrier::new(threads);

        thread::scope(|s| {
            for t in 0..threads {
                let barrier = &barrier;
                let map = &map;
                s.spawn(move || {
                    barrier.wait();
                    let guard = map.guard();

                    // Each thread owns one key that no other thread
                    // writes.
                    let key = usize::MAX - t;

                    for i in 0..ROUNDS {
                        assert_eq!(map.insert(key, i, &guard), None);
                        assert_eq!(map.get(&key, &guard), Some(&i));
                        assert_eq!(map.remove(&key, &guard), Some(&i));
                        assert_eq!(map.get(&key, &guard), None);

                        // Grow the map so resizes race the churn.
                        map.insert(t * ROUNDS + i, i, &guard);
                    }
                });
            }
        });
    }
}

// Values from racing same-key inserts are dropped exactly once, whether
// they were replaced, superseded during a migration, or still live when
// the map is dropped.
#[test]
fn overwrite_drops_once() {
    const WRITES: usize = if cfg!(miri) { 32 } else { 1 << 10 };

    static DROPS: AtomicUsize = AtomicUsize::new(0);

    struct Token;
    impl Drop for Token {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::Relaxed);
        }
    }

    let map: HashMap<usize, Token> = HashMap::with_capacity(1);
    let threads = threads().max(2);
    let barrier = Barrier::new(threads);

    thread::scope(|s| {
        for t in 0..threads {
            let barrier = &barrier;
            let map = &map;
            s.spawn(move || {
                barrier.wait();
                let guard = map.guard();
                for i in 0..WRITES {
                    // Everyone fights over one key while disjoint keys
                    // force migrations underneath.
                    map.insert(0, Token, &guard);
                    map.insert(t * WRITES + i + 1, Token, &guard);
                }
            });
        }
    });

    let total = threads * WRITES * 2;
    drop(map);
    assert_eq!(DROPS.load(Ordering::Relaxed), total);
}

// Dropping the map while a resize chain is still partially drained frees
// every entry exactly once.
#[test]
fn drop_mid_resize() {
    const CHUNK: usize = if cfg!(miri) { 48 } else { 1 << 12 };

    static DROPS: AtomicUsize = AtomicUsize::new(0);

    struct Token;
    impl Drop for Token {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::Relaxed);
        }
    }

    let map: HashMap<usize, Token> = HashMap::with_capacity(1);
    let threads = threads();
    let barrier = Barrier::new(threads);

    thread::scope(|s| {
        for t in 0..threads {
            let barrier = &barrier;
            let map = &map;
            s.spawn(move || {
                barrier.wait();
                let guard = map.guard();
                for i in (CHUNK * t)..(CHUNK * (t + 1)) {
                    map.insert(i, Token, &guard);
                }
            });
        }
    });

    // The chain behind the root may still be partially migrated.
    drop(map);
    assert_eq!(DROPS.load(Ordering::Relaxed), CHUNK * threads);
}

// Erasures racing a resize: removed keys stay gone, surviving keys stay
// reachable through the migration.
#[test]
fn remove_during_resize_stress() {
    const ITERATIONS: usize = if cfg!(miri) { 1 } else { 16 };
    const PREFILL: usize = if cfg!(miri) { 64 } else { 1 << 12 };
    const INSERTS: usize = if cfg!(miri) { 48 } else { 1 << 12 };

    for _ in 0..ITERATIONS {
        let map: HashMap<usize, usize> = HashMap::with_capacity(PREFILL);

        {
            let guard = map.guard();
            for i in 0..PREFILL {
                map.insert(i, i, &guard);
            }
        }

        let threads = threads().max(2);
        let barrier = Barrier::new(threads);

        thread::scope(|s| {
            for t in 0..threads {
                let barrier = &barrier;
                let map = &map;
                s.spawn(move || {
                    barrier.wait();
                    let guard = map.guard();

                    if t % 2 == 0 {
                        // Trigger and race the resize.
                        for i in 0..INSERTS {
                            map.insert(PREFILL + t * INSERTS + i, 0, &guard);
                        }
                    } else {
                        // Erase a disjoint part of the prefill.
                        for i in (t..PREFILL).step_by(threads) {
                            assert_eq!(map.remove(&i, &guard), Some(&i));
                        }
                    }
                });
            }
        });

        let guard = map.guard();
        for i in 0..PREFILL {
            let removed = (i % threads) % 2 == 1;
            if removed {
                assert!(!map.contains_key(&i, &guard));
            } else {
                assert_eq!(map.get(&i, &guard), Some(&i));
            }
        }
    }
}

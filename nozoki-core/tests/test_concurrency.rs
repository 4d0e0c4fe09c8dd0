//! 複数スレッドからの呼び出しと着脱の競合テスト

use nozoki_core::{Breakpoints, HitRecord, MethodHandle, MethodInfo, ToValue, Value};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn collector(engine: &Breakpoints) -> Arc<Mutex<Vec<Arc<HitRecord>>>> {
    let hits = Arc::new(Mutex::new(Vec::new()));
    let sink = hits.clone();
    engine.subscribe(move |hit| sink.lock().push(hit.clone()));
    hits
}

fn square(method: &MethodHandle, n: i64) -> i64 {
    method.invoke(None, || vec![n.to_value()], || n * n)
}

fn arg_of(hit: &HitRecord) -> i64 {
    hit.arguments()[0].as_int().expect("integer argument")
}

#[test]
fn test_two_threads_exact_hit_count() {
    const CALLS: i64 = 1_000;

    let engine = Arc::new(Breakpoints::default());
    let hits = collector(&engine);
    let method = MethodHandle::new(
        MethodInfo::type_level("Math", "square")
            .param("i64")
            .returns("i64"),
    );
    assert!(engine.attach(&method, None));

    let workers: Vec<_> = (0..2)
        .map(|t| {
            let method = method.clone();
            thread::spawn(move || {
                for i in 0..CALLS {
                    let n = t * CALLS + i;
                    assert_eq!(square(&method, n), n * n);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked");
    }

    let hits = hits.lock();
    assert_eq!(hits.len(), 2 * CALLS as usize);

    // 重複なし
    let sequences: HashSet<u64> = hits.iter().map(|h| h.sequence()).collect();
    let args: HashSet<i64> = hits.iter().map(|h| arg_of(h)).collect();
    assert_eq!(sequences.len(), hits.len());
    assert_eq!(args.len(), hits.len());

    // 結果は各呼び出しの戻り値
    for hit in hits.iter() {
        let n = arg_of(hit);
        assert_eq!(hit.result(), Some(&Value::Int(n * n)));
    }

    // スレッドごとに呼び出し順で届く
    for t in 0..2 {
        let per_thread: Vec<i64> = hits
            .iter()
            .map(|h| arg_of(h))
            .filter(|n| n / CALLS == t)
            .collect();
        assert!(per_thread.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn test_attach_detach_race() {
    let engine = Arc::new(Breakpoints::default());
    let hits = collector(&engine);
    let method = MethodHandle::new(
        MethodInfo::type_level("Math", "square")
            .param("i64")
            .returns("i64"),
    );
    let stop = Arc::new(AtomicBool::new(false));

    let callers: Vec<_> = (0..4)
        .map(|t| {
            let method = method.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut calls = 0i64;
                while !stop.load(Ordering::Relaxed) {
                    let n = t * 1_000_000 + calls;
                    assert_eq!(square(&method, n), n * n);
                    calls += 1;
                }
                calls
            })
        })
        .collect();

    let toggler = {
        let engine = engine.clone();
        let method = method.clone();
        thread::spawn(move || {
            for _ in 0..500 {
                engine.attach(&method, None);
                thread::yield_now();
                engine.detach(&method, None);
            }
        })
    };

    toggler.join().expect("toggler panicked");
    stop.store(true, Ordering::Relaxed);
    let made: Vec<i64> = callers
        .into_iter()
        .map(|c| c.join().expect("caller panicked"))
        .collect();

    assert!(!engine.is_attached(&method, None));
    assert!(!method.site().is_patched());

    // 1回の呼び出しにつきヒットは高々1つ
    let hits = hits.lock();
    let args: HashSet<i64> = hits.iter().map(|h| arg_of(h)).collect();
    assert_eq!(args.len(), hits.len());
    for n in args {
        let (t, i) = (n / 1_000_000, n % 1_000_000);
        assert!(i < made[t as usize]);
    }
}

#[test]
fn test_drop_engine_while_calling() {
    let method = MethodHandle::new(
        MethodInfo::type_level("Math", "square")
            .param("i64")
            .returns("i64"),
    );
    let stop = Arc::new(AtomicBool::new(false));

    let caller = {
        let method = method.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            let mut n = 0;
            while !stop.load(Ordering::Relaxed) {
                square(&method, n);
                n += 1;
            }
        })
    };

    for _ in 0..50 {
        let engine = Breakpoints::default();
        let _hits = collector(&engine);
        engine.attach(&method, None);
        thread::yield_now();
    }

    stop.store(true, Ordering::Relaxed);
    caller.join().expect("caller panicked");
    assert!(!method.site().is_patched());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hits_from_runtime_workers() {
    let engine = Arc::new(Breakpoints::default());
    let hits = collector(&engine);
    let method = MethodHandle::new(
        MethodInfo::type_level("Math", "square")
            .param("i64")
            .returns("i64"),
    );
    engine.attach(&method, None);

    let tasks: Vec<_> = (0..8i64)
        .map(|t| {
            let method = method.clone();
            tokio::spawn(async move {
                for i in 0..100 {
                    square(&method, t * 100 + i);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.expect("task failed");
    }

    let hits = hits.lock();
    assert_eq!(hits.len(), 800);
    let threads: HashSet<_> = hits.iter().map(|h| h.thread().id).collect();
    assert!(!threads.is_empty());
}

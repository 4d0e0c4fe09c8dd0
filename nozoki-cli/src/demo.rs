//! コンソールで監視するデモプログラム
//!
//! バックグラウンドのワーカースレッドが `Counter`、`Greeter`、`Clock`、`Checksum`
//! のメソッドを呼び続けます。どのメソッドもカタログに登録したハンドルの
//! `invoke` を通るので、コンソールから実行中にブレークポイントを着脱できます。

use anyhow::Result;
use nozoki_core::{MethodHandle, MethodInfo, ObjectRef, ToValue, TypeCatalog};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// デモの型が使うメソッドハンドル
pub struct DemoMethods {
    counter_add: MethodHandle,
    counter_reset: MethodHandle,
    greeter_greet: MethodHandle,
    clock_tick: MethodHandle,
    checksum_crc32: MethodHandle,
}

impl DemoMethods {
    fn define(catalog: &TypeCatalog) -> Result<Self> {
        Ok(Self {
            counter_add: catalog.define(
                MethodInfo::instance("Counter", "add")
                    .param("i64")
                    .returns("i64"),
            )?,
            counter_reset: catalog.define(MethodInfo::instance("Counter", "reset"))?,
            greeter_greet: catalog.define(
                MethodInfo::instance("Greeter", "greet")
                    .param("String")
                    .returns("String"),
            )?,
            clock_tick: catalog.define(MethodInfo::type_level("Clock", "tick"))?,
            // ホットパス用の最適化済みルーチン扱い（フック不可）
            checksum_crc32: catalog.define(
                MethodInfo::type_level("Checksum", "crc32")
                    .param("[u8]")
                    .returns("u32")
                    .opaque(),
            )?,
        })
    }
}

pub struct Counter {
    methods: Arc<DemoMethods>,
    total: AtomicI64,
}

impl Counter {
    fn this(self: &Arc<Self>) -> ObjectRef {
        ObjectRef::new(self.clone())
    }

    pub fn add(self: &Arc<Self>, amount: i64) -> i64 {
        self.methods
            .counter_add
            .invoke(Some(&self.this()), || vec![amount.to_value()], || {
                self.total.fetch_add(amount, Ordering::SeqCst) + amount
            })
    }

    pub fn reset(self: &Arc<Self>) {
        self.methods.counter_reset.invoke(Some(&self.this()), Vec::new, || {
            self.total.store(0, Ordering::SeqCst);
        })
    }
}

pub struct Greeter {
    methods: Arc<DemoMethods>,
    greeting: String,
}

impl Greeter {
    fn this(self: &Arc<Self>) -> ObjectRef {
        ObjectRef::new(self.clone())
    }

    pub fn greet(self: &Arc<Self>, name: String) -> String {
        self.methods
            .greeter_greet
            .invoke(Some(&self.this()), || vec![name.to_value()], || {
                format!("{}, {}!", self.greeting, name)
            })
    }
}

static TICKS: AtomicU64 = AtomicU64::new(0);

pub fn tick(methods: &DemoMethods) {
    methods.clock_tick.invoke(None, Vec::new, || {
        TICKS.fetch_add(1, Ordering::Relaxed);
    })
}

pub fn crc32(methods: &DemoMethods, bytes: &[u8]) -> u32 {
    methods.checksum_crc32.invoke(None, || vec![bytes.to_value()], || {
        let mut crc = !0u32;
        for byte in bytes {
            crc ^= *byte as u32;
            for _ in 0..8 {
                let mask = (crc & 1).wrapping_neg();
                crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
            }
        }
        !crc
    })
}

/// デモプログラム全体
pub struct Demo {
    catalog: TypeCatalog,
    methods: Arc<DemoMethods>,
    counters: Vec<Arc<Counter>>,
    greeters: Vec<Arc<Greeter>>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl Demo {
    pub fn new() -> Result<Self> {
        let catalog = TypeCatalog::new();
        let methods = Arc::new(DemoMethods::define(&catalog)?);

        let counters = (0..2)
            .map(|_| {
                Arc::new(Counter {
                    methods: methods.clone(),
                    total: AtomicI64::new(0),
                })
            })
            .collect();
        let greeters = ["Hello", "Bonjour"]
            .into_iter()
            .map(|greeting| {
                Arc::new(Greeter {
                    methods: methods.clone(),
                    greeting: greeting.to_string(),
                })
            })
            .collect();

        Ok(Self {
            catalog,
            methods,
            counters,
            greeters,
            stop: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
        })
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    /// `#n` で参照できるインスタンス一覧
    pub fn instances(&self) -> Vec<ObjectRef> {
        self.counters
            .iter()
            .map(Counter::this)
            .chain(self.greeters.iter().map(Greeter::this))
            .collect()
    }

    pub fn instance(&self, index: usize) -> Option<ObjectRef> {
        self.instances().into_iter().nth(index)
    }

    /// ワーカースレッドを起動する
    pub fn start(&mut self, workers: usize, interval: Duration) -> Result<()> {
        for worker in 0..workers {
            let methods = self.methods.clone();
            let counter = self.counters[worker % self.counters.len()].clone();
            let greeter = self.greeters[worker % self.greeters.len()].clone();
            let stop = self.stop.clone();

            let handle = thread::Builder::new()
                .name(format!("demo-worker-{}", worker))
                .spawn(move || {
                    let mut round = 0i64;
                    while !stop.load(Ordering::Relaxed) {
                        round += 1;
                        let total = counter.add(round);
                        if round % 5 == 0 {
                            counter.reset();
                        }
                        greeter.greet(format!("caller-{}", worker));
                        tick(&methods);
                        crc32(&methods, &total.to_le_bytes());
                        thread::sleep(interval);
                    }
                    debug!("demo worker {} stopped after {} rounds", worker, round);
                })?;
            self.workers.push(handle);
        }
        info!("started {} demo workers", workers);
        Ok(())
    }

    /// ワーカースレッドを止めて終了を待つ
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Demo {
    fn drop(&mut self) {
        self.stop();
    }
}

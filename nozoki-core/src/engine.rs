//! ブレークポイントエンジンのメインロジック

use crate::capture::CaptureHook;
use crate::hit::HitRecord;
use crate::registry::BreakpointRegistry;
use crate::settings::{DebuggerBreakMode, Settings, SettingsConfig};
use crate::signal::{default_signal, DebuggerSignal};
use crate::stream::{HitStream, SubscriptionId};
use nozoki_target::{Installer, MethodHandle, ObjectRef};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// 監視中のメソッド
#[derive(Debug, Clone)]
pub struct WatchedMethod {
    pub method: MethodHandle,
    /// インスタンスフィルタ（空は全インスタンス）
    pub instances: Vec<ObjectRef>,
}

/// 捕捉コールバックと共有する状態
pub(crate) struct Shared {
    pub(crate) registry: BreakpointRegistry,
    pub(crate) stream: HitStream,
    settings: Arc<Settings>,
    signal_override: RwLock<Option<Arc<dyn DebuggerSignal>>>,
    sequence: AtomicU64,
}

impl Shared {
    /// 次のヒット連番
    pub(crate) fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// 設定された停止モードに従ってデバッガに知らせる
    pub(crate) fn signal_debugger(&self, method: &MethodHandle) {
        let mode = self.settings.break_mode();
        if mode == DebuggerBreakMode::None {
            return;
        }

        let custom = self.signal_override.read().clone();
        match custom {
            Some(signal) => signal.signal(method),
            None => default_signal(mode).signal(method),
        }
    }
}

/// ブレークポイントエンジン
///
/// プロセス全体で1つのレジストリを持つ所有オブジェクトです。
/// 着脱を行うサブシステムには `Arc<Breakpoints>` で渡します。
pub struct Breakpoints {
    shared: Arc<Shared>,
}

impl Breakpoints {
    /// 新しいエンジンを作成する
    pub fn new(config: SettingsConfig) -> Self {
        let settings = Arc::new(Settings::new(config));
        let shared = Arc::new_cyclic(|weak| {
            let hook = CaptureHook::new(settings.clone(), weak.clone());
            Shared {
                registry: BreakpointRegistry::new(Installer::new(Arc::new(hook))),
                stream: HitStream::new(),
                settings: settings.clone(),
                signal_override: RwLock::new(None),
                sequence: AtomicU64::new(0),
            }
        });
        Self { shared }
    }

    /// ブレークポイントを設定する
    ///
    /// `instance` が `None` なら全インスタンス、`Some` ならそのインスタンスだけを監視します。
    /// フックできないメソッドの場合は false を返します。
    pub fn attach(&self, method: &MethodHandle, instance: Option<&ObjectRef>) -> bool {
        self.shared.registry.attach(method, instance)
    }

    /// ブレークポイントを解除する
    pub fn detach(&self, method: &MethodHandle, instance: Option<&ObjectRef>) -> bool {
        self.shared.registry.detach(method, instance)
    }

    /// ブレークポイントが設定されているか
    pub fn is_attached(&self, method: &MethodHandle, instance: Option<&ObjectRef>) -> bool {
        self.shared.registry.is_attached(method, instance)
    }

    /// すべてのブレークポイントを解除する
    pub fn detach_all(&self) -> usize {
        self.shared.registry.detach_all()
    }

    /// レジストリとは独立に、インストールしたすべてのフックを外す
    pub fn reset(&self) {
        let detached = self.detach_all();
        let leftover = self.shared.registry.installer().uninstall_all();
        debug!("reset breakpoints ({} detached, {} stray hooks)", detached, leftover);
    }

    /// ヒットを購読する
    pub fn subscribe<F>(&self, on_hit: F) -> SubscriptionId
    where
        F: Fn(&Arc<HitRecord>) + Send + Sync + 'static,
    {
        self.shared.stream.subscribe(Arc::new(on_hit))
    }

    /// 購読を解除する
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.stream.unsubscribe(id)
    }

    /// 設定を取得する
    pub fn settings(&self) -> &Settings {
        &self.shared.settings
    }

    /// 停止モードが `None` 以外のときに使う戦略を差し替える
    ///
    /// `None` を渡すとモードごとの既定の戦略に戻ります。
    pub fn set_debugger_signal(&self, signal: Option<Arc<dyn DebuggerSignal>>) {
        *self.shared.signal_override.write() = signal;
    }

    /// 監視中のメソッド一覧
    pub fn watched(&self) -> Vec<WatchedMethod> {
        let mut watched: Vec<WatchedMethod> = self
            .shared
            .registry
            .watched()
            .into_iter()
            .map(|(method, instances)| WatchedMethod { method, instances })
            .collect();
        watched.sort_by_key(|w| w.method.info().signature());
        watched
    }

    /// 有効なフックの数
    pub fn installed_count(&self) -> usize {
        self.shared.registry.installer().installed_count()
    }
}

impl Default for Breakpoints {
    fn default() -> Self {
        Self::new(SettingsConfig::default())
    }
}

impl Drop for Breakpoints {
    fn drop(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nozoki_target::{MethodInfo, Value};
    use parking_lot::Mutex;

    struct Recording {
        calls: Mutex<Vec<String>>,
    }

    impl DebuggerSignal for Recording {
        fn signal(&self, method: &MethodHandle) {
            self.calls.lock().push(method.info().qualified_name());
        }
    }

    #[test]
    fn test_signal_only_when_mode_set() {
        let engine = Breakpoints::default();
        let recording = Arc::new(Recording {
            calls: Mutex::new(Vec::new()),
        });
        engine.set_debugger_signal(Some(recording.clone() as Arc<dyn DebuggerSignal>));

        let m = MethodHandle::new(MethodInfo::type_level("Clock", "tick"));
        assert!(engine.attach(&m, None));

        m.invoke(None, Vec::new, || ());
        assert!(recording.calls.lock().is_empty());

        engine.settings().set_break_mode(DebuggerBreakMode::DebuggerBreak);
        m.invoke(None, Vec::new, || ());
        assert_eq!(recording.calls.lock().as_slice(), ["Clock::tick"]);
    }

    #[test]
    fn test_throw_catch_mode_keeps_result() {
        let engine = Breakpoints::new(SettingsConfig {
            break_mode: DebuggerBreakMode::ThrowCatch,
            ..SettingsConfig::default()
        });
        let hits = Arc::new(Mutex::new(Vec::new()));
        let sink = hits.clone();
        engine.subscribe(move |hit| sink.lock().push(hit.clone()));

        let m = MethodHandle::new(
            MethodInfo::instance("Counter", "add")
                .param("i64")
                .returns("i64"),
        );
        engine.attach(&m, None);
        let result = m.invoke(None, || vec![Value::Int(1)], || 1i64 + 1);

        assert_eq!(result, 2);
        assert_eq!(hits.lock().len(), 1);
    }

    #[test]
    fn test_drop_uninstalls() {
        let m = MethodHandle::new(MethodInfo::type_level("Clock", "tick"));
        {
            let engine = Breakpoints::default();
            engine.attach(&m, None);
            assert!(m.site().is_patched());
        }
        assert!(!m.site().is_patched());
    }

    #[test]
    fn test_watched_lists_filters() {
        let engine = Breakpoints::default();
        let m = MethodHandle::new(MethodInfo::instance("Foo", "bar"));
        let obj = ObjectRef::new(Arc::new(1u8));
        engine.attach(&m, Some(&obj));

        let watched = engine.watched();
        assert_eq!(watched.len(), 1);
        assert_eq!(watched[0].method, m);
        assert_eq!(watched[0].instances, vec![obj]);
    }
}

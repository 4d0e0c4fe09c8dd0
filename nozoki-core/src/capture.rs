//! ヒット捕捉コールバック
//!
//! フックされたメソッドを実行しているスレッドで、その呼び出しの内側から
//! 同期的に実行されます。ここで起きた失敗は監視対象のプログラムに
//! 決して伝播させません。

use crate::engine::Shared;
use crate::errors::panic_message;
use crate::hit::HitRecord;
use crate::settings::Settings;
use crate::trace::CallTrace;
use nozoki_target::{Interceptor, MethodHandle, ObjectRef, ToValue, Value};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::warn;

/// インストーラに渡す捕捉コールバック
pub(crate) struct CaptureHook {
    settings: Arc<Settings>,
    shared: Weak<Shared>,
}

impl CaptureHook {
    pub(crate) fn new(settings: Arc<Settings>, shared: Weak<Shared>) -> Self {
        Self { settings, shared }
    }

    /// 有効で、登録とフィルタに合う呼び出しかどうか
    fn qualifies(
        &self,
        instance: Option<&ObjectRef>,
        method: &MethodHandle,
    ) -> Option<Arc<Shared>> {
        // 無効時はレジストリを見ずに即座に戻る
        if !self.settings.is_enabled() {
            return None;
        }

        // エンジンが破棄されていれば何もしない
        let shared = self.shared.upgrade()?;

        // 登録がない（着脱との競合を含む）かフィルタに合わなければヒットしない
        shared.registry.matches(method, instance).then_some(shared)
    }

    fn capture(
        &self,
        instance: Option<&ObjectRef>,
        method: &MethodHandle,
        args: &[Value],
        result: Option<&dyn ToValue>,
    ) {
        let Some(shared) = self.qualifies(instance, method) else {
            return;
        };

        // シグナルの失敗でヒットを失わないよう、別々に隔離する
        let signalled = panic::catch_unwind(AssertUnwindSafe(|| shared.signal_debugger(method)));
        if let Err(payload) = signalled {
            warn!(
                "failed to signal debugger on {}: {}",
                method,
                panic_message(payload.as_ref())
            );
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let result = result.map(|r| r.to_value());
            let trace = CallTrace::capture(
                self.settings.trace_depth(),
                self.settings.native_backtrace(),
            );
            let hit = Arc::new(HitRecord::new(
                shared.next_sequence(),
                method.clone(),
                instance.cloned(),
                args.to_vec(),
                result,
                trace,
            ));
            shared.stream.publish(&hit);
        }));

        if let Err(payload) = outcome {
            warn!(
                "failed to capture hit on {}: {}",
                method,
                panic_message(payload.as_ref())
            );
        }
    }
}

impl Interceptor for CaptureHook {
    fn wants(&self, instance: Option<&ObjectRef>, method: &MethodHandle) -> bool {
        self.qualifies(instance, method).is_some()
    }

    fn on_value(
        &self,
        instance: Option<&ObjectRef>,
        method: &MethodHandle,
        args: &[Value],
        result: &dyn ToValue,
    ) {
        self.capture(instance, method, args, Some(result));
    }

    fn on_void(&self, instance: Option<&ObjectRef>, method: &MethodHandle, args: &[Value]) {
        self.capture(instance, method, args, None);
    }
}

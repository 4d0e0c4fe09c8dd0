//! フックサイト（実行時にパッチ可能なメソッドの入口）

use crate::installer::Interceptor;
use crate::method::MethodHandle;
use crate::value::{ObjectRef, ToValue, Value};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// サイト内でフックを識別するID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(pub u64);

/// フックの形
///
/// インストール時にメソッドの戻り値型から選ばれます。
#[derive(Clone)]
pub enum HookShape {
    /// 値を返すメソッド用（戻り値を受け取る）
    Value(Arc<dyn Interceptor>),
    /// void メソッド用（戻り値を受け取らない）
    Void(Arc<dyn Interceptor>),
}

impl HookShape {
    fn interceptor(&self) -> &Arc<dyn Interceptor> {
        match self {
            HookShape::Value(interceptor) | HookShape::Void(interceptor) => interceptor,
        }
    }
}

#[derive(Clone)]
struct InstalledHook {
    id: HookId,
    shape: HookShape,
}

/// フックサイト
///
/// パッチ数が0の間は本体をそのまま実行するだけです。
/// フック一覧はコピーオンライトで、呼び出し側はスナップショットを
/// 取ってからロックを離してフックを呼びます。
pub struct HookSite {
    patches: AtomicUsize,
    hooks: RwLock<Arc<[InstalledHook]>>,
    next_id: AtomicU64,
}

impl HookSite {
    /// パッチされていないサイトを作成する
    pub fn new() -> Self {
        Self {
            patches: AtomicUsize::new(0),
            hooks: RwLock::new(Arc::from(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// フックが1つでもインストールされているか
    pub fn is_patched(&self) -> bool {
        self.patches.load(Ordering::Acquire) > 0
    }

    /// インストールされているフックの数
    pub fn patch_count(&self) -> usize {
        self.patches.load(Ordering::Acquire)
    }

    /// フックをサイトに書き込む
    pub(crate) fn patch(&self, shape: HookShape) -> HookId {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut hooks = self.hooks.write();
        let mut updated: Vec<InstalledHook> = hooks.iter().cloned().collect();
        updated.push(InstalledHook { id, shape });
        *hooks = Arc::from(updated);
        self.patches.store(hooks.len(), Ordering::Release);
        id
    }

    /// フックをサイトから取り除く
    ///
    /// 既に取り除かれている場合は false を返します。
    pub(crate) fn unpatch(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.write();
        if !hooks.iter().any(|h| h.id == id) {
            return false;
        }
        let updated: Vec<InstalledHook> = hooks.iter().filter(|h| h.id != id).cloned().collect();
        *hooks = Arc::from(updated);
        self.patches.store(hooks.len(), Ordering::Release);
        true
    }

    /// 呼び出しの入口で、捕捉を望むフックがあるかどうか
    pub(crate) fn wants(&self, instance: Option<&ObjectRef>, method: &MethodHandle) -> bool {
        let snapshot = self.hooks.read().clone();
        snapshot
            .iter()
            .any(|hook| hook.shape.interceptor().wants(instance, method))
    }

    /// 本体の正常終了後にフックを呼び出す
    ///
    /// 実行中に並行してアンインストールされても、取得済みの
    /// スナップショットに含まれるフックは最後まで実行されます。
    /// 戻り値は変換せずに渡し、変換はフック側に任せます。
    pub(crate) fn dispatch<R: ToValue>(
        &self,
        instance: Option<&ObjectRef>,
        method: &MethodHandle,
        args: &[Value],
        result: &R,
    ) {
        let snapshot = self.hooks.read().clone();
        for hook in snapshot.iter() {
            match &hook.shape {
                HookShape::Value(interceptor) => {
                    interceptor.on_value(instance, method, args, result);
                }
                HookShape::Void(interceptor) => {
                    interceptor.on_void(instance, method, args);
                }
            }
        }
    }
}

impl Default for HookSite {
    fn default() -> Self {
        Self::new()
    }
}

//! フックのインストーラ

use crate::method::MethodHandle;
use crate::site::{HookId, HookShape};
use crate::value::{ObjectRef, ToValue, Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// フックされたメソッドの正常終了時に呼ばれるコールバック
///
/// フックされたメソッドを実行しているスレッドで、その呼び出しの内側から
/// 同期的に呼ばれます。実装は panic を外に漏らしてはいけません。
pub trait Interceptor: Send + Sync {
    /// 呼び出しの入口で、この呼び出しを捕捉するかどうかを返す
    ///
    /// false なら引数の構築も戻り値の変換も行いません。
    /// 安価な判定（フラグの読み取りなど）だけにしてください。
    fn wants(&self, _instance: Option<&ObjectRef>, _method: &MethodHandle) -> bool {
        true
    }

    /// 値を返すメソッドの終了時
    ///
    /// 戻り値の変換は実装側が必要になった時点で行います。
    fn on_value(
        &self,
        instance: Option<&ObjectRef>,
        method: &MethodHandle,
        args: &[Value],
        result: &dyn ToValue,
    );

    /// void メソッドの終了時
    fn on_void(&self, instance: Option<&ObjectRef>, method: &MethodHandle, args: &[Value]);
}

/// インストール失敗
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InstallError {
    #[error("method `{0}` cannot be hooked")]
    NotHookable(String),
    #[error("method `{0}` is already hooked by this installer")]
    AlreadyInstalled(String),
}

/// インストールトークンID
pub type TokenId = u64;

/// インストールを取り消すためのトークン
///
/// `Clone` ではないので、1回のインストールにつき取り消しは高々1回です。
#[derive(Debug)]
pub struct InstallToken {
    id: TokenId,
    method: MethodHandle,
}

impl InstallToken {
    /// トークンIDを取得する
    pub fn id(&self) -> TokenId {
        self.id
    }

    /// フックしたメソッドを取得する
    pub fn method(&self) -> &MethodHandle {
        &self.method
    }
}

/// インストーラ
///
/// インストールしたフックをトークンテーブルで管理します。
/// レジストリの管理とは独立に、`uninstall_all` ですべて取り外せます。
pub struct Installer {
    interceptor: Arc<dyn Interceptor>,
    installed: Mutex<HashMap<TokenId, (MethodHandle, HookId)>>,
    next_id: AtomicU64,
}

impl Installer {
    /// 新しいインストーラを作成する
    pub fn new(interceptor: Arc<dyn Interceptor>) -> Self {
        Self {
            interceptor,
            installed: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// メソッドにフックをインストールする
    ///
    /// 戻り値型があれば値を受け取る形、なければ void の形を選びます。
    pub fn install(&self, method: &MethodHandle) -> Result<InstallToken, InstallError> {
        let info = method.info();
        if !info.hookable {
            return Err(InstallError::NotHookable(info.to_string()));
        }

        let mut installed = self.installed.lock();
        if installed.values().any(|(m, _)| m == method) {
            return Err(InstallError::AlreadyInstalled(info.to_string()));
        }

        let shape = if info.produces_value() {
            HookShape::Value(self.interceptor.clone())
        } else {
            HookShape::Void(self.interceptor.clone())
        };
        let hook_id = method.site().patch(shape);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        installed.insert(id, (method.clone(), hook_id));
        debug!("installed hook #{} on {}", id, info);

        Ok(InstallToken {
            id,
            method: method.clone(),
        })
    }

    /// インストールを取り消す
    ///
    /// `uninstall_all` で既に取り外されていた場合は false を返します。
    pub fn uninstall(&self, token: InstallToken) -> bool {
        let entry = self.installed.lock().remove(&token.id);
        match entry {
            Some((method, hook_id)) => {
                method.site().unpatch(hook_id);
                debug!("uninstalled hook #{} from {}", token.id, method);
                true
            }
            None => false,
        }
    }

    /// このインストーラが行ったすべてのインストールを取り消す
    pub fn uninstall_all(&self) -> usize {
        let drained: Vec<_> = self.installed.lock().drain().collect();
        for (_, (method, hook_id)) in &drained {
            method.site().unpatch(*hook_id);
        }
        if !drained.is_empty() {
            debug!("uninstalled {} hooks", drained.len());
        }
        drained.len()
    }

    /// 有効なインストールの数
    pub fn installed_count(&self) -> usize {
        self.installed.lock().len()
    }

    /// メソッドがこのインストーラでフックされているか
    pub fn is_installed(&self, method: &MethodHandle) -> bool {
        self.installed.lock().values().any(|(m, _)| m == method)
    }
}

impl Drop for Installer {
    fn drop(&mut self) {
        self.uninstall_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::MethodInfo;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        values: AtomicUsize,
        voids: AtomicUsize,
    }

    impl Interceptor for Counting {
        fn on_value(&self, _: Option<&ObjectRef>, _: &MethodHandle, _: &[Value], _: &dyn ToValue) {
            self.values.fetch_add(1, Ordering::SeqCst);
        }

        fn on_void(&self, _: Option<&ObjectRef>, _: &MethodHandle, _: &[Value]) {
            self.voids.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_install_chooses_shape() {
        let counting = Arc::new(Counting::default());
        let installer = Installer::new(counting.clone());

        let add = MethodHandle::new(
            MethodInfo::instance("Counter", "add")
                .param("i64")
                .returns("i64"),
        );
        let reset = MethodHandle::new(MethodInfo::instance("Counter", "reset"));

        let _t1 = installer.install(&add).expect("install add");
        let _t2 = installer.install(&reset).expect("install reset");

        add.invoke(None, || vec![Value::Int(1)], || 1i64);
        reset.invoke(None, Vec::new, || ());

        assert_eq!(counting.values.load(Ordering::SeqCst), 1);
        assert_eq!(counting.voids.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_install_not_hookable() {
        let installer = Installer::new(Arc::new(Counting::default()));
        let crc = MethodHandle::new(
            MethodInfo::type_level("Checksum", "crc32")
                .returns("u32")
                .opaque(),
        );

        let err = installer.install(&crc).unwrap_err();
        assert!(matches!(err, InstallError::NotHookable(_)));
        assert!(!crc.site().is_patched());
    }

    #[test]
    fn test_install_twice_rejected() {
        let installer = Installer::new(Arc::new(Counting::default()));
        let m = MethodHandle::new(MethodInfo::instance("Foo", "bar"));

        let _token = installer.install(&m).expect("first install");
        assert!(matches!(installer.install(&m), Err(InstallError::AlreadyInstalled(_))));
        assert_eq!(m.site().patch_count(), 1);
    }

    #[test]
    fn test_uninstall_all_then_token() {
        let counting = Arc::new(Counting::default());
        let installer = Installer::new(counting.clone());
        let m = MethodHandle::new(MethodInfo::instance("Foo", "bar"));

        let token = installer.install(&m).expect("install");
        assert_eq!(installer.uninstall_all(), 1);
        assert!(!m.site().is_patched());

        // 既に取り外されたトークン
        assert!(!installer.uninstall(token));

        m.invoke(None, Vec::new, || ());
        assert_eq!(counting.voids.load(Ordering::SeqCst), 0);
    }
}

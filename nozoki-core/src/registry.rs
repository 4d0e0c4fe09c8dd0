//! ブレークポイントレジストリ
//!
//! メソッドハンドルごとの登録（インストールトークンとインスタンスフィルタ）を管理します。
//!
//! 状態遷移:
//! - 未監視 --attach--> 全インスタンス監視（フィルタ空）/ フィルタ付き監視
//! - 監視中 --attach(None)--> フィルタをクリアして全インスタンス監視
//! - 監視中 --attach(Some)--> フィルタに追加（全インスタンス監視からは絞り込みになる）
//! - 監視中 --detach(None)--> フックを外して未監視
//! - フィルタ付き --detach(Some)--> 最後のインスタンスを外したらフックを外して未監視

use nozoki_target::{InstallToken, Installer, MethodHandle, ObjectId, ObjectRef};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, warn};

/// 1つの監視中メソッドの登録
pub struct Registration {
    target: MethodHandle,
    token: InstallToken,
    /// 参照同一性で比較するインスタンスフィルタ（空は全インスタンス）
    filters: HashMap<ObjectId, ObjectRef>,
}

impl Registration {
    pub fn target(&self) -> &MethodHandle {
        &self.target
    }

    /// フィルタが空（全インスタンスにマッチ）かどうか
    pub fn matches_all(&self) -> bool {
        self.filters.is_empty()
    }

    /// 呼び出し元インスタンスがフィルタにマッチするか
    pub fn matches(&self, instance: Option<&ObjectRef>) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        instance.is_some_and(|obj| self.filters.contains_key(&obj.id()))
    }

    /// フィルタに入っているインスタンス
    pub fn filters(&self) -> Vec<ObjectRef> {
        self.filters.values().cloned().collect()
    }
}

/// ブレークポイントレジストリ
///
/// 操作側スレッドからの着脱と、フックされた呼び出しスレッドからの参照が
/// 並行して起こるため、マップはロックで保護します。ロックは参照と更新の間だけ持ち、
/// 購読者のコードを呼んでいる間は持ちません。
pub struct BreakpointRegistry {
    installer: Installer,
    registrations: RwLock<HashMap<MethodHandle, Registration>>,
}

impl BreakpointRegistry {
    pub fn new(installer: Installer) -> Self {
        Self {
            installer,
            registrations: RwLock::new(HashMap::new()),
        }
    }

    /// ブレークポイントを設定する
    ///
    /// 未監視ならフックをインストールします。インストールに失敗した場合は false です。
    pub fn attach(&self, method: &MethodHandle, instance: Option<&ObjectRef>) -> bool {
        let mut registrations = self.registrations.write();

        if let Some(registration) = registrations.get_mut(method) {
            match instance {
                None => registration.filters.clear(),
                Some(obj) => {
                    registration.filters.insert(obj.id(), obj.clone());
                }
            }
            debug!(
                "updated breakpoint on {} ({} instance filters)",
                method,
                registration.filters.len()
            );
            return true;
        }

        let token = match self.installer.install(method) {
            Ok(token) => token,
            Err(e) => {
                warn!("failed to attach breakpoint: {}", e);
                return false;
            }
        };

        let mut filters = HashMap::new();
        if let Some(obj) = instance {
            filters.insert(obj.id(), obj.clone());
        }
        registrations.insert(
            method.clone(),
            Registration {
                target: method.clone(),
                token,
                filters,
            },
        );
        debug!("attached breakpoint on {}", method);
        true
    }

    /// ブレークポイントを解除する
    ///
    /// 登録があった場合に true を返します。
    pub fn detach(&self, method: &MethodHandle, instance: Option<&ObjectRef>) -> bool {
        let mut registrations = self.registrations.write();
        let Some(registration) = registrations.get_mut(method) else {
            return false;
        };

        let teardown = match instance {
            None => {
                registration.filters.clear();
                true
            }
            // 全インスタンス監視からの個別解除は何もしない
            Some(obj) => {
                registration.filters.remove(&obj.id()).is_some() && registration.filters.is_empty()
            }
        };

        if teardown {
            if let Some(registration) = registrations.remove(method) {
                self.installer.uninstall(registration.token);
                debug!("detached breakpoint from {}", method);
            }
        }
        true
    }

    /// ブレークポイントが設定されているか
    ///
    /// `instance` が `None` なら全インスタンス監視かどうか、
    /// `Some` ならそのインスタンスがフィルタに入っているかどうかを返します。
    /// 全インスタンス監視は特定インスタンスについては false になります。
    pub fn is_attached(&self, method: &MethodHandle, instance: Option<&ObjectRef>) -> bool {
        let registrations = self.registrations.read();
        let Some(registration) = registrations.get(method) else {
            return false;
        };
        match instance {
            None => registration.filters.is_empty(),
            Some(obj) => registration.filters.contains_key(&obj.id()),
        }
    }

    /// 捕捉コールバックから呼ばれる照合
    ///
    /// 登録がない場合（着脱との競合を含む）はマッチしません。
    pub fn matches(&self, method: &MethodHandle, instance: Option<&ObjectRef>) -> bool {
        self.registrations
            .read()
            .get(method)
            .is_some_and(|registration| registration.matches(instance))
    }

    /// すべてのブレークポイントを解除する
    pub fn detach_all(&self) -> usize {
        let drained: Vec<Registration> = self
            .registrations
            .write()
            .drain()
            .map(|(_, registration)| registration)
            .collect();
        let count = drained.len();
        for registration in drained {
            self.installer.uninstall(registration.token);
        }
        if count > 0 {
            debug!("detached {} breakpoints", count);
        }
        count
    }

    /// 監視中のメソッドとフィルタ
    pub fn watched(&self) -> Vec<(MethodHandle, Vec<ObjectRef>)> {
        self.registrations
            .read()
            .values()
            .map(|r| (r.target.clone(), r.filters()))
            .collect()
    }

    /// 登録の数
    pub fn len(&self) -> usize {
        self.registrations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn installer(&self) -> &Installer {
        &self.installer
    }
}

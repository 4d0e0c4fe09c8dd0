//! メソッドハンドル

use crate::frames;
use crate::site::HookSite;
use crate::value::{ObjectRef, ToValue, Value};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// メソッドの反射情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    /// 宣言している型の名前
    pub owner: String,
    pub name: String,
    /// 引数の型名（宣言順）
    pub params: Vec<String>,
    /// 戻り値の型名（`None` は void）
    pub returns: Option<String>,
    /// インスタンスを持たない型レベルのメソッドかどうか
    pub is_static: bool,
    /// フック可能かどうか（外部実装やインライン化されたメソッドは false）
    pub hookable: bool,
}

impl MethodInfo {
    /// インスタンスメソッドの情報を作成する
    pub fn instance(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            params: Vec::new(),
            returns: None,
            is_static: false,
            hookable: true,
        }
    }

    /// 型レベル（static）メソッドの情報を作成する
    pub fn type_level(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            is_static: true,
            ..Self::instance(owner, name)
        }
    }

    /// 引数の型を追加する
    pub fn param(mut self, ty: impl Into<String>) -> Self {
        self.params.push(ty.into());
        self
    }

    /// 戻り値の型を設定する
    pub fn returns(mut self, ty: impl Into<String>) -> Self {
        self.returns = Some(ty.into());
        self
    }

    /// フック不可能なメソッドとしてマークする
    pub fn opaque(mut self) -> Self {
        self.hookable = false;
        self
    }

    /// 値を返すメソッドかどうか
    pub fn produces_value(&self) -> bool {
        self.returns.is_some()
    }

    /// `Owner::name(p1,p2)` 形式のシグネチャキー
    pub fn signature(&self) -> String {
        format!("{}::{}({})", self.owner, self.name, self.params.join(","))
    }

    /// `Owner::name`
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.owner, self.name)
    }
}

impl fmt::Display for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_static {
            write!(f, "static ")?;
        }
        write!(f, "{}::{}({})", self.owner, self.name, self.params.join(", "))?;
        if let Some(ret) = &self.returns {
            write!(f, " -> {}", ret)?;
        }
        Ok(())
    }
}

/// メソッド定義（反射情報とフックサイト）
pub struct MethodDef {
    info: MethodInfo,
    site: HookSite,
}

/// メソッドハンドル
///
/// レジストリのキーとして使う不変の識別子です。
/// 等価性は名前ではなく定義そのものの同一性で判定するため、
/// オーバーロードや同名の無関係なメソッドが衝突することはありません。
#[derive(Clone)]
pub struct MethodHandle(Arc<MethodDef>);

impl MethodHandle {
    /// メソッドを定義する
    ///
    /// 通常は [`crate::TypeCatalog::define`] 経由で作成します。
    pub fn new(info: MethodInfo) -> Self {
        Self(Arc::new(MethodDef {
            info,
            site: HookSite::new(),
        }))
    }

    /// 反射情報を取得する
    pub fn info(&self) -> &MethodInfo {
        &self.0.info
    }

    /// フックサイトを取得する
    pub fn site(&self) -> &HookSite {
        &self.0.site
    }

    /// 定義のアドレス（同一性キー）
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// メソッド本体をフックサイト経由で実行する
    ///
    /// `args` は捕捉を望むフックがある場合にだけ本体の前に評価されます。
    /// `args` が panic した場合はこの呼び出しを捕捉せず、本体だけを実行します。
    /// 本体が正常に戻ったときだけ、インストールされているフックを呼び出します。
    /// 本体が panic した場合はフックを呼ばずにそのまま巻き戻ります。
    pub fn invoke<R, A, B>(&self, instance: Option<&ObjectRef>, args: A, body: B) -> R
    where
        R: ToValue,
        A: FnOnce() -> Vec<Value>,
        B: FnOnce() -> R,
    {
        let site = self.site();
        let _frame = frames::enter(self.clone(), instance.map(ObjectRef::id));

        if !site.is_patched() || !site.wants(instance, self) {
            return body();
        }

        let args = match panic::catch_unwind(AssertUnwindSafe(args)) {
            Ok(args) => args,
            Err(_) => {
                warn!("failed to capture arguments of {}, call not captured", self);
                return body();
            }
        };
        let result = body();
        site.dispatch(instance, self, &args, &result);
        result
    }
}

impl PartialEq for MethodHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for MethodHandle {}

impl Hash for MethodHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Debug for MethodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodHandle({})", self.info())
    }
}

impl fmt::Display for MethodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.info(), f)
    }
}

//! Nozoki ターゲットランタイム
//!
//! このクレートは、監視対象プログラム側の低レベル機能を提供します。
//! 値とオブジェクト同一性、メソッドハンドル、型カタログ、
//! 実行時にパッチ可能なフックサイト、シャドウコールスタック、
//! そしてフックを着脱するインストーラを扱います。

pub mod value;
pub mod method;
pub mod catalog;
pub mod site;
pub mod frames;
pub mod installer;

pub use value::{ObjectId, ObjectRef, ToValue, Value};
pub use method::{MethodHandle, MethodInfo};
pub use catalog::{CatalogError, TypeCatalog};
pub use site::{HookId, HookShape, HookSite};
pub use frames::ActiveFrame;
pub use installer::{InstallError, InstallToken, Installer, Interceptor};

/// ターゲット制御の結果型
pub type Result<T> = anyhow::Result<T>;

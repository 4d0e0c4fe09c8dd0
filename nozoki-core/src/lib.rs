//! Nozoki ブレークポイントエンジンのコア機能
//!
//! このクレートは、実行中のプログラムを止めずにメソッド呼び出しを捕捉する
//! ブレークポイントエンジンの中核を提供します。
//! レジストリ、捕捉コールバック、ヒットレコード、ヒットストリームを統合します。

pub mod engine;
pub mod registry;
pub mod capture;
pub mod hit;
pub mod trace;
pub mod stream;
pub mod history;
pub mod settings;
pub mod signal;
pub mod command;
pub mod errors;
pub mod parse;

pub use engine::{Breakpoints, WatchedMethod};
pub use hit::{HitRecord, ThreadInfo};
pub use trace::{CallTrace, TraceFrame};
pub use stream::{HitHandler, SubscriptionId};
pub use history::HitHistory;
pub use settings::{DebuggerBreakMode, Settings, SettingsConfig};
pub use signal::{BreakSignal, DebuggerSignal, NativeBreak, NoSignal, ThrowCatch};
pub use command::{Command, Target};

// 他のクレートから使用するために再エクスポート
pub use nozoki_target::{MethodHandle, MethodInfo, ObjectId, ObjectRef, ToValue, TypeCatalog, Value};

/// エンジンの結果型
pub type Result<T> = anyhow::Result<T>;

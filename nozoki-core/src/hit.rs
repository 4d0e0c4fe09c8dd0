//! ヒットレコード

use crate::trace::CallTrace;
use nozoki_target::{MethodHandle, ObjectRef, Value};
use std::fmt;
use std::thread::ThreadId;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// ヒットしたスレッドの情報
#[derive(Debug, Clone)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: Option<String>,
}

impl ThreadInfo {
    /// 現在のスレッドの情報を取得する
    pub fn current() -> Self {
        let thread = std::thread::current();
        Self {
            id: thread.id(),
            name: thread.name().map(str::to_string),
        }
    }
}

/// 捕捉した1回の呼び出しの不変スナップショット
///
/// レジストリは発行後にこれを保持しません。保存するかどうかは購読側が決めます。
#[derive(Debug, Clone)]
pub struct HitRecord {
    sequence: u64,
    origin: MethodHandle,
    instance: Option<ObjectRef>,
    arguments: Vec<Value>,
    result: Option<Value>,
    trace: CallTrace,
    timestamp: OffsetDateTime,
    thread: ThreadInfo,
}

impl HitRecord {
    /// ヒットレコードを作成する
    ///
    /// `result` は void メソッドの場合 `None` です。
    pub fn new(
        sequence: u64,
        origin: MethodHandle,
        instance: Option<ObjectRef>,
        arguments: Vec<Value>,
        result: Option<Value>,
        trace: CallTrace,
    ) -> Self {
        Self {
            sequence,
            origin,
            instance,
            arguments,
            result,
            trace,
            timestamp: OffsetDateTime::now_utc(),
            thread: ThreadInfo::current(),
        }
    }

    /// エンジン内で一意な連番
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// ヒットしたメソッド
    pub fn origin(&self) -> &MethodHandle {
        &self.origin
    }

    /// 呼び出し元インスタンス（static メソッドでは `None`）
    pub fn instance(&self) -> Option<&ObjectRef> {
        self.instance.as_ref()
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    /// 戻り値（void メソッドでは `None`）
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn trace(&self) -> &CallTrace {
        &self.trace
    }

    /// 捕捉時刻（UTC）
    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }

    pub fn thread(&self) -> &ThreadInfo {
        &self.thread
    }

    /// RFC 3339 形式の捕捉時刻
    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.timestamp.unix_timestamp().to_string())
    }
}

impl fmt::Display for HitRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {}",
            self.sequence,
            self.timestamp_rfc3339(),
            self.origin.info().qualified_name()
        )?;

        let args = self
            .arguments
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "({})", args)?;

        if let Some(result) = &self.result {
            write!(f, " = {}", result)?;
        }
        if let Some(instance) = &self.instance {
            write!(f, " on {:?}", instance)?;
        }
        match &self.thread.name {
            Some(name) => write!(f, " [{}]", name),
            None => write!(f, " [{:?}]", self.thread.id),
        }
    }
}

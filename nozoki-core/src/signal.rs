//! デバッガへの停止シグナル
//!
//! ヒット時の「デバッガ停止」は差し替え可能な戦略として扱います。

use crate::settings::DebuggerBreakMode;
use nix::sys::signal::{raise, Signal};
use nozoki_target::MethodHandle;
use regex::Regex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// デバッガに停止を知らせる戦略
pub trait DebuggerSignal: Send + Sync {
    fn signal(&self, method: &MethodHandle);
}

/// 何もしない
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSignal;

impl DebuggerSignal for NoSignal {
    fn signal(&self, _method: &MethodHandle) {}
}

/// アタッチされているネイティブデバッガを SIGTRAP で停止させる
///
/// トレーサーがいない状態で SIGTRAP を送るとプロセスが終了するので、
/// その場合は何もしません。デバッガの有無は停止モードを設定したときに
/// 調べてキャッシュし、ヒットのたびにファイルを読むことはしません。
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBreak;

static TRACER_ATTACHED: AtomicBool = AtomicBool::new(false);

impl NativeBreak {
    /// キャッシュしたデバッガの有無
    pub fn tracer_attached() -> bool {
        TRACER_ATTACHED.load(Ordering::Relaxed)
    }

    /// `/proc/self/status` の TracerPid からデバッガの有無を調べ直す
    pub fn refresh_tracer() -> bool {
        let attached = std::fs::read_to_string("/proc/self/status")
            .map(|status| parse_tracer_pid(&status).is_some_and(|pid| pid != 0))
            .unwrap_or(false);
        TRACER_ATTACHED.store(attached, Ordering::Relaxed);
        attached
    }
}

fn tracer_pid_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^TracerPid:\s*(\d+)").ok())
        .as_ref()
}

/// `/proc/<pid>/status` の内容から TracerPid を読み取る
pub fn parse_tracer_pid(status: &str) -> Option<i32> {
    tracer_pid_re()?
        .captures(status)
        .and_then(|caps| caps[1].parse().ok())
}

impl DebuggerSignal for NativeBreak {
    fn signal(&self, method: &MethodHandle) {
        if !Self::tracer_attached() {
            debug!("no debugger attached, skipping break for {}", method);
            return;
        }
        if let Err(e) = raise(Signal::SIGTRAP) {
            warn!("failed to raise SIGTRAP for {}: {}", method, e);
        }
    }
}

/// ThrowCatch モードで投げるマーカー
///
/// 「この型の panic で停止」と設定したデバッガに自然な停止点を与えるためだけのもので、
/// 同じフレームで必ず捕まえられます。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakSignal {
    pub method: String,
}

/// マーカー panic を投げてその場で捕まえる
#[derive(Debug, Default, Clone, Copy)]
pub struct ThrowCatch;

impl DebuggerSignal for ThrowCatch {
    fn signal(&self, method: &MethodHandle) {
        // 巻き戻り中の panic はプロセスを中断させる
        if std::thread::panicking() {
            debug!("thread is unwinding, skipping break marker for {}", method);
            return;
        }
        silence_break_signal();
        let marker = BreakSignal {
            method: method.to_string(),
        };
        let _ = panic::catch_unwind(AssertUnwindSafe(move || panic::panic_any(marker)));
    }
}

/// マーカー panic の既定メッセージだけを抑制するパニックフックを一度だけ入れる
///
/// 他の panic は以前のフックにそのまま渡します。
/// panic 中のスレッドからはフックを変更できないので、その場合は何もしません。
fn silence_break_signal() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    if INSTALLED.get().is_some() || std::thread::panicking() {
        return;
    }
    INSTALLED.get_or_init(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if info.payload().is::<BreakSignal>() {
                return;
            }
            previous(info);
        }));
    });
}

/// 停止モードを使い始める前の準備
///
/// ヒットの経路でファイルを読んだりパニックフックを変更したりしないよう、
/// モードを設定した時点で済ませておきます。
pub fn prepare_break_mode(mode: DebuggerBreakMode) {
    match mode {
        DebuggerBreakMode::None => {}
        DebuggerBreakMode::DebuggerBreak => {
            let attached = NativeBreak::refresh_tracer();
            debug!("native break mode, debugger attached: {}", attached);
        }
        DebuggerBreakMode::ThrowCatch => silence_break_signal(),
    }
}

/// モードに対応する既定の戦略
pub fn default_signal(mode: DebuggerBreakMode) -> &'static dyn DebuggerSignal {
    static NONE: NoSignal = NoSignal;
    static NATIVE: NativeBreak = NativeBreak;
    static THROW: ThrowCatch = ThrowCatch;

    match mode {
        DebuggerBreakMode::None => &NONE,
        DebuggerBreakMode::DebuggerBreak => &NATIVE,
        DebuggerBreakMode::ThrowCatch => &THROW,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nozoki_target::MethodInfo;

    #[test]
    fn test_parse_tracer_pid() {
        let status = "Name:\tnozoki\nState:\tR (running)\nTracerPid:\t4242\nUid:\t0\n";
        assert_eq!(parse_tracer_pid(status), Some(4242));
        assert_eq!(parse_tracer_pid("TracerPid:\t0\n"), Some(0));
        assert_eq!(parse_tracer_pid("Name:\tx\n"), None);
    }

    #[test]
    fn test_throw_catch_does_not_escape() {
        let method = MethodHandle::new(MethodInfo::instance("Foo", "bar"));
        // 呼び出し元に panic が漏れないこと
        ThrowCatch.signal(&method);
        ThrowCatch.signal(&method);
    }

    #[test]
    fn test_throw_catch_skipped_while_unwinding() {
        struct SignalOnDrop(MethodHandle);

        impl Drop for SignalOnDrop {
            fn drop(&mut self) {
                // 巻き戻り中でもプロセスを中断させない
                ThrowCatch.signal(&self.0);
            }
        }

        let method = MethodHandle::new(MethodInfo::instance("Foo", "cleanup"));
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = SignalOnDrop(method.clone());
            panic!("outer");
        }));
        assert!(outcome.is_err());
    }

    #[test]
    fn test_prepare_native_break_caches_tracer() {
        prepare_break_mode(DebuggerBreakMode::DebuggerBreak);
        let cached = NativeBreak::tracer_attached();
        assert_eq!(cached, NativeBreak::refresh_tracer());
    }

    #[test]
    fn test_native_break_without_tracer() {
        // テスト実行時はデバッガがいないので何もしない
        if !NativeBreak::tracer_attached() {
            let method = MethodHandle::new(MethodInfo::instance("Foo", "bar"));
            NativeBreak.signal(&method);
        }
    }
}

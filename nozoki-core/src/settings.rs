//! エンジンの設定
//!
//! エンジンが読むだけのグローバル設定です。どのスレッドからでも
//! 実行中に変更できるようにアトミックで保持します。

use crate::signal::prepare_break_mode;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

/// ヒット時のデバッガ停止モード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebuggerBreakMode {
    /// 何もしない
    #[default]
    None,
    /// アタッチされているネイティブデバッガを停止させる
    DebuggerBreak,
    /// マーカー panic を投げてその場で捕まえる
    ThrowCatch,
}

impl DebuggerBreakMode {
    fn to_u8(self) -> u8 {
        match self {
            DebuggerBreakMode::None => 0,
            DebuggerBreakMode::DebuggerBreak => 1,
            DebuggerBreakMode::ThrowCatch => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => DebuggerBreakMode::DebuggerBreak,
            2 => DebuggerBreakMode::ThrowCatch,
            _ => DebuggerBreakMode::None,
        }
    }
}

impl fmt::Display for DebuggerBreakMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DebuggerBreakMode::None => "none",
            DebuggerBreakMode::DebuggerBreak => "break",
            DebuggerBreakMode::ThrowCatch => "throw",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for DebuggerBreakMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(DebuggerBreakMode::None),
            "break" | "native" | "debugger" => Ok(DebuggerBreakMode::DebuggerBreak),
            "throw" | "throw-catch" | "throwcatch" => Ok(DebuggerBreakMode::ThrowCatch),
            other => Err(anyhow::anyhow!(
                "Invalid break mode '{}' (expected none, break or throw)",
                other
            )),
        }
    }
}

/// 設定の初期値
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsConfig {
    pub enabled: bool,
    pub break_mode: DebuggerBreakMode,
    /// コールトレースに含める最大フレーム数
    pub trace_depth: usize,
    /// レンダリング済みトレースにネイティブバックトレースを付けるか
    pub native_backtrace: bool,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            break_mode: DebuggerBreakMode::None,
            trace_depth: 32,
            native_backtrace: false,
        }
    }
}

/// 実行中に変更できる設定
#[derive(Debug)]
pub struct Settings {
    enabled: AtomicBool,
    break_mode: AtomicU8,
    trace_depth: AtomicUsize,
    native_backtrace: AtomicBool,
}

impl Settings {
    pub fn new(config: SettingsConfig) -> Self {
        prepare_break_mode(config.break_mode);
        Self {
            enabled: AtomicBool::new(config.enabled),
            break_mode: AtomicU8::new(config.break_mode.to_u8()),
            trace_depth: AtomicUsize::new(config.trace_depth),
            native_backtrace: AtomicBool::new(config.native_backtrace),
        }
    }

    /// 捕捉が有効かどうか
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn break_mode(&self) -> DebuggerBreakMode {
        DebuggerBreakMode::from_u8(self.break_mode.load(Ordering::Relaxed))
    }

    /// 停止モードを変更する（デバッガの有無の確認などの準備もここで行う）
    pub fn set_break_mode(&self, mode: DebuggerBreakMode) {
        prepare_break_mode(mode);
        self.break_mode.store(mode.to_u8(), Ordering::Relaxed);
    }

    pub fn trace_depth(&self) -> usize {
        self.trace_depth.load(Ordering::Relaxed)
    }

    pub fn set_trace_depth(&self, depth: usize) {
        self.trace_depth.store(depth, Ordering::Relaxed);
    }

    pub fn native_backtrace(&self) -> bool {
        self.native_backtrace.load(Ordering::Relaxed)
    }

    pub fn set_native_backtrace(&self, on: bool) {
        self.native_backtrace.store(on, Ordering::Relaxed);
    }

    /// 現在の値を取得する
    pub fn snapshot(&self) -> SettingsConfig {
        SettingsConfig {
            enabled: self.is_enabled(),
            break_mode: self.break_mode(),
            trace_depth: self.trace_depth(),
            native_backtrace: self.native_backtrace(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(SettingsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(settings.is_enabled());
        assert_eq!(settings.break_mode(), DebuggerBreakMode::None);
    }

    #[test]
    fn test_parse_break_mode() {
        assert_eq!("none".parse::<DebuggerBreakMode>().unwrap(), DebuggerBreakMode::None);
        assert_eq!(
            "native".parse::<DebuggerBreakMode>().unwrap(),
            DebuggerBreakMode::DebuggerBreak
        );
        assert_eq!(
            "Throw".parse::<DebuggerBreakMode>().unwrap(),
            DebuggerBreakMode::ThrowCatch
        );
        assert!("sometimes".parse::<DebuggerBreakMode>().is_err());
    }

    #[test]
    fn test_runtime_changes() {
        let settings = Settings::default();
        settings.set_enabled(false);
        settings.set_break_mode(DebuggerBreakMode::ThrowCatch);
        settings.set_trace_depth(4);

        let snap = settings.snapshot();
        assert!(!snap.enabled);
        assert_eq!(snap.break_mode, DebuggerBreakMode::ThrowCatch);
        assert_eq!(snap.trace_depth, 4);
    }
}

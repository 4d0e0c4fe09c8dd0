//! コールトレースの捕捉

use nozoki_target::{frames, ActiveFrame, MethodHandle, ObjectId};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// 捕捉機構自身とアンワインド処理のフレーム（ネイティブトレースから除く）
const MACHINERY_PREFIXES: &[&str] = &[
    "std::backtrace",
    "nozoki_core::",
    "nozoki_target::",
    "std::panicking::",
    "std::panic::catch_unwind",
    "core::panic::unwind_safe::",
    "<core::panic::unwind_safe::",
    "__rust_try",
];

/// トレースの1フレーム
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub method: MethodHandle,
    pub instance: Option<ObjectId>,
}

impl From<ActiveFrame> for TraceFrame {
    fn from(frame: ActiveFrame) -> Self {
        Self {
            method: frame.method,
            instance: frame.instance,
        }
    }
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {}", self.method)?;
        if let Some(id) = self.instance {
            write!(f, " [this {}]", id)?;
        }
        Ok(())
    }
}

/// 捕捉したコールスタック
///
/// 構造化されたフレームと、表示・コピー用にレンダリング済みの文字列の両方を持ちます。
#[derive(Debug, Clone)]
pub struct CallTrace {
    frames: Vec<TraceFrame>,
    rendered: String,
}

impl CallTrace {
    /// 現在のスレッドのコールスタックを捕捉する
    pub fn capture(depth: usize, include_native: bool) -> Self {
        let frames = frames::snapshot(depth)
            .into_iter()
            .map(TraceFrame::from)
            .collect();
        let native = include_native
            .then(|| filter_native(&std::backtrace::Backtrace::force_capture().to_string()));
        Self::from_frames(frames, native)
    }

    /// フレームからトレースを組み立てる
    pub fn from_frames(frames: Vec<TraceFrame>, native: Option<String>) -> Self {
        let mut rendered = frames
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        if let Some(native) = native.filter(|n| !n.is_empty()) {
            rendered.push_str("\n--- native ---\n");
            rendered.push_str(&native);
        }
        Self { frames, rendered }
    }

    /// 構造化されたフレーム（内側が先頭）
    pub fn frames(&self) -> &[TraceFrame] {
        &self.frames
    }

    /// レンダリング済みの文字列
    pub fn rendered(&self) -> &str {
        &self.rendered
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

impl fmt::Display for CallTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rendered)
    }
}

fn frame_header() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\d+:\s+(.+)$").ok())
        .as_ref()
}

/// ネイティブバックトレースから捕捉機構のフレームを除き、番号を振り直す
pub fn filter_native(backtrace: &str) -> String {
    let Some(header) = frame_header() else {
        return backtrace.to_string();
    };
    let mut out = Vec::new();
    let mut keep = false;
    let mut index = 0usize;

    for line in backtrace.lines() {
        if let Some(caps) = header.captures(line) {
            let symbol = caps[1].trim();
            keep = !MACHINERY_PREFIXES.iter().any(|p| symbol.starts_with(p));
            if keep {
                out.push(format!("{:>4}: {}", index, symbol));
                index += 1;
            }
        } else if keep && !line.trim().is_empty() {
            // `at file:line` 行は直前のフレームに従う
            out.push(line.to_string());
        }
    }

    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use nozoki_target::MethodInfo;

    #[test]
    fn test_filter_native() {
        let raw = "\
   0: std::backtrace_rs::backtrace::libunwind::trace
             at /rustc/library/std/src/backtrace.rs:116:5
   1: nozoki_core::trace::CallTrace::capture
             at ./src/trace.rs:60:9
   2: demo::Counter::add::{{closure}}
             at ./src/demo.rs:40:13
   3: nozoki_target::method::MethodHandle::invoke
   4: demo::worker
             at ./src/demo.rs:90:5";

        let filtered = filter_native(raw);
        let lines: Vec<&str> = filtered.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "   0: demo::Counter::add::{{closure}}");
        assert!(lines[1].contains("demo.rs:40"));
        assert_eq!(lines[2], "   1: demo::worker");
        assert!(!filtered.contains("nozoki_"));
    }

    #[test]
    fn test_from_frames_rendering() {
        let method = MethodHandle::new(MethodInfo::instance("Foo", "bar").param("i32"));
        let trace = CallTrace::from_frames(
            vec![TraceFrame {
                method,
                instance: Some(ObjectId(0x20)),
            }],
            None,
        );
        assert_eq!(trace.depth(), 1);
        assert_eq!(trace.rendered(), "at Foo::bar(i32) [this @0x20]");
    }

    #[test]
    fn test_capture_inside_invoke() {
        let method = MethodHandle::new(MethodInfo::instance("Foo", "bar"));
        let mut captured = None;
        method.invoke(None, Vec::new, || {
            captured = Some(CallTrace::capture(8, false));
        });

        let trace = captured.expect("trace captured");
        assert_eq!(trace.frames()[0].method, method);
    }
}

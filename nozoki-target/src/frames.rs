//! シャドウコールスタック
//!
//! フックサイトを通るすべての呼び出しをスレッドごとのスタックに積みます。
//! ヒット時のコールトレースはこのスタックのスナップショットです。

use crate::method::MethodHandle;
use crate::value::ObjectId;
use std::cell::RefCell;

/// 実行中のメソッドフレーム
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveFrame {
    pub method: MethodHandle,
    pub instance: Option<ObjectId>,
}

thread_local! {
    static STACK: RefCell<Vec<ActiveFrame>> = const { RefCell::new(Vec::new()) };
}

/// フレームを積み、ドロップ時に取り除くガード
///
/// 本体が panic して巻き戻る場合もドロップで確実に取り除かれます。
pub struct FrameGuard {
    depth: usize,
}

/// フレームを積む
pub fn enter(method: MethodHandle, instance: Option<ObjectId>) -> FrameGuard {
    let depth = STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        stack.push(ActiveFrame { method, instance });
        stack.len()
    });
    FrameGuard { depth }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        // スレッド終了中はTLSが既に破棄されていることがある
        let _ = STACK.try_with(|stack| {
            stack.borrow_mut().truncate(self.depth - 1);
        });
    }
}

/// 内側から最大 `depth` 個のフレームを取得する（内側が先頭）
pub fn snapshot(depth: usize) -> Vec<ActiveFrame> {
    STACK
        .try_with(|stack| stack.borrow().iter().rev().take(depth).cloned().collect())
        .unwrap_or_default()
}

/// 現在のスレッドのスタックの深さ
pub fn current_depth() -> usize {
    STACK.try_with(|stack| stack.borrow().len()).unwrap_or(0)
}

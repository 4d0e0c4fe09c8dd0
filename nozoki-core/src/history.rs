//! 上限付きのヒット履歴（購読側）
//!
//! 捕捉のホットパスでは追加するだけで、上限までの切り詰めは
//! UI の更新時など呼び出し側の都合で `trim` を呼んで行います。

use crate::engine::Breakpoints;
use crate::hit::HitRecord;
use crate::stream::SubscriptionId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 既定の最大保持数
pub const DEFAULT_MAX_HITS: usize = 500;

/// ヒット履歴
pub struct HitHistory {
    hits: Mutex<VecDeque<Arc<HitRecord>>>,
    max_len: AtomicUsize,
}

impl HitHistory {
    pub fn new(max_len: usize) -> Self {
        Self {
            hits: Mutex::new(VecDeque::new()),
            max_len: AtomicUsize::new(max_len),
        }
    }

    /// エンジンを購読して履歴に追加し続ける
    pub fn attach_to(self: &Arc<Self>, engine: &Breakpoints) -> SubscriptionId {
        let history = Arc::clone(self);
        engine.subscribe(move |hit| history.push(hit.clone()))
    }

    /// ヒットを追加する（切り詰めない）
    pub fn push(&self, hit: Arc<HitRecord>) {
        self.hits.lock().push_back(hit);
    }

    /// 最大保持数を超えた古いヒットを捨てる
    ///
    /// 捨てた数を返します。
    pub fn trim(&self) -> usize {
        let max_len = self.max_len();
        let mut hits = self.hits.lock();
        let excess = hits.len().saturating_sub(max_len);
        hits.drain(..excess);
        excess
    }

    pub fn max_len(&self) -> usize {
        self.max_len.load(Ordering::Relaxed)
    }

    /// 最大保持数を変更する（次の `trim` で反映）
    pub fn set_max_len(&self, max_len: usize) {
        self.max_len.store(max_len, Ordering::Relaxed);
    }

    /// 捕捉時刻順に並べたスナップショット
    ///
    /// スレッドをまたぐと発行順と時刻順が一致しないため、時刻、連番の順で並べます。
    pub fn snapshot_sorted(&self) -> Vec<Arc<HitRecord>> {
        let mut hits: Vec<_> = self.hits.lock().iter().cloned().collect();
        hits.sort_by(|a, b| {
            a.timestamp()
                .cmp(&b.timestamp())
                .then(a.sequence().cmp(&b.sequence()))
        });
        hits
    }

    /// 連番でヒットを探す
    pub fn find(&self, sequence: u64) -> Option<Arc<HitRecord>> {
        self.hits
            .lock()
            .iter()
            .find(|h| h.sequence() == sequence)
            .cloned()
    }

    pub fn clear(&self) {
        self.hits.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.hits.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HitHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::CallTrace;
    use nozoki_target::{MethodHandle, MethodInfo};

    fn hit(seq: u64, method: &MethodHandle) -> Arc<HitRecord> {
        Arc::new(HitRecord::new(
            seq,
            method.clone(),
            None,
            Vec::new(),
            None,
            CallTrace::from_frames(Vec::new(), None),
        ))
    }

    #[test]
    fn test_push_does_not_trim() {
        let method = MethodHandle::new(MethodInfo::type_level("Clock", "tick"));
        let history = HitHistory::new(2);
        for seq in 1..=5 {
            history.push(hit(seq, &method));
        }
        assert_eq!(history.len(), 5);

        // 古いものから捨てる
        assert_eq!(history.trim(), 3);
        assert_eq!(history.len(), 2);
        assert!(history.find(1).is_none());
        assert!(history.find(4).is_some());
        assert_eq!(history.trim(), 0);
    }

    #[test]
    fn test_snapshot_sorted() {
        let method = MethodHandle::new(MethodInfo::type_level("Clock", "tick"));
        let history = HitHistory::new(10);
        let first = hit(1, &method);
        let second = hit(2, &method);
        history.push(second);
        history.push(first);

        let sorted = history.snapshot_sorted();
        let seqs: Vec<u64> = sorted.iter().map(|h| h.sequence()).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn test_set_max_len() {
        let method = MethodHandle::new(MethodInfo::type_level("Clock", "tick"));
        let history = HitHistory::new(10);
        for seq in 1..=4 {
            history.push(hit(seq, &method));
        }
        history.set_max_len(1);
        assert_eq!(history.trim(), 3);
        assert_eq!(history.snapshot_sorted()[0].sequence(), 4);

        history.clear();
        assert!(history.is_empty());
    }
}

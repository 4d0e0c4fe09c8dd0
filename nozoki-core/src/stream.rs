//! ヒットストリーム（購読者への同期配信）

use crate::errors::panic_message;
use crate::hit::HitRecord;
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// ヒットを受け取るハンドラ
pub type HitHandler = Arc<dyn Fn(&Arc<HitRecord>) + Send + Sync>;

/// 購読ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// ヒットストリーム
///
/// 履歴は持ちません。発行はヒットしたスレッドで同期的に行われます。
pub struct HitStream {
    subscribers: RwLock<Vec<(SubscriptionId, HitHandler)>>,
    next_id: AtomicU64,
}

impl HitStream {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// ハンドラを登録する
    pub fn subscribe(&self, handler: HitHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, handler));
        id
    }

    /// ハンドラの登録を解除する
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// すべての購読者にヒットを配信する
    ///
    /// ロックを離してからハンドラを呼びます。あるハンドラが panic しても
    /// 他のハンドラへの配信は続きます。配信できた数を返します。
    pub fn publish(&self, hit: &Arc<HitRecord>) -> usize {
        let handlers: Vec<HitHandler> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        let mut delivered = 0;
        for handler in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(hit))) {
                Ok(()) => delivered += 1,
                Err(payload) => warn!(
                    "hit subscriber panicked on #{}: {}",
                    hit.sequence(),
                    panic_message(payload.as_ref())
                ),
            }
        }
        delivered
    }
}

impl Default for HitStream {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::CallTrace;
    use nozoki_target::{MethodHandle, MethodInfo};
    use std::sync::atomic::AtomicUsize;

    fn sample_hit() -> Arc<HitRecord> {
        let method = MethodHandle::new(MethodInfo::type_level("Clock", "tick"));
        let trace = CallTrace::from_frames(Vec::new(), None);
        Arc::new(HitRecord::new(1, method, None, Vec::new(), None, trace))
    }

    #[test]
    fn test_failing_subscriber_isolated() {
        let stream = HitStream::new();
        let seen = Arc::new(AtomicUsize::new(0));

        stream.subscribe(Arc::new(|_: &Arc<HitRecord>| panic!("subscriber failure")));
        let counter = seen.clone();
        stream.subscribe(Arc::new(move |_: &Arc<HitRecord>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(stream.publish(&sample_hit()), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let stream = HitStream::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let id = stream.subscribe(Arc::new(move |_: &Arc<HitRecord>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        stream.publish(&sample_hit());
        assert!(stream.unsubscribe(id));
        assert!(!stream.unsubscribe(id));
        stream.publish(&sample_hit());

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(stream.subscriber_count(), 0);
    }
}

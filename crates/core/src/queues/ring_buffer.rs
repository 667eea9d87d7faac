use std::{
    collections::{HashMap, VecDeque},
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use tracing::warn;

use crate::events::Envelope;

pub type Listener = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Handle returned by [`RingBuffer::subscribe`]; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

/// Bounded most-recent-N view of emitted envelopes.
///
/// Pushing into a full buffer drops the oldest entry. Every push is also
/// published to the current listeners, in no particular order. A panicking
/// listener is logged and skipped; it stays subscribed.
#[derive(Clone)]
pub struct RingBuffer {
    inner: Arc<RingBufferInner>,
}

struct RingBufferInner {
    buf: Mutex<VecDeque<Envelope>>,
    capacity: usize,
    listeners: Mutex<HashMap<SubscriptionToken, Listener>>,
    next_token: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(RingBufferInner {
                buf: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                listeners: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(0),
            }),
        }
    }

    pub fn push_overwrite(&self, value: Envelope) {
        let mut buf = lock(&self.inner.buf);
        if buf.len() >= self.inner.capacity {
            let _ = buf.pop_front();
        }
        buf.push_back(value.clone());
        drop(buf);

        // Clone the list so a listener may unsubscribe from inside its callback.
        let listeners: Vec<Listener> = lock(&self.inner.listeners).values().cloned().collect();
        for listener in listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(&value))).is_err() {
                warn!("Ring buffer listener panicked");
            }
        }
    }

    /// Oldest-first copy of the retained envelopes.
    pub fn snapshot(&self) -> Vec<Envelope> {
        lock(&self.inner.buf).iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.buf).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&Envelope) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        let token = SubscriptionToken(self.inner.next_token.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.listeners).insert(token, Arc::new(listener));
        token
    }

    /// Returns false if the token was unknown or already removed.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        lock(&self.inner.listeners).remove(&token).is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use proptest::prelude::*;

    use super::*;
    use crate::{
        events::{EventData, Level},
        types::SessionId,
    };

    fn envelope(n: i64) -> Envelope {
        Envelope {
            timestamp: n,
            session_id: SessionId::new("s"),
            level: Level::Info,
            category: "Test".into(),
            message: format!("m{n}"),
            data: EventData::new(),
        }
    }

    #[test]
    fn drops_oldest_when_full() {
        let ring = RingBuffer::new(2);
        for n in 0..3 {
            ring.push_overwrite(envelope(n));
        }
        let kept: Vec<i64> = ring.snapshot().iter().map(|e| e.timestamp).collect();
        assert_eq!(kept, vec![1, 2]);
    }

    #[test]
    fn listeners_see_pushes_until_unsubscribed() {
        let ring = RingBuffer::new(4);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let token = ring.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        ring.push_overwrite(envelope(1));
        assert!(ring.unsubscribe(token));
        ring.push_overwrite(envelope(2));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!ring.unsubscribe(token));
    }

    #[test]
    fn panicking_listener_does_not_reach_the_pusher() {
        let ring = RingBuffer::new(4);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        ring.subscribe(|_| panic!("listener bug"));
        ring.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        ring.push_overwrite(envelope(1));
        ring.push_overwrite(envelope(2));

        assert_eq!(ring.len(), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    proptest! {
        #[test]
        fn retains_last_min_n_capacity_in_order(capacity in 1usize..16, n in 0i64..64) {
            let ring = RingBuffer::new(capacity);
            for i in 0..n {
                ring.push_overwrite(envelope(i));
                prop_assert!(ring.len() <= capacity);
            }
            let expected: Vec<i64> = (0..n).skip((n as usize).saturating_sub(capacity)).collect();
            let kept: Vec<i64> = ring.snapshot().iter().map(|e| e.timestamp).collect();
            prop_assert_eq!(kept, expected);
        }
    }
}

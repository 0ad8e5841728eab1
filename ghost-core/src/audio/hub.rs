//! Fan-out of canonical audio packets to every audio subscriber.
//!
//! The supervisor [`publish`](BroadcastHub::publish)es into a bounded
//! lock-free queue and then drains it with
//! [`dispatch_pending`](BroadcastHub::dispatch_pending) on its own task, so
//! each packet reaches every registered [`AudioTransport`] in production
//! order. When the queue is full the *new* packet is dropped; a subscriber
//! whose send fails or panics is removed on the spot.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::audio::normalizer::CanonicalAudioPacket;
use crate::transport::AudioTransport;

/// Default capacity of the supervisor → hub queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Identifies one subscription.
pub type SubscriberId = u64;

/// Multi-consumer, drop-on-backpressure audio distributor.
pub struct BroadcastHub {
    queue: ArrayQueue<CanonicalAudioPacket>,
    subscribers: Mutex<HashMap<SubscriberId, Box<dyn AudioTransport>>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl BroadcastHub {
    /// Create a hub whose queue holds `capacity` packets (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue a packet for delivery without blocking.
    ///
    /// Returns `false` when the queue was full and `packet` was dropped.
    pub fn publish(&self, packet: CanonicalAudioPacket) -> bool {
        match self.queue.push(packet) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Register a consumer; it receives every packet published from now on.
    pub fn subscribe(&self, transport: Box<dyn AudioTransport>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let count = {
            let mut subs = self.subscribers.lock();
            subs.insert(id, transport);
            subs.len()
        };
        info!(subscriber = id, total = count, "audio subscriber added");
        id
    }

    /// Remove a consumer. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let removed = self.subscribers.lock().remove(&id).is_some();
        if removed {
            info!(subscriber = id, "audio subscriber removed");
        }
    }

    /// Deliver everything currently queued. Returns the number of packets
    /// taken off the queue.
    pub fn dispatch_pending(&self) -> usize {
        let mut delivered = 0;
        while let Some(packet) = self.queue.pop() {
            self.deliver(&packet);
            delivered += 1;
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Packets dropped because the queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Packets waiting for dispatch.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn deliver(&self, packet: &CanonicalAudioPacket) {
        let mut subs = self.subscribers.lock();
        subs.retain(|id, transport| {
            match panic::catch_unwind(AssertUnwindSafe(|| transport.send(packet))) {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    info!(subscriber = *id, "audio subscriber removed: {e}");
                    false
                }
                Err(_) => {
                    warn!(subscriber = *id, "audio subscriber removed: transport panicked");
                    false
                }
            }
        });
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::normalizer::{AudioNormalizer, RawAudioBlock};
    use crate::audio::format::AudioFormatDescriptor;
    use crate::error::SendError;
    use std::sync::Arc;

    fn packet(tag: i16) -> CanonicalAudioPacket {
        let block = RawAudioBlock {
            bytes: [tag, tag].iter().flat_map(|s| s.to_le_bytes()).collect(),
            format: AudioFormatDescriptor::new(48_000, 2, 16, false).unwrap(),
        };
        AudioNormalizer::new().normalize(&block).unwrap()
    }

    /// Records packets; fails every send once `fail` is set.
    struct Recorder {
        got: Arc<Mutex<Vec<CanonicalAudioPacket>>>,
        fail: bool,
    }

    impl AudioTransport for Recorder {
        fn send(&self, packet: &CanonicalAudioPacket) -> Result<(), SendError> {
            if self.fail {
                return Err(SendError::Fatal("socket closed".into()));
            }
            self.got.lock().push(packet.clone());
            Ok(())
        }
    }

    fn recorder(fail: bool) -> (Box<dyn AudioTransport>, Arc<Mutex<Vec<CanonicalAudioPacket>>>) {
        let got = Arc::new(Mutex::new(Vec::new()));
        (
            Box::new(Recorder {
                got: Arc::clone(&got),
                fail,
            }),
            got,
        )
    }

    #[test]
    fn full_queue_drops_newest() {
        let hub = BroadcastHub::new(2);
        assert!(hub.publish(packet(1)));
        assert!(hub.publish(packet(2)));
        assert!(!hub.publish(packet(3)));
        assert_eq!(hub.dropped_count(), 1);

        let (sub, got) = recorder(false);
        hub.subscribe(sub);
        assert_eq!(hub.dispatch_pending(), 2);
        let got = got.lock();
        assert_eq!(got[0], packet(1));
        assert_eq!(got[1], packet(2));
    }

    #[test]
    fn every_subscriber_gets_every_packet_in_order() {
        let hub = BroadcastHub::default();
        let (a, got_a) = recorder(false);
        let (b, got_b) = recorder(false);
        hub.subscribe(a);
        hub.subscribe(b);

        for i in 0..10 {
            hub.publish(packet(i * 100));
        }
        hub.dispatch_pending();

        let expected: Vec<_> = (0..10).map(|i| packet(i * 100)).collect();
        assert_eq!(*got_a.lock(), expected);
        assert_eq!(*got_b.lock(), expected);
    }

    #[test]
    fn failing_subscriber_is_removed() {
        let hub = BroadcastHub::default();
        let (good, got) = recorder(false);
        let (bad, _) = recorder(true);
        hub.subscribe(good);
        hub.subscribe(bad);
        assert_eq!(hub.subscriber_count(), 2);

        hub.publish(packet(5));
        hub.dispatch_pending();
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(got.lock().len(), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let hub = BroadcastHub::default();
        let (sub, got) = recorder(false);
        let id = hub.subscribe(sub);
        hub.unsubscribe(id);
        hub.unsubscribe(id);

        hub.publish(packet(1));
        hub.dispatch_pending();
        assert!(got.lock().is_empty());
        assert_eq!(hub.subscriber_count(), 0);
    }

    struct Exploding;

    impl AudioTransport for Exploding {
        fn send(&self, _packet: &CanonicalAudioPacket) -> Result<(), SendError> {
            panic!("listener bug");
        }
    }

    #[test]
    fn panicking_subscriber_is_removed() {
        let hub = BroadcastHub::default();
        let (good, got) = recorder(false);
        hub.subscribe(Box::new(Exploding));
        hub.subscribe(good);

        hub.publish(packet(1));
        hub.publish(packet(2));
        assert_eq!(hub.dispatch_pending(), 2);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(got.lock().len(), 2);
        assert_eq!(hub.queued(), 0);
    }
}

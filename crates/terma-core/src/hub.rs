use std::sync::Mutex;
use tokio::sync::broadcast;

/// Maximum size of the retained output backlog, truncated from the front.
pub const BACKLOG_LIMIT: usize = 50_000;

/// Broadcast channel depth per session. A receiver that falls further behind
/// than this skips the missed chunks (`RecvError::Lagged`).
const CHANNEL_CAPACITY: usize = 256;

/// Per-session fan-out of PTY output to a dynamic subscriber set.
///
/// The hub retains a rolling backlog of recent output so a freshly attached
/// subscriber can be primed with what it missed. Publishing never blocks on
/// subscribers; a slow subscriber loses chunks rather than stalling the pump.
pub struct OutputHub {
    backlog: Mutex<Vec<u8>>,
    tx: broadcast::Sender<Vec<u8>>,
}

/// Handle returned by [`OutputHub::subscribe`]. `backlog` holds every byte
/// published before the subscription attached (capped at [`BACKLOG_LIMIT`]);
/// `rx` yields every chunk published after. Dropping the handle
/// unsubscribes.
pub struct OutputSubscription {
    pub backlog: Vec<u8>,
    pub rx: broadcast::Receiver<Vec<u8>>,
}

impl OutputHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            backlog: Mutex::new(Vec::new()),
            tx,
        }
    }

    /// Append a chunk to the backlog and deliver it to all live subscribers.
    ///
    /// The broadcast send happens under the backlog lock so that
    /// [`subscribe`](Self::subscribe) observes each chunk exactly once:
    /// either in its backlog snapshot or on its receiver, never both.
    pub fn publish(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut backlog = self.backlog.lock().unwrap();
        backlog.extend_from_slice(data);
        if backlog.len() > BACKLOG_LIMIT {
            let excess = backlog.len() - BACKLOG_LIMIT;
            backlog.drain(..excess);
        }
        // Errors only mean there are currently no subscribers.
        let _ = self.tx.send(data.to_vec());
    }

    /// Attach a subscriber, returning the current backlog and a live receiver.
    pub fn subscribe(&self) -> OutputSubscription {
        let backlog = self.backlog.lock().unwrap();
        OutputSubscription {
            backlog: backlog.clone(),
            rx: self.tx.subscribe(),
        }
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().unwrap().len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for OutputHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_chunks_in_publish_order() {
        let hub = OutputHub::new();
        let mut sub = hub.subscribe();

        hub.publish(b"one");
        hub.publish(b"two");

        assert_eq!(sub.rx.recv().await.unwrap(), b"one");
        assert_eq!(sub.rx.recv().await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn backlog_primes_new_subscriber() {
        let hub = OutputHub::new();
        hub.publish(b"hello ");
        hub.publish(b"world");

        let sub = hub.subscribe();
        assert_eq!(sub.backlog, b"hello world");

        // Chunks published before the subscription never reach the receiver.
        hub.publish(b"!");
        let mut sub = sub;
        assert_eq!(sub.rx.recv().await.unwrap(), b"!");
    }

    #[test]
    fn backlog_truncates_from_the_front() {
        let hub = OutputHub::new();
        for _ in 0..6 {
            hub.publish(&[b'A'; 10_000]);
        }
        hub.publish(b"tail");

        let sub = hub.subscribe();
        assert_eq!(sub.backlog.len(), BACKLOG_LIMIT);
        assert!(sub.backlog.ends_with(b"tail"));
        assert_eq!(sub.backlog[0], b'A');
    }

    #[test]
    fn empty_publish_is_a_noop() {
        let hub = OutputHub::new();
        hub.publish(b"");
        assert_eq!(hub.backlog_len(), 0);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let hub = OutputHub::new();
        let sub = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
        // Publishing with no subscribers still fills the backlog.
        hub.publish(b"data");
        assert_eq!(hub.backlog_len(), 4);
    }
}

//! Notification bus linking the indexer to downstream consumers.
//!
//! Delivery is best-effort over a bounded buffer: the store remains the
//! source of truth, notices are only a latency hint. A lagged subscriber
//! loses the oldest notices and the loss is counted for `/health`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use tokio::sync::broadcast;

/// Bounded buffer size per subscriber.
pub const NOTICE_BUFFER: usize = 256;

/// Emitted for each newly inserted `LoanCreated` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanCreatedNotice {
    pub loan_id: U256,
    pub token_address: Address,
    pub collateral_address: Address,
}

/// Publish side of the bus. Cheap to clone; all clones share one channel and
/// one drop counter.
#[derive(Clone)]
pub struct NoticeBus {
    tx: broadcast::Sender<LoanCreatedNotice>,
    dropped: Arc<AtomicU64>,
}

impl NoticeBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Non-blocking publish. Having no subscribers is not an error.
    pub fn publish(&self, notice: LoanCreatedNotice) {
        let _ = self.tx.send(notice);
    }

    pub fn subscribe(&self) -> NoticeStream {
        NoticeStream {
            rx: self.tx.subscribe(),
            dropped: self.dropped.clone(),
        }
    }

    /// Total notices dropped across all subscribers due to overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for NoticeBus {
    fn default() -> Self {
        Self::new(NOTICE_BUFFER)
    }
}

/// Subscriber side. Consumers must not assume delivery.
pub struct NoticeStream {
    rx: broadcast::Receiver<LoanCreatedNotice>,
    dropped: Arc<AtomicU64>,
}

impl NoticeStream {
    /// Next notice, or `None` once the bus is closed. Overflow is absorbed
    /// here: lagging skips ahead and counts the lost notices.
    pub async fn recv(&mut self) -> Option<LoanCreatedNotice> {
        loop {
            match self.rx.recv().await {
                Ok(notice) => return Some(notice),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped.fetch_add(n, Ordering::Relaxed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(tag: u8) -> LoanCreatedNotice {
        LoanCreatedNotice {
            loan_id: U256::from(tag),
            token_address: Address::repeat_byte(tag),
            collateral_address: Address::repeat_byte(0xf2),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = NoticeBus::new(8);
        let mut stream = bus.subscribe();

        bus.publish(notice(1));
        bus.publish(notice(2));

        assert_eq!(stream.recv().await.unwrap().loan_id, U256::from(1u64));
        assert_eq!(stream.recv().await.unwrap().loan_id, U256::from(2u64));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let bus = NoticeBus::new(8);
        bus.publish(notice(1));
        assert_eq!(bus.dropped(), 0);
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest_and_counts() {
        let bus = NoticeBus::new(2);
        let mut stream = bus.subscribe();

        for tag in 1..=5u8 {
            bus.publish(notice(tag));
        }

        // The two newest survive; the three oldest were dropped.
        assert_eq!(stream.recv().await.unwrap().loan_id, U256::from(4u64));
        assert_eq!(stream.recv().await.unwrap().loan_id, U256::from(5u64));
        assert_eq!(bus.dropped(), 3);
    }
}

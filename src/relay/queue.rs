//! Per-destination bounded queues.
//!
//! One bounded mpsc channel per destination. Producers (SMTP sessions) hold a
//! cloneable [`QueueSet`]; the single consumer owns the [`QueueDrain`].

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use uuid::Uuid;

use crate::error::QueueError;
use crate::mail::DecodedMessage;
use crate::routing::DestinationId;

/// Default number of items buffered per destination.
pub const DEFAULT_QUEUE_CAPACITY: usize = 500;

/// One accepted message waiting for delivery.
#[derive(Debug, Clone)]
pub struct QueueItem {
    /// Log correlation id.
    pub id: Uuid,
    /// Canonical sender address.
    pub from: String,
    pub is_pinned: bool,
    /// Envelope recipients as received, kept for the fallback relay.
    pub recipients: Vec<String>,
    pub message: DecodedMessage,
    /// Unmodified message bytes, kept for the fallback relay.
    pub raw: Vec<u8>,
}

/// Producer side: enqueue into any destination's queue.
#[derive(Clone)]
pub struct QueueSet {
    senders: Arc<BTreeMap<DestinationId, mpsc::Sender<QueueItem>>>,
}

/// Consumer side: non-blocking dequeue in stable destination order.
pub struct QueueDrain {
    receivers: Vec<(DestinationId, mpsc::Receiver<QueueItem>)>,
}

/// Create one queue of `capacity` items per destination.
///
/// Destinations are drained in ascending id order.
pub fn per_destination<I>(destinations: I, capacity: usize) -> (QueueSet, QueueDrain)
where
    I: IntoIterator<Item = DestinationId>,
{
    let mut senders = BTreeMap::new();
    let mut receivers = BTreeMap::new();

    for id in destinations {
        if senders.contains_key(&id) {
            continue;
        }
        let (tx, rx) = mpsc::channel(capacity.max(1));
        senders.insert(id, tx);
        receivers.insert(id, rx);
    }

    (
        QueueSet {
            senders: Arc::new(senders),
        },
        QueueDrain {
            receivers: receivers.into_iter().collect(),
        },
    )
}

impl QueueSet {
    /// Enqueue an item, waiting while the destination's queue is full.
    pub async fn enqueue(&self, destination: DestinationId, item: QueueItem) -> Result<(), QueueError> {
        let tx = self
            .senders
            .get(&destination)
            .ok_or(QueueError::UnknownDestination(destination))?;

        tx.send(item)
            .await
            .map_err(|_| QueueError::Closed(destination))
    }
}

impl QueueDrain {
    /// Number of destination queues.
    pub fn len(&self) -> usize {
        self.receivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }

    /// Take the head of the `index`-th queue without waiting.
    pub fn try_dequeue(&mut self, index: usize) -> Option<(DestinationId, QueueItem)> {
        let (id, rx) = self.receivers.get_mut(index)?;
        match rx.try_recv() {
            Ok(item) => Some((*id, item)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                tracing::debug!(destination = %id, "Queue has no producers left");
                None
            }
        }
    }

    /// Items still buffered across all queues.
    pub fn pending(&self) -> usize {
        self.receivers.iter().map(|(_, rx)| rx.len()).sum()
    }

    /// Destinations in drain order.
    pub fn destinations(&self) -> impl Iterator<Item = DestinationId> + '_ {
        self.receivers.iter().map(|(id, _)| *id)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn item(n: usize) -> QueueItem {
        QueueItem {
            id: Uuid::new_v4(),
            from: format!("sender{n}@x.com"),
            is_pinned: false,
            recipients: vec!["r@y.com".into()],
            message: DecodedMessage::default(),
            raw: Vec::new(),
        }
    }

    #[test]
    fn drain_order_is_ascending_and_deduplicated() {
        let (_set, drain) = per_destination(
            [DestinationId(999), DestinationId(-5), DestinationId(111), DestinationId(999)],
            4,
        );
        let ids: Vec<_> = drain.destinations().collect();
        assert_eq!(ids, vec![DestinationId(-5), DestinationId(111), DestinationId(999)]);
    }

    #[tokio::test]
    async fn fifo_per_destination() {
        let (set, mut drain) = per_destination([DestinationId(1)], 4);
        for n in 0..3 {
            set.enqueue(DestinationId(1), item(n)).await.unwrap();
        }
        assert_eq!(drain.pending(), 3);
        for n in 0..3 {
            let (_, got) = drain.try_dequeue(0).unwrap();
            assert_eq!(got.from, format!("sender{n}@x.com"));
        }
        assert!(drain.try_dequeue(0).is_none());
        assert_eq!(drain.pending(), 0);
    }

    #[tokio::test]
    async fn unknown_destination_is_an_error() {
        let (set, _drain) = per_destination([DestinationId(1)], 4);
        let err = set.enqueue(DestinationId(2), item(0)).await.unwrap_err();
        assert!(matches!(err, QueueError::UnknownDestination(DestinationId(2))));
    }

    #[tokio::test]
    async fn full_queue_blocks_until_dequeued() {
        const CAPACITY: usize = 3;
        let (set, mut drain) = per_destination([DestinationId(7)], CAPACITY);

        for n in 0..CAPACITY {
            tokio::time::timeout(Duration::from_millis(100), set.enqueue(DestinationId(7), item(n)))
                .await
                .expect("enqueue within capacity must not wait")
                .unwrap();
        }

        let blocked = {
            let set = set.clone();
            tokio::spawn(async move { set.enqueue(DestinationId(7), item(CAPACITY)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished(), "enqueue beyond capacity must wait");
        assert_eq!(drain.pending(), CAPACITY);

        drain.try_dequeue(0).unwrap();
        tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("enqueue resumes once capacity frees up")
            .unwrap()
            .unwrap();
        assert_eq!(drain.pending(), CAPACITY);
    }
}

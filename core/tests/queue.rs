use bytes::Bytes;
use voxpipe_core::{transfer_queue, QueueClosed, StreamItem};

#[tokio::test]
async fn chunks_arrive_in_push_order() {
    let (tx, mut rx) = transfer_queue(4);
    let producer = tokio::spawn(async move {
        for i in 0..32u8 {
            tx.push(Bytes::from(vec![i; 3])).await.unwrap();
        }
        tx.finish().await;
    });

    let mut seen = Vec::new();
    while let Some(chunk) = rx.pop().await {
        seen.push(chunk[0]);
    }
    producer.await.unwrap();
    assert_eq!(seen, (0..32u8).collect::<Vec<_>>());
    assert!(rx.is_ended());
}

#[tokio::test]
async fn finish_is_idempotent_across_clones() {
    let (tx, mut rx) = transfer_queue(0);
    let other = tx.clone();
    tx.push(Bytes::from_static(b"abc")).await.unwrap();

    assert!(tx.finish().await);
    assert!(!other.finish().await);
    assert!(!tx.finish().await);
    drop((tx, other));

    assert_eq!(rx.pop().await, Some(Bytes::from_static(b"abc")));
    assert_eq!(rx.pop().await, None);
    // Stays ended; a second marker is never observed
    assert_eq!(rx.pop().await, None);
}

#[tokio::test]
async fn push_after_finish_is_rejected() {
    let (tx, _rx) = transfer_queue(2);
    tx.finish().await;
    let err = tx.push(Bytes::from_static(b"late")).await.unwrap_err();
    assert_eq!(err, QueueClosed);
    assert_eq!(err.to_string(), "transfer queue closed");
    let source: &dyn std::error::Error = &err;
    assert!(source.source().is_none());
}

#[tokio::test]
async fn empty_chunks_are_not_enqueued() {
    let (tx, mut rx) = transfer_queue(0);
    tx.push(Bytes::new()).await.unwrap();
    tx.push(Bytes::from_static(b"x")).await.unwrap();
    tx.finish().await;
    assert_eq!(rx.pop().await, Some(Bytes::from_static(b"x")));
    assert_eq!(rx.pop().await, None);
}

#[tokio::test]
async fn push_fails_once_consumer_is_gone() {
    let (tx, rx) = transfer_queue(1);
    drop(rx);
    assert!(tx.is_closed());
    assert!(tx.push(Bytes::from_static(b"x")).await.is_err());
    // Finishing a closed queue still succeeds as far as the producer cares
    assert!(tx.finish().await);
}

#[tokio::test]
async fn bounded_queue_applies_backpressure() {
    let (tx, mut rx) = transfer_queue(1);
    tx.push(Bytes::from_static(b"a")).await.unwrap();

    let blocked = tokio::time::timeout(
        std::time::Duration::from_millis(50),
        tx.push(Bytes::from_static(b"b")),
    )
    .await;
    assert!(blocked.is_err(), "second push should wait for capacity");

    assert_eq!(rx.pop().await, Some(Bytes::from_static(b"a")));
    tx.push(Bytes::from_static(b"c")).await.unwrap();
    assert_eq!(rx.pop().await, Some(Bytes::from_static(b"c")));
}

#[test]
fn stream_item_marker_is_distinct_from_chunks() {
    assert_ne!(StreamItem::End, StreamItem::Chunk(Bytes::new()));
}

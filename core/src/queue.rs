//! Transfer queue between the fetcher and the playback stage.
//!
//! Single producer, single consumer. The producer pushes chunks in arrival
//! order and finishes the stream with exactly one [`StreamItem::End`]; the
//! consumer pops until it sees the marker (or the channel closes) and then
//! reports end-of-stream forever after.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Item carried by the transfer queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Chunk(Bytes),
    End,
}

enum Tx {
    Bounded(mpsc::Sender<StreamItem>),
    Unbounded(mpsc::UnboundedSender<StreamItem>),
}

enum Rx {
    Bounded(mpsc::Receiver<StreamItem>),
    Unbounded(mpsc::UnboundedReceiver<StreamItem>),
}

/// Producer half. Cloning shares the "finished" flag so the marker is sent
/// at most once across all clones.
#[derive(Clone)]
pub struct ChunkSender {
    tx: Arc<Tx>,
    finished: Arc<AtomicBool>,
}

/// Consumer half.
pub struct ChunkReceiver {
    rx: Rx,
    ended: bool,
}

/// Create a transfer queue. `capacity == 0` means unbounded.
pub fn transfer_queue(capacity: usize) -> (ChunkSender, ChunkReceiver) {
    let (tx, rx) = if capacity == 0 {
        let (tx, rx) = mpsc::unbounded_channel();
        (Tx::Unbounded(tx), Rx::Unbounded(rx))
    } else {
        let (tx, rx) = mpsc::channel(capacity);
        (Tx::Bounded(tx), Rx::Bounded(rx))
    };
    (
        ChunkSender {
            tx: Arc::new(tx),
            finished: Arc::new(AtomicBool::new(false)),
        },
        ChunkReceiver { rx, ended: false },
    )
}

/// The consumer has gone away; nothing further can be delivered.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transfer queue closed")]
pub struct QueueClosed;

impl ChunkSender {
    /// Push one chunk, waiting for capacity when the queue is bounded.
    /// Empty chunks are not enqueued.
    pub async fn push(&self, chunk: Bytes) -> Result<(), QueueClosed> {
        if chunk.is_empty() {
            return Ok(());
        }
        if self.is_finished() {
            return Err(QueueClosed);
        }
        self.send(StreamItem::Chunk(chunk)).await
    }

    /// Blocking variant of [`push`](Self::push) for producers running on a
    /// plain thread. Must not be called from inside an async context.
    pub fn blocking_push(&self, chunk: Bytes) -> Result<(), QueueClosed> {
        if chunk.is_empty() {
            return Ok(());
        }
        if self.is_finished() {
            return Err(QueueClosed);
        }
        match self.tx.as_ref() {
            Tx::Bounded(tx) => tx.blocking_send(StreamItem::Chunk(chunk)).map_err(|_| QueueClosed),
            Tx::Unbounded(tx) => tx.send(StreamItem::Chunk(chunk)).map_err(|_| QueueClosed),
        }
    }

    /// Send the end-of-stream marker. Only the first call on any clone sends
    /// it; later calls are no-ops and return `false`.
    pub async fn finish(&self) -> bool {
        if self.finished.swap(true, Ordering::AcqRel) {
            return false;
        }
        // A dropped receiver already counts as end-of-stream for the consumer.
        let _ = self.send(StreamItem::End).await;
        true
    }

    /// Blocking variant of [`finish`](Self::finish).
    pub fn blocking_finish(&self) -> bool {
        if self.finished.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = match self.tx.as_ref() {
            Tx::Bounded(tx) => tx.blocking_send(StreamItem::End).map_err(|_| QueueClosed),
            Tx::Unbounded(tx) => tx.send(StreamItem::End).map_err(|_| QueueClosed),
        };
        true
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// True once the consumer dropped its half.
    pub fn is_closed(&self) -> bool {
        match self.tx.as_ref() {
            Tx::Bounded(tx) => tx.is_closed(),
            Tx::Unbounded(tx) => tx.is_closed(),
        }
    }

    async fn send(&self, item: StreamItem) -> Result<(), QueueClosed> {
        match self.tx.as_ref() {
            Tx::Bounded(tx) => tx.send(item).await.map_err(|_| QueueClosed),
            Tx::Unbounded(tx) => tx.send(item).map_err(|_| QueueClosed),
        }
    }
}

impl ChunkReceiver {
    /// Block the current thread until the next chunk arrives. Returns `None`
    /// once the marker was observed or every sender is gone.
    pub fn blocking_pop(&mut self) -> Option<Bytes> {
        if self.ended {
            return None;
        }
        let item = match &mut self.rx {
            Rx::Bounded(rx) => rx.blocking_recv(),
            Rx::Unbounded(rx) => rx.blocking_recv(),
        };
        self.observe(item)
    }

    /// Async variant of [`blocking_pop`](Self::blocking_pop).
    pub async fn pop(&mut self) -> Option<Bytes> {
        if self.ended {
            return None;
        }
        let item = match &mut self.rx {
            Rx::Bounded(rx) => rx.recv().await,
            Rx::Unbounded(rx) => rx.recv().await,
        };
        self.observe(item)
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    fn observe(&mut self, item: Option<StreamItem>) -> Option<Bytes> {
        match item {
            Some(StreamItem::Chunk(chunk)) => Some(chunk),
            Some(StreamItem::End) | None => {
                self.ended = true;
                None
            }
        }
    }
}

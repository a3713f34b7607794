//! Reply channel between device backends and the request decoder
//!
//! Transfers may finish on a backend worker thread. Each completed transfer
//! command posts exactly one [`TransferReply`]; the decoder drains them from
//! either a Tokio task or a plain thread.

use async_channel::{Receiver, Sender, TryRecvError, unbounded};
use protocol::RequestHandle;

/// Outcome of one transfer command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReply {
    /// Guest request the transfer originated from
    pub request: RequestHandle,
    /// Bytes transferred (non-negative) or a negative error code
    pub status: i32,
}

/// Sending half, cloned into every transfer command
#[derive(Debug, Clone)]
pub struct ReplySender {
    tx: Sender<TransferReply>,
}

impl ReplySender {
    /// Post a reply without blocking
    ///
    /// The channel is unbounded so completions are never held up by a slow
    /// decoder; this only fails once the receiver is gone.
    pub fn send(&self, reply: TransferReply) -> crate::Result<()> {
        self.tx
            .try_send(reply)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half, owned by the request decoder
#[derive(Debug, Clone)]
pub struct ReplyReceiver {
    rx: Receiver<TransferReply>,
}

impl ReplyReceiver {
    /// Wait for the next reply (async)
    pub async fn recv(&self) -> crate::Result<TransferReply> {
        self.rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Wait for the next reply (blocking)
    pub fn recv_blocking(&self) -> crate::Result<TransferReply> {
        self.rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Take a reply if one is ready
    pub fn try_recv(&self) -> Option<TransferReply> {
        match self.rx.try_recv() {
            Ok(reply) => Some(reply),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }

    /// Take every reply that is ready
    pub fn drain(&self) -> Vec<TransferReply> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Create the reply channel
///
/// Returns (ReplySender for transfer commands, ReplyReceiver for the decoder)
pub fn create_reply_channel() -> (ReplySender, ReplyReceiver) {
    let (tx, rx) = unbounded();
    (ReplySender { tx }, ReplyReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reply_crosses_threads() {
        let (sender, receiver) = create_reply_channel();

        let handle = std::thread::spawn(move || {
            sender
                .send(TransferReply {
                    request: RequestHandle(0x1000),
                    status: 8,
                })
                .unwrap();
        });

        let reply = receiver.recv().await.unwrap();
        assert_eq!(reply.request, RequestHandle(0x1000));
        assert_eq!(reply.status, 8);
        handle.join().unwrap();
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (sender, receiver) = create_reply_channel();
        drop(receiver);

        assert!(sender.is_closed());
        let result = sender.send(TransferReply {
            request: RequestHandle(1),
            status: 0,
        });
        assert!(matches!(result, Err(crate::Error::Channel(_))));
    }

    #[test]
    fn test_drain_preserves_order() {
        let (sender, receiver) = create_reply_channel();
        for i in 0..3 {
            sender
                .send(TransferReply {
                    request: RequestHandle(i),
                    status: i as i32,
                })
                .unwrap();
        }

        assert_eq!(receiver.len(), 3);
        let replies = receiver.drain();
        let requests: Vec<u32> = replies.iter().map(|r| r.request.0).collect();
        assert_eq!(requests, vec![0, 1, 2]);
        assert!(receiver.is_empty());
    }
}

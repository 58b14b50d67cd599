//! Outbound payload fragmentation
//!
//! Splits application payloads into transfer-unit-sized chunks and pushes
//! them through the transport's notify primitive with a fixed pacing delay.
//! Chunks carry no sequencing metadata; reassembly relies on the link's
//! in-order delivery within one connection. Delivery is at-most-once per
//! call: any chunk failure aborts the remainder and the caller re-issues
//! the complete payload.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::types::ChannelId;

/// Per-notification protocol overhead subtracted from the transfer unit
pub const NOTIFY_OVERHEAD: usize = 3;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors surfaced by `FragmentTransport::send`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Link down or peer not subscribed; nothing was attempted
    #[error("Channel not ready for delivery")]
    NotReady,

    /// A chunk send failed after `sent` of `total` chunks went out
    #[error("Delivery aborted after {sent}/{total} chunks")]
    PartialFailure { sent: usize, total: usize },

    /// Negotiated transfer unit leaves no room for payload
    #[error("Transfer unit {transfer_unit} too small to carry payload")]
    TransferUnitTooSmall { transfer_unit: u16 },
}

/// Failure reported by the low-level notify primitive
#[derive(Debug, Clone, Error)]
#[error("Notify failed: {0}")]
pub struct NotifyError(pub String);

// ----------------------------------------------------------------------------
// Notify Sink
// ----------------------------------------------------------------------------

/// Low-level notification primitive provided by the host transport
#[async_trait]
pub trait NotifySink: Send + Sync {
    async fn notify(&self, channel: ChannelId, chunk: &[u8]) -> Result<(), NotifyError>;
}

// ----------------------------------------------------------------------------
// Chunking
// ----------------------------------------------------------------------------

/// Link preconditions observed at send time
#[derive(Debug, Clone, Copy)]
pub struct SendContext {
    pub connected: bool,
    pub subscribed: bool,
    pub transfer_unit: u16,
}

/// Split a payload into transfer-unit-sized chunks. Pure; property tests
/// pin the count to ceil(len / (unit - overhead)) and byte-exact
/// concatenation.
pub fn chunk_payload(payload: &[u8], transfer_unit: u16) -> Result<Vec<&[u8]>, TransportError> {
    let unit = transfer_unit as usize;
    if unit <= NOTIFY_OVERHEAD {
        return Err(TransportError::TransferUnitTooSmall { transfer_unit });
    }
    let chunk_size = unit - NOTIFY_OVERHEAD;
    Ok(payload.chunks(chunk_size).collect())
}

// ----------------------------------------------------------------------------
// Fragment Transport
// ----------------------------------------------------------------------------

/// Paced chunk sender over a notify sink
#[derive(Debug, Clone)]
pub struct FragmentTransport {
    pacing: Duration,
}

impl FragmentTransport {
    pub fn new(pacing: Duration) -> Self {
        Self { pacing }
    }

    /// Deliver a payload as sequential chunks. Fails fast with `NotReady`
    /// when preconditions do not hold; aborts with `PartialFailure` on the
    /// first chunk the sink rejects.
    pub async fn send<S: NotifySink + ?Sized>(
        &self,
        sink: &S,
        channel: ChannelId,
        payload: &[u8],
        ctx: SendContext,
    ) -> Result<(), TransportError> {
        if !ctx.connected || !ctx.subscribed {
            return Err(TransportError::NotReady);
        }

        let chunks = chunk_payload(payload, ctx.transfer_unit)?;
        let total = chunks.len();
        debug!(?channel, total, len = payload.len(), "sending fragmented payload");

        for (i, chunk) in chunks.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.pacing).await;
            }
            if let Err(err) = sink.notify(channel, chunk).await {
                debug!(?channel, sent = i, total, %err, "fragment delivery aborted");
                return Err(TransportError::PartialFailure { sent: i, total });
            }
        }

        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    struct RecordingSink {
        chunks: Mutex<Vec<Vec<u8>>>,
        fail_after: Option<usize>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                chunks: Mutex::new(Vec::new()),
                fail_after: None,
            }
        }

        fn failing_after(n: usize) -> Self {
            Self {
                chunks: Mutex::new(Vec::new()),
                fail_after: Some(n),
            }
        }
    }

    #[async_trait]
    impl NotifySink for RecordingSink {
        async fn notify(&self, _channel: ChannelId, chunk: &[u8]) -> Result<(), NotifyError> {
            let mut chunks = self.chunks.lock().unwrap();
            if Some(chunks.len()) == self.fail_after {
                return Err(NotifyError("congestion".to_string()));
            }
            chunks.push(chunk.to_vec());
            Ok(())
        }
    }

    fn ready(transfer_unit: u16) -> SendContext {
        SendContext {
            connected: true,
            subscribed: true,
            transfer_unit,
        }
    }

    #[test]
    fn test_chunk_math() {
        let payload = vec![0u8; 100];
        // 23 - 3 = 20 bytes per chunk -> 5 chunks
        let chunks = chunk_payload(&payload, 23).unwrap();
        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(|c| c.len() == 20));
    }

    #[test]
    fn test_transfer_unit_floor() {
        assert!(matches!(
            chunk_payload(b"x", 3),
            Err(TransportError::TransferUnitTooSmall { transfer_unit: 3 })
        ));
        assert!(chunk_payload(b"x", 4).is_ok());
    }

    #[tokio::test]
    async fn test_send_preserves_payload() {
        let sink = RecordingSink::new();
        let transport = FragmentTransport::new(Duration::from_millis(1));
        let payload: Vec<u8> = (0..=255).collect();

        transport
            .send(&sink, ChannelId::ScanResult, &payload, ready(23))
            .await
            .unwrap();

        let chunks = sink.chunks.lock().unwrap();
        assert_eq!(chunks.len(), 13); // ceil(256 / 20)
        let rebuilt: Vec<u8> = chunks.iter().flatten().copied().collect();
        assert_eq!(rebuilt, payload);
    }

    #[tokio::test]
    async fn test_not_ready_attempts_nothing() {
        let sink = RecordingSink::new();
        let transport = FragmentTransport::new(Duration::ZERO);

        let mut ctx = ready(23);
        ctx.subscribed = false;
        let result = transport
            .send(&sink, ChannelId::ScanResult, b"data", ctx)
            .await;
        assert_eq!(result, Err(TransportError::NotReady));

        let mut ctx = ready(23);
        ctx.connected = false;
        let result = transport
            .send(&sink, ChannelId::ScanResult, b"data", ctx)
            .await;
        assert_eq!(result, Err(TransportError::NotReady));

        assert!(sink.chunks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chunk_failure_aborts_remainder() {
        let sink = RecordingSink::failing_after(2);
        let transport = FragmentTransport::new(Duration::from_millis(1));
        let payload = vec![0u8; 100]; // 5 chunks at unit 23

        let result = transport
            .send(&sink, ChannelId::ScanResult, &payload, ready(23))
            .await;
        assert_eq!(result, Err(TransportError::PartialFailure { sent: 2, total: 5 }));
        assert_eq!(sink.chunks.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_payload_is_a_no_op_success() {
        let sink = RecordingSink::new();
        let transport = FragmentTransport::new(Duration::ZERO);
        transport
            .send(&sink, ChannelId::Status, &[], ready(23))
            .await
            .unwrap();
        assert!(sink.chunks.lock().unwrap().is_empty());
    }

    proptest! {
        /// Chunk count is exactly ceil(len / (unit - overhead)) and the
        /// chunks concatenate back to the payload
        #[test]
        fn prop_chunk_count_and_concatenation(
            payload in proptest::collection::vec(any::<u8>(), 0..2048),
            unit in 4u16..512,
        ) {
            let chunks = chunk_payload(&payload, unit).unwrap();
            let chunk_size = unit as usize - NOTIFY_OVERHEAD;
            prop_assert_eq!(chunks.len(), payload.len().div_ceil(chunk_size));
            for chunk in &chunks {
                prop_assert!(chunk.len() <= chunk_size);
            }
            let rebuilt: Vec<u8> = chunks.into_iter().flatten().copied().collect();
            prop_assert_eq!(rebuilt, payload);
        }
    }
}

//! Byte-bounded fan-out of one body stream into several branches.
//!
//! A single reader task pulls from the source and offers every chunk to each
//! branch in order. Each branch is bounded by a byte budget: the reader waits
//! for budget on a full branch, so the slowest live consumer sets the pace.
//! Dropped branches are skipped from then on.

use super::BodyStream;
use bytes::Bytes;
use futures::StreamExt;
use gateway_core::GatewayResult;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::trace;

type Item = (GatewayResult<Bytes>, OwnedSemaphorePermit);

struct Branch {
    tx: mpsc::UnboundedSender<Item>,
    budget: Arc<Semaphore>,
    capacity: usize,
}

impl Branch {
    /// Deliver one item, waiting for byte budget. Returns false once the
    /// consumer is gone.
    async fn offer(&self, item: GatewayResult<Bytes>) -> bool {
        let weight = item.as_ref().map_or(0, Bytes::len).min(self.capacity);
        let permits = u32::try_from(weight).unwrap_or(u32::MAX);

        let permit = tokio::select! {
            permit = Arc::clone(&self.budget).acquire_many_owned(permits) => match permit {
                Ok(permit) => permit,
                Err(_) => return false,
            },
            () = self.tx.closed() => return false,
        };

        self.tx.send((item, permit)).is_ok()
    }
}

/// Split `source` into `N` streams carrying the same bytes.
///
/// `capacity` is the per-branch byte budget; a chunk larger than the budget
/// occupies the whole budget. An upstream error is delivered to every live
/// branch and ends the broadcast.
pub fn tee<const N: usize>(source: BodyStream, capacity: usize) -> [BodyStream; N] {
    let capacity = capacity.clamp(1, u32::MAX as usize);
    let mut senders = Vec::with_capacity(N);

    let outputs = std::array::from_fn(|_| {
        let (tx, rx) = mpsc::unbounded_channel::<Item>();
        senders.push(Some(Branch {
            tx,
            budget: Arc::new(Semaphore::new(capacity)),
            capacity,
        }));
        receiver_stream(rx)
    });

    tokio::spawn(broadcast(source, senders));
    outputs
}

async fn broadcast(mut source: BodyStream, mut branches: Vec<Option<Branch>>) {
    while let Some(item) = source.next().await {
        let failed = item.is_err();

        for slot in &mut branches {
            if let Some(branch) = slot {
                if !branch.offer(item.clone()).await {
                    *slot = None;
                }
            }
        }

        if failed {
            break;
        }
        if branches.iter().all(Option::is_none) {
            trace!("Every tee branch closed; stopping reader");
            break;
        }
    }
}

fn receiver_stream(rx: mpsc::UnboundedReceiver<Item>) -> BodyStream {
    futures::stream::unfold(rx, |mut rx| async move {
        // dropping the permit hands the bytes' budget back to the reader
        rx.recv().await.map(|(item, _permit)| (item, rx))
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::{body_stream_from_bytes, collect_body};
    use gateway_core::GatewayError;
    use std::time::Duration;

    fn chunks(parts: &[&'static str]) -> BodyStream {
        body_stream_from_bytes(parts.iter().map(|p| Bytes::from_static(p.as_bytes())).collect())
    }

    #[tokio::test]
    async fn test_every_branch_sees_every_byte() {
        let branches: [BodyStream; 3] = tee(chunks(&["{\"model\":", "\"gpt-4\"", "}"]), 64);

        for branch in branches {
            let body = collect_body(branch).await.unwrap();
            assert_eq!(&body[..], b"{\"model\":\"gpt-4\"}");
        }
    }

    #[tokio::test]
    async fn test_dropped_branch_does_not_stall_others() {
        let [dropped, survivor] = tee(chunks(&["aaaa", "bbbb", "cccc", "dddd"]), 4);
        drop(dropped);

        let body = tokio::time::timeout(Duration::from_secs(5), collect_body(survivor))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&body[..], b"aaaabbbbccccdddd");
    }

    #[tokio::test]
    async fn test_slow_branch_applies_backpressure() {
        let [mut fast, mut slow] = tee(chunks(&["aaaa", "bbbb", "cccc"]), 4);

        assert_eq!(&fast.next().await.unwrap().unwrap()[..], b"aaaa");
        assert_eq!(&fast.next().await.unwrap().unwrap()[..], b"bbbb");
        // the reader is parked on the slow branch's full budget
        let pending = tokio::time::timeout(Duration::from_millis(50), fast.next()).await;
        assert!(pending.is_err());

        assert_eq!(&slow.next().await.unwrap().unwrap()[..], b"aaaa");
        assert_eq!(&fast.next().await.unwrap().unwrap()[..], b"cccc");
        assert_eq!(&slow.next().await.unwrap().unwrap()[..], b"bbbb");
        assert_eq!(&slow.next().await.unwrap().unwrap()[..], b"cccc");
    }

    #[tokio::test]
    async fn test_oversized_chunk_passes() {
        let branches: [BodyStream; 2] = tee(chunks(&["0123456789abcdef"]), 4);
        for branch in branches {
            assert_eq!(collect_body(branch).await.unwrap().len(), 16);
        }
    }

    #[tokio::test]
    async fn test_error_reaches_every_branch() {
        let source: BodyStream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"part")),
            Err(GatewayError::stream("connection reset")),
        ])
        .boxed();

        let branches: [BodyStream; 3] = tee(source, 16);
        for branch in branches {
            let err = collect_body(branch).await.unwrap_err();
            assert!(matches!(err, GatewayError::Stream { .. }));
        }
    }
}

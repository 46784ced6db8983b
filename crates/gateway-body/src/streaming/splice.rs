//! In-flight `stream_options` injection for the forward branch.
//!
//! The splice lands before the last `}` buffered so far, which is only the
//! closing brace of the body for flat single-object payloads. Nested objects
//! that close after the first 100 bytes can receive the splice instead.

use bytes::{Bytes, BytesMut};
use futures::Stream;
use gateway_core::GatewayResult;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};

const STREAM_OPTIONS_KEY: &[u8] = b"\"stream_options\"";
const STREAM_OPTIONS_MEMBER: &[u8] = b"\"stream_options\":{\"include_usage\":true}";
const ATTEMPT_THRESHOLD: usize = 100;
const FLUSH_THRESHOLD: usize = 1000;

pin_project! {
    /// Adds `"stream_options":{"include_usage":true}` to a JSON body stream
    /// unless the body already carries `stream_options`.
    pub struct StreamOptionsInjector<S> {
        #[pin]
        inner: S,
        buffer: BytesMut,
        injected: bool,
        seen: bool,
        done: bool,
    }
}

impl<S> StreamOptionsInjector<S> {
    /// Wrap `inner`
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            injected: false,
            seen: false,
            done: false,
        }
    }
}

impl<S> Stream for StreamOptionsInjector<S>
where
    S: Stream<Item = GatewayResult<Bytes>>,
{
    type Item = GatewayResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if *this.done {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    if *this.injected {
                        return Poll::Ready(Some(Ok(chunk)));
                    }

                    this.buffer.extend_from_slice(&chunk);
                    if this.buffer.len() > ATTEMPT_THRESHOLD && !*this.seen {
                        *this.injected = try_splice(this.buffer);
                    }

                    if *this.injected || this.buffer.len() > FLUSH_THRESHOLD {
                        *this.seen |= contains(this.buffer, STREAM_OPTIONS_KEY);
                        return Poll::Ready(Some(Ok(this.buffer.split().freeze())));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    this.buffer.clear();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    *this.done = true;
                    if this.buffer.is_empty() {
                        return Poll::Ready(None);
                    }
                    if !*this.injected && !*this.seen {
                        *this.injected = try_splice(this.buffer);
                    }
                    return Poll::Ready(Some(Ok(this.buffer.split().freeze())));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Splice the member before the last `}`. Returns whether it was inserted.
fn try_splice(buffer: &mut BytesMut) -> bool {
    let Some(brace) = buffer.iter().rposition(|&b| b == b'}') else {
        return false;
    };
    if brace == 0 || contains(&buffer[..brace], STREAM_OPTIONS_KEY) {
        return false;
    }

    let needs_comma = buffer[..brace]
        .iter()
        .rev()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|&b| b != b'{');

    let tail = buffer.split_off(brace);
    if needs_comma {
        buffer.extend_from_slice(b",");
    }
    buffer.extend_from_slice(STREAM_OPTIONS_MEMBER);
    buffer.unsplit(tail);
    true
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

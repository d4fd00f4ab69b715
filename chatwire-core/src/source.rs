use async_trait::async_trait;
use bytes::Bytes;

use crate::error::CoreResult;
use crate::model::ChatRequest;
use crate::stream::ByteStream;

/// Anything that can open a chat event stream for a request.
/// `ChatClient` is the HTTP implementation.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn open(&self, req: &ChatRequest) -> CoreResult<ByteStream>;
}

/// Replays a captured event-stream body, ignoring the request.
/// Useful for tests and for decoding a saved transcript offline.
#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    chunks: Vec<Bytes>,
}

impl ReplaySource {
    pub fn from_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_text(body: &str) -> Self {
        Self::from_chunks([Bytes::copy_from_slice(body.as_bytes())])
    }

    /// Re-cut the body into chunks of at most `size` bytes, ignoring UTF-8 boundaries.
    pub fn chunked(self, size: usize) -> Self {
        let size = size.max(1);
        let joined: Vec<u8> = self.chunks.iter().flat_map(|c| c.iter().copied()).collect();
        Self {
            chunks: joined
                .chunks(size)
                .map(Bytes::copy_from_slice)
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[async_trait]
impl EventSource for ReplaySource {
    async fn open(&self, _req: &ChatRequest) -> CoreResult<ByteStream> {
        let items: Vec<CoreResult<Bytes>> = self.chunks.iter().cloned().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn replay_yields_chunks_in_order() {
        let source = ReplaySource::from_chunks(vec![&b"ab"[..], &b"cd"[..]]);
        let mut body = source.open(&ChatRequest::new("x")).await.expect("open");
        let mut seen = Vec::new();
        while let Some(chunk) = body.next().await {
            seen.push(chunk.expect("chunk"));
        }
        assert_eq!(seen, vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")]);
    }

    #[test]
    fn chunked_recuts_body() {
        let source = ReplaySource::from_text("abcdefg").chunked(3);
        assert_eq!(source.len(), 3);
        let empty = ReplaySource::default().chunked(0);
        assert!(empty.is_empty());
    }
}

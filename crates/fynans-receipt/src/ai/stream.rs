//! Newline-delimited JSON over a byte stream.
//!
//! Lines are buffered across chunk boundaries as raw bytes, so multi-byte
//! characters split between chunks survive. Lines that fail to parse are
//! skipped.

use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::Stream;
use serde::de::DeserializeOwned;

use super::error::CompletionError;

pub struct NdjsonStream<T> {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    buffer: Vec<u8>,
    finished: bool,
    _item: PhantomData<fn() -> T>,
}

impl<T> NdjsonStream<T> {
    pub fn new(
        byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            buffer: Vec::new(),
            finished: false,
            _item: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Stream for NdjsonStream<T> {
    type Item = Result<T, CompletionError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(item) = next_line(&mut this.buffer) {
                return Poll::Ready(Some(Ok(item)));
            }

            if this.finished {
                // Whatever is left has no trailing newline.
                let rest = std::mem::take(&mut this.buffer);
                return Poll::Ready(parse_line(&rest).map(Ok));
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(CompletionError::Network(e.to_string()))));
                }
                Poll::Ready(None) => this.finished = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Pops complete lines off the buffer until one parses.
fn next_line<T: DeserializeOwned>(buffer: &mut Vec<u8>) -> Option<T> {
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=pos).collect();
        if let Some(item) = parse_line(&line) {
            return Some(item);
        }
    }
    None
}

fn parse_line<T: DeserializeOwned>(line: &[u8]) -> Option<T> {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(item) => Some(item),
        Err(e) => {
            let preview: String = trimmed.chars().take(200).collect();
            tracing::debug!(error = %e, line = %preview, "Skipping malformed stream line");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Chunk {
        response: String,
    }

    fn chunks(parts: &[&'static [u8]]) -> NdjsonStream<Chunk> {
        let items: Vec<Result<Bytes, reqwest::Error>> = parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p)))
            .collect();
        NdjsonStream::new(futures_util::stream::iter(items))
    }

    async fn collect(stream: NdjsonStream<Chunk>) -> Vec<String> {
        stream
            .map(|item| item.unwrap().response)
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let stream = chunks(&[b"{\"response\":\"Hel", b"lo\"}\n{\"resp", b"onse\":\" world\"}\n"]);
        assert_eq!(collect(stream).await, vec!["Hello", " world"]);
    }

    #[tokio::test]
    async fn test_malformed_lines_skipped() {
        let stream = chunks(&[b"{\"response\":\"a\"}\nnot json\n\n{\"response\":\"b\"}\n"]);
        assert_eq!(collect(stream).await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let stream = chunks(&[b"{\"response\":\"a\"}\n{\"response\":\"tail\"}"]);
        assert_eq!(collect(stream).await, vec!["a", "tail"]);
    }

    #[tokio::test]
    async fn test_multibyte_split_between_chunks() {
        // "ë" is 0xC3 0xAB in UTF-8.
        let stream = chunks(&[b"{\"response\":\"Lek\xC3", b"\xAB\"}\n"]);
        assert_eq!(collect(stream).await, vec!["Lekë"]);
    }
}

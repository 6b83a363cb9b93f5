use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Progress,
    Answer,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AnswerChunk {
    pub kind: ChunkKind,
    pub text: String,
    pub is_final: bool,
}

impl AnswerChunk {
    pub fn progress(text: impl Into<String>) -> Self {
        Self { kind: ChunkKind::Progress, text: text.into(), is_final: false }
    }

    pub fn answer(text: impl Into<String>, is_final: bool) -> Self {
        Self { kind: ChunkKind::Answer, text: text.into(), is_final }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { kind: ChunkKind::Error, text: text.into(), is_final: true }
    }
}

/// Chunks of one streamed turn. Finite: ends right after the chunk with
/// `is_final` set. Consumed by value, so it cannot be replayed.
pub struct TurnStream {
    inner: ReceiverStream<AnswerChunk>,
    finished: bool,
}

impl TurnStream {
    pub(crate) fn channel(capacity: usize) -> (mpsc::Sender<AnswerChunk>, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (sender, Self { inner: ReceiverStream::new(receiver), finished: false })
    }
}

impl Stream for TurnStream {
    type Item = AnswerChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(chunk)) => {
                self.finished = chunk.is_final;
                Poll::Ready(Some(chunk))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Splits a final answer into line-sized chunks; only the last is final.
pub(crate) fn answer_chunks(answer: &str) -> Vec<AnswerChunk> {
    let pieces = answer.split_inclusive('\n').collect::<Vec<_>>();
    if pieces.is_empty() {
        return vec![AnswerChunk::answer(String::new(), true)];
    }
    let last = pieces.len() - 1;
    pieces
        .into_iter()
        .enumerate()
        .map(|(index, piece)| AnswerChunk::answer(piece, index == last))
        .collect()
}

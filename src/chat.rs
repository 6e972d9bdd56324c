// Chat transport seam - message shapes and stream consumption
//
// The core hands {role, content} sequences to an external transport and gets
// back either a one-shot completion or an async stream of text chunks. How
// the transport talks to a provider (HTTP, streaming protocol, keys, model
// menus) is none of this crate's business. What is: prefixing one assembled
// context message, accumulating partial output for live display, and treating
// a mid-stream failure as terminal for that turn only.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Async sequence of text chunks from a streaming completion.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Adapt a chunk channel into a `ChunkStream`, for transports that push
/// chunks from a background task.
pub fn channel_stream(rx: tokio::sync::mpsc::Receiver<Result<String>>) -> ChunkStream {
    Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx))
}

/// The external chat/LLM layer, as seen from the core.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// One-shot completion.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Streaming completion.
    async fn stream(&self, messages: &[ChatMessage]) -> Result<ChunkStream>;
}

/// Prefix an assembled context block as a system message, when present.
pub fn with_context(context: Option<String>, messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    match context {
        Some(block) if !block.is_empty() => {
            let mut out = Vec::with_capacity(messages.len() + 1);
            out.push(ChatMessage::system(block));
            out.extend(messages);
            out
        }
        _ => messages,
    }
}

/// Drain a chunk stream, invoking `on_chunk` per chunk for live display, and
/// return the accumulated text. A mid-stream error is terminal for this turn
/// - the partial text is abandoned and the error surfaces to the caller -
/// but nothing else is torn down.
pub async fn consume_stream(
    mut stream: ChunkStream,
    mut on_chunk: impl FnMut(&str) + Send,
) -> Result<String> {
    let mut accumulated = String::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(text) => {
                on_chunk(&text);
                accumulated.push_str(&text);
            }
            Err(e) => {
                tracing::warn!("chat stream failed mid-turn: {e}");
                return Err(Error::Transport(format!("stream interrupted: {e}")));
            }
        }
    }
    Ok(accumulated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunk_stream(chunks: Vec<Result<String>>) -> ChunkStream {
        Box::pin(stream::iter(chunks))
    }

    #[tokio::test]
    async fn test_consume_stream_accumulates_in_order() {
        let stream = chunk_stream(vec![
            Ok("The ".to_string()),
            Ok("Greeting ".to_string()),
            Ok("component".to_string()),
        ]);
        let mut seen = Vec::new();
        let text = consume_stream(stream, |chunk| seen.push(chunk.to_string()))
            .await
            .unwrap();
        assert_eq!(text, "The Greeting component");
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn test_mid_stream_error_is_terminal_for_the_turn() {
        let stream = chunk_stream(vec![
            Ok("partial".to_string()),
            Err(Error::Transport("connection reset".into())),
            Ok("never delivered".to_string()),
        ]);
        let mut seen = Vec::new();
        let outcome = consume_stream(stream, |chunk| seen.push(chunk.to_string())).await;
        assert!(matches!(outcome, Err(Error::Transport(_))));
        // The partial chunk was still displayed live before the failure.
        assert_eq!(seen, vec!["partial"]);
    }

    #[test]
    fn test_with_context_prefixes_system_message() {
        let messages = vec![ChatMessage::user("why did this re-render?")];
        let out = with_context(Some("## Console\n...".to_string()), messages.clone());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].role, Role::System);
        assert_eq!(out[1].role, Role::User);

        let out = with_context(None, messages.clone());
        assert_eq!(out.len(), 1);
        let out = with_context(Some(String::new()), messages);
        assert_eq!(out.len(), 1, "empty context adds nothing");
    }

    #[tokio::test]
    async fn test_channel_stream_delivers_pushed_chunks() {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let stream = channel_stream(rx);
        tokio::spawn(async move {
            tx.send(Ok("a".to_string())).await.unwrap();
            tx.send(Ok("b".to_string())).await.unwrap();
        });
        let text = consume_stream(stream, |_| {}).await.unwrap();
        assert_eq!(text, "ab");
    }

    #[test]
    fn test_message_serde_roles() {
        let json = serde_json::to_value(ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "hi");
    }
}

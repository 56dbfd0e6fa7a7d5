// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Streaming delivery of generated text.
//!
//! A [`TokenSink`] receives zero or more fragments followed by exactly one
//! terminal event. [`TokenStream`] adapts a sink onto a tokio channel so an
//! async caller can consume fragments while generation runs on a blocking
//! worker.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;

/// Receiver of streamed generation events.
///
/// Generation calls `on_token` zero or more times, then exactly one of
/// `on_complete` or `on_error`.
pub trait TokenSink {
    fn on_token(&mut self, text: &str);
    fn on_complete(&mut self);
    fn on_error(&mut self, message: &str);
}

/// One streamed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Token(String),
    Complete,
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Token(_))
    }
}

/// Async stream of generation events.
pub struct TokenStream {
    receiver: mpsc::Receiver<StreamEvent>,
    finished: bool,
}

impl TokenStream {
    /// Create a new stream with sender/receiver pair.
    pub fn new(buffer_size: usize) -> (StreamSender, Self) {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        (StreamSender { sender }, Self { receiver, finished: false })
    }

    /// Receive the next event. Returns `None` after the terminal event or
    /// when the producer went away.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        let event = self.receiver.recv().await;
        self.finished = event.as_ref().map_or(true, StreamEvent::is_terminal);
        event
    }

    /// Concatenate every fragment. Errors with the terminal message, or
    /// when the producer stopped without a terminal event.
    pub async fn collect_text(mut self) -> Result<String, String> {
        let mut text = String::new();
        while let Some(event) = self.next().await {
            match event {
                StreamEvent::Token(piece) => text.push_str(&piece),
                StreamEvent::Complete => return Ok(text),
                StreamEvent::Error(message) => return Err(message),
            }
        }
        Err("stream closed before completion".into())
    }
}

impl futures::Stream for TokenStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        if self.finished {
            return Poll::Ready(None);
        }
        let polled = self.receiver.poll_recv(cx);
        if let Poll::Ready(event) = &polled {
            self.finished = event.as_ref().map_or(true, StreamEvent::is_terminal);
        }
        polled
    }
}

/// Sender half feeding a [`TokenStream`]; used as the generation sink.
///
/// Sends block when the buffer is full, so it must run off the async
/// executor (e.g. inside `spawn_blocking`). A dropped receiver silently
/// discards further events.
#[derive(Clone)]
pub struct StreamSender {
    sender: mpsc::Sender<StreamEvent>,
}

impl StreamSender {
    fn send(&self, event: StreamEvent) {
        let _ = self.sender.blocking_send(event);
    }

    /// Whether the consumer dropped its stream.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl TokenSink for StreamSender {
    fn on_token(&mut self, text: &str) {
        self.send(StreamEvent::Token(text.to_string()));
    }

    fn on_complete(&mut self) {
        self.send(StreamEvent::Complete);
    }

    fn on_error(&mut self, message: &str) {
        self.send(StreamEvent::Error(message.to_string()));
    }
}

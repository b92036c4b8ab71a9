//! Serialized writer for a session's outbound channel.

use std::future::Future;

use tokio::sync::{mpsc, Mutex};

use crate::error::{Error, Result};
use crate::protocol::ServerMessage;

/// Anything a session can push text frames into.
pub trait MessageSink: Send + 'static {
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<()>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

impl MessageSink for mpsc::UnboundedSender<String> {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.send(text)
            .map_err(|_| Error::connection_closed("receiver dropped"))
    }
}

/// Every write goes through one lock, so frames from the stdout and stderr
/// readers never interleave mid-message.
pub struct Outbound<S> {
    sink: Mutex<S>,
}

impl<S: MessageSink> Outbound<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    pub async fn send(&self, message: ServerMessage) -> Result<()> {
        let text = message.to_wire();
        let mut sink = self.sink.lock().await;
        sink.send_text(text).await
    }

    pub async fn close(&self) {
        self.sink.lock().await.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_arrive_in_send_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outbound = Outbound::new(tx);

        outbound.send(ServerMessage::info("a")).await.unwrap();
        outbound.send(ServerMessage::Done).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), r#"{"type":"info","message":"a"}"#);
        assert_eq!(rx.recv().await.unwrap(), r#"{"type":"done","message":""}"#);
    }

    #[tokio::test]
    async fn send_after_peer_gone_is_connection_closed() {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        drop(rx);
        let outbound = Outbound::new(tx);

        let err = outbound.send(ServerMessage::Done).await.unwrap_err();
        assert_eq!(err.code.as_str(), "protocol.connection_closed");
    }
}

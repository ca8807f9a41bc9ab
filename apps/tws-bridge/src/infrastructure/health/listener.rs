//! Listener WebSocket handling.
//!
//! One task per socket. Outbound traffic (welcome, replies, broadcasts) goes
//! through a single bounded channel so the welcome is always first and
//! replies keep their order relative to broadcasts.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::application::services::GatewaySession;
use crate::domain::listener::{AckStatus, ListenerId, ListenerMessage, ListenerRequest};

/// Serve one listener connection until either side closes it.
pub async fn serve_listener(socket: WebSocket, session: Arc<GatewaySession>, buffer: usize) {
    let id = ListenerId::generate();
    let (tx, mut rx) = mpsc::channel::<Arc<ListenerMessage>>(buffer.max(1));
    let (mut write, mut read) = socket.split();

    if let Err(e) = tx.try_send(Arc::new(ListenerMessage::connected(&id))) {
        tracing::warn!(listener = %id, error = %e, "Failed to queue listener welcome");
    }
    session.add_broadcast_listener(id.clone(), Arc::new(tx.clone()));
    tracing::info!(listener = %id, "Listener connected");

    let writer = async {
        while let Some(message) = rx.recv().await {
            let json = match message.to_json() {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(listener = %id, error = %e, "Failed to encode listener message");
                    continue;
                }
            };
            if write.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    };

    let reader = async {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if let Some(reply) = reply_to(&id, text.as_str()) {
                        if tx.send(Arc::new(reply)).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };

    tokio::select! {
        () = writer => {}
        () = reader => {}
    }

    session.remove_broadcast_listener(&id);
    tracing::info!(listener = %id, "Listener disconnected");
}

fn reply_to(id: &ListenerId, text: &str) -> Option<ListenerMessage> {
    match ListenerRequest::parse(text) {
        Ok(ListenerRequest::Subscribe { symbol }) => {
            tracing::info!(listener = %id, %symbol, "Listener subscribed");
            Some(ListenerMessage::ack(AckStatus::Subscribed, &symbol))
        }
        Ok(ListenerRequest::Unsubscribe { symbol }) => {
            tracing::info!(listener = %id, %symbol, "Listener unsubscribed");
            Some(ListenerMessage::ack(AckStatus::Unsubscribed, &symbol))
        }
        Ok(ListenerRequest::Ping) => Some(ListenerMessage::pong()),
        Ok(ListenerRequest::Unknown(kind)) => {
            tracing::debug!(listener = %id, %kind, "Unknown listener message type");
            None
        }
        Err(e) => {
            tracing::warn!(listener = %id, error = %e, "Malformed listener message");
            Some(ListenerMessage::error(format!("Invalid message format: {e}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> ListenerId {
        ListenerId::new("listener-1")
    }

    #[test]
    fn subscribe_is_acknowledged() {
        let reply = reply_to(&id(), r#"{"type":"subscribe","symbol":"MES"}"#).unwrap();
        assert_eq!(reply, ListenerMessage::ack(AckStatus::Subscribed, "MES"));
    }

    #[test]
    fn unsubscribe_is_acknowledged() {
        let reply = reply_to(&id(), r#"{"type":"unsubscribe","symbol":"MES"}"#).unwrap();
        assert_eq!(reply, ListenerMessage::ack(AckStatus::Unsubscribed, "MES"));
    }

    #[test]
    fn ping_gets_pong() {
        let reply = reply_to(&id(), r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(reply, ListenerMessage::Pong { .. }));
    }

    #[test]
    fn unknown_type_gets_no_reply() {
        assert!(reply_to(&id(), r#"{"type":"hello"}"#).is_none());
    }

    #[test]
    fn malformed_input_gets_error() {
        let reply = reply_to(&id(), "{not json").unwrap();
        assert!(matches!(reply, ListenerMessage::Error { .. }));
    }
}

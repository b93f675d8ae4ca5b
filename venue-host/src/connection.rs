use axum::extract::ws::Message;
use tokio::sync::mpsc;
use tracing::warn;
use venue_core::HostMessage;

/// A full-duplex message sink for one connected peer.
///
/// Cloning an `Endpoint` is cheap (it is backed by an unbounded `mpsc`
/// sender) and safe for concurrent callers: both [`crate::state::RoomRegistry`]
/// (routing) and [`crate::transfer::TransferEngine`] (chunk forwarding) hold
/// clones, and every send is funnelled through the single outbound task that
/// owns the WebSocket write half, so writes are never interleaved.
///
/// Sending on an endpoint whose connection already closed is a silent no-op
/// — the owning read loop is the only place that observes and reacts to
/// closure.
#[derive(Clone)]
pub struct Endpoint {
    tx: mpsc::UnboundedSender<Message>,
}

impl Endpoint {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { tx }
    }

    pub fn send_text(&self, message: &HostMessage) {
        match message.to_json() {
            Ok(json) => {
                let _ = self.tx.send(Message::Text(json.into()));
            }
            Err(err) => warn!("failed to encode outbound message: {}", err),
        }
    }

    pub fn send_binary(&self, frame: Vec<u8>) {
        let _ = self.tx.send(Message::Binary(frame.into()));
    }
}

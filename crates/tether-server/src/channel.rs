//! Subscription channels and session replies.

use tether_proto::{ChannelMessage, SessionResponse, SubscriptionId};
use tokio::sync::mpsc;

/// Metadata field carrying the subscription id of an upgrade response.
pub const SUBSCRIPTION_ID_HEADER: &str = "Subscription-Id";

/// Receiving end of a live subscription.
///
/// The first message is always [`ChannelMessage::SubscriptionId`]. The
/// stream ends once the session releases the channel (after a `Close`).
/// Dropping or [closing](Self::close) it deregisters the subscription.
#[derive(Debug)]
pub struct SubscriptionStream {
    subscription_id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<ChannelMessage>,
}

impl SubscriptionStream {
    pub(crate) fn new(subscription_id: SubscriptionId, rx: mpsc::UnboundedReceiver<ChannelMessage>) -> Self {
        Self { subscription_id, rx }
    }

    /// Id the session registered this subscription under.
    pub fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    /// Next message, or `None` once the session has released the channel.
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        self.rx.recv().await
    }

    /// Next message if one is already queued.
    pub fn try_recv(&mut self) -> Option<ChannelMessage> {
        self.rx.try_recv().ok()
    }

    /// Close the subscriber side. Queued messages stay readable.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// What a session actor sends back for one request.
#[derive(Debug)]
pub enum SessionReply {
    /// Structured result
    Response(SessionResponse),
    /// Subscription accepted: the id travels as metadata next to the stream
    Upgrade(SubscriptionStream),
}

impl SessionReply {
    /// The `(name, value)` metadata pair of an upgrade response.
    pub fn subscription_id_header(&self) -> Option<(&'static str, String)> {
        match self {
            Self::Upgrade(stream) => Some((SUBSCRIPTION_ID_HEADER, stream.subscription_id().to_string())),
            Self::Response(_) => None,
        }
    }

    /// The structured result; for an upgrade, the allocated id.
    pub fn response(&self) -> SessionResponse {
        match self {
            Self::Response(response) => response.clone(),
            Self::Upgrade(stream) => {
                SessionResponse::Subscribed { subscription_id: stream.subscription_id() }
            },
        }
    }

    /// The stream of an upgrade response.
    pub fn into_stream(self) -> Option<SubscriptionStream> {
        match self {
            Self::Upgrade(stream) => Some(stream),
            Self::Response(_) => None,
        }
    }
}

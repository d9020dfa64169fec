//! Typed clients of actor tasks.

use bytes::Bytes;
use tether_proto::{
    HistoryEntry, Nonce, NonceRecord, PeerId, SessionKey, SessionRequest, SessionResponse,
    SubscriptionId,
};
use tokio::sync::{mpsc, oneshot};

use crate::{
    actor::{GuardCommand, SessionCommand},
    channel::SessionReply,
    error::RelayError,
};

/// Handle to one session task.
///
/// Cheap to clone. Requests from all clones are served one at a time in
/// the order they reach the mailbox.
#[derive(Clone)]
pub struct SessionHandle {
    key: SessionKey,
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub(crate) fn new(key: SessionKey, tx: mpsc::Sender<SessionCommand>) -> Self {
        Self { key, tx }
    }

    /// Session key served by the task.
    pub fn key(&self) -> SessionKey {
        self.key
    }

    /// Send a request and wait for the reply.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Actor` if the actor failed, or a mailbox error if
    /// the task is gone.
    pub async fn request(&self, request: SessionRequest) -> Result<SessionReply, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Request { request, reply })
            .await
            .map_err(|_| RelayError::MailboxClosed)?;

        Ok(rx.await.map_err(|_| RelayError::ReplyDropped)??)
    }

    async fn request_bool(&self, request: SessionRequest) -> Result<bool, RelayError> {
        let kind = request.kind();
        match self.request(request).await?.response() {
            SessionResponse::Bool(value) => Ok(value),
            _ => Err(RelayError::UnexpectedReply(kind)),
        }
    }

    /// Whether the session exists.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn check_exists(&self) -> Result<bool, RelayError> {
        self.request_bool(SessionRequest::CheckExists).await
    }

    /// Create the session. False if it already exists.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn initialise(&self, initial_peer_id: PeerId) -> Result<bool, RelayError> {
        self.request_bool(SessionRequest::Initialise { initial_peer_id }).await
    }

    /// Subscribe `subscriber_id`. The reply is an upgrade only if the
    /// session exists; an id is allocated either way.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn subscribe(&self, subscriber_id: PeerId) -> Result<SessionReply, RelayError> {
        self.request(SessionRequest::Subscribe { subscriber_id }).await
    }

    /// Ask every channel registered under `subscription_id` to close.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn unsubscribe(&self, subscription_id: SubscriptionId) -> Result<(), RelayError> {
        self.request(SessionRequest::Unsubscribe { subscription_id }).await.map(drop)
    }

    /// Grant `added_id` privilege on behalf of `adder_id`.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn add_privileged_peer(&self, adder_id: PeerId, added_id: PeerId) -> Result<bool, RelayError> {
        self.request_bool(SessionRequest::AddPrivilegedPeer { adder_id, added_id }).await
    }

    /// Delete the session; `None` deletes administratively.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn delete(&self, deleter_id: Option<PeerId>) -> Result<bool, RelayError> {
        self.request_bool(SessionRequest::Delete { deleter_id }).await
    }

    /// Send to every privileged subscriber.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn broadcast_data(
        &self,
        data: Bytes,
        sender_id: PeerId,
        nonce: Nonce,
        write_history: bool,
    ) -> Result<bool, RelayError> {
        self.request_bool(SessionRequest::BroadcastData { data, sender_id, nonce, write_history }).await
    }

    /// Send to the subscriptions of `receiver_id`.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn unicast_data(
        &self,
        data: Bytes,
        sender_id: PeerId,
        receiver_id: PeerId,
        nonce: Nonce,
        write_history: bool,
        make_receiver_privileged: bool,
    ) -> Result<bool, RelayError> {
        self.request_bool(SessionRequest::UnicastData {
            data,
            sender_id,
            receiver_id,
            nonce,
            write_history,
            make_receiver_privileged,
        })
        .await
    }

    /// Remove retained messages produced by `(data_sender_id, data_nonce)`.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn delete_data(
        &self,
        deleter_id: PeerId,
        data_sender_id: PeerId,
        data_nonce: Nonce,
    ) -> Result<bool, RelayError> {
        self.request_bool(SessionRequest::DeleteData { deleter_id, data_sender_id, data_nonce }).await
    }

    /// Retained messages visible to `reader_id` from `from_timestamp` on.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn get_history(
        &self,
        reader_id: PeerId,
        from_timestamp: u64,
    ) -> Result<Vec<HistoryEntry>, RelayError> {
        match self.request(SessionRequest::GetHistory { reader_id, from_timestamp }).await?.response() {
            SessionResponse::History(entries) => Ok(entries),
            _ => Err(RelayError::UnexpectedReply("get_history")),
        }
    }
}

/// Handle to one replay guard task.
#[derive(Clone)]
pub struct GuardHandle {
    peer: PeerId,
    tx: mpsc::Sender<GuardCommand>,
}

impl GuardHandle {
    pub(crate) fn new(peer: PeerId, tx: mpsc::Sender<GuardCommand>) -> Self {
        Self { peer, tx }
    }

    /// Peer served by the task.
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Record `record`, reporting whether it was already used.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::MailboxClosed` if the task has exited (its state
    /// was reclaimed); the caller should fetch a fresh handle.
    pub async fn check_nonce_is_used(&self, record: NonceRecord) -> Result<bool, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(GuardCommand { record, reply }).await.map_err(|_| RelayError::MailboxClosed)?;

        Ok(rx.await.map_err(|_| RelayError::ReplyDropped)??)
    }
}

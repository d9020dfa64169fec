//! Actor tasks.
//!
//! Each session and each replay guard runs as one tokio task owning its
//! core state machine. The task loop selects between:
//!
//! - the mailbox: requests are handled one at a time in arrival order
//! - the wake timer: armed from the persisted alarm after every step
//!
//! Subscription channels are unbounded mpsc channels. A watcher task per
//! channel waits for the subscriber to go away and reports it back through
//! the mailbox so the session deregisters it.
//!
//! A session task holds a sender to its own mailbox (its pin) while the
//! session exists, has subscriptions, or saw activity within the linger
//! period. Once unpinned the task stops as soon as no handle is left.

use std::{collections::HashMap, future, time::Duration};

use tether_core::{
    ActorError, ChannelId, Environment, GuardAlarm, ReplayGuard, Scope, Session, SessionAction,
    SessionOutcome, Storage, Timestamp,
};
use tether_proto::{ChannelMessage, NonceRecord, SessionRequest};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::channel::{SessionReply, SubscriptionStream};

/// Message in a session task's mailbox.
pub(crate) enum SessionCommand {
    Request {
        request: SessionRequest,
        reply: oneshot::Sender<Result<SessionReply, ActorError>>,
    },
    ChannelClosed(ChannelId),
}

/// Message in a guard task's mailbox.
pub(crate) struct GuardCommand {
    pub(crate) record: NonceRecord,
    pub(crate) reply: oneshot::Sender<Result<bool, ActorError>>,
}

/// Minimum wait before re-running an alarm handler that failed.
const ALARM_RETRY: Duration = Duration::from_secs(1);

/// Time until the persisted alarm of `scope`, if one is set.
fn next_wake<E: Environment, S: Storage>(
    env: &E,
    storage: &S,
    scope: &Scope,
    retrying: bool,
) -> Option<Duration> {
    match storage.alarm(scope) {
        Ok(alarm) => alarm.map(|at| {
            let wait = env.now().until(at);
            if retrying { wait.max(ALARM_RETRY) } else { wait }
        }),
        Err(err) => {
            tracing::error!(%scope, error = %err, "failed to read alarm");
            None
        },
    }
}

/// Sleep for `wake`, or forever when there is no alarm.
async fn wake_after<E: Environment>(env: E, wake: Option<Duration>) {
    match wake {
        Some(duration) => env.sleep(duration).await,
        None => future::pending().await,
    }
}

/// Subscription channels are unbounded so that data and the final `Close`
/// are never dropped on a slow subscriber.
struct ChannelEntry {
    tx: mpsc::UnboundedSender<ChannelMessage>,
    watcher: JoinHandle<()>,
}

/// Tokio driver of one [`Session`].
pub(crate) struct SessionTask<E, S> {
    session: Session,
    env: E,
    storage: S,
    mailbox: mpsc::Receiver<SessionCommand>,
    mailbox_tx: mpsc::WeakSender<SessionCommand>,
    /// Keeps the mailbox open while no handle is held
    pin: Option<mpsc::Sender<SessionCommand>>,
    linger: Duration,
    last_active: Timestamp,
    channels: HashMap<ChannelId, ChannelEntry>,
    /// Set after the alarm handler failed
    retrying: bool,
}

impl<E: Environment, S: Storage> SessionTask<E, S> {
    pub(crate) fn new(
        session: Session,
        env: E,
        storage: S,
        mailbox: mpsc::Receiver<SessionCommand>,
        pin: mpsc::Sender<SessionCommand>,
        linger: Duration,
    ) -> Self {
        let last_active = env.now();
        Self {
            session,
            env,
            storage,
            mailbox,
            mailbox_tx: pin.downgrade(),
            pin: Some(pin),
            linger,
            last_active,
            channels: HashMap::new(),
            retrying: false,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::debug!(session = %self.session.key(), "session task started");

        loop {
            let wake = next_wake(&self.env, &self.storage, self.session.scope(), self.retrying);
            let unpin = self.unpin_after();

            tokio::select! {
                command = self.mailbox.recv() => match command {
                    Some(command) => {
                        self.touch();
                        self.handle_command(command);
                    },
                    None => break,
                },
                () = wake_after(self.env.clone(), wake) => {
                    self.touch();
                    self.fire_alarm();
                },
                () = wake_after(self.env.clone(), unpin) => {
                    tracing::debug!(session = %self.session.key(), "session task unpinned");
                    self.pin = None;
                },
            }
        }

        for (_, entry) in self.channels.drain() {
            entry.watcher.abort();
        }
        tracing::debug!(session = %self.session.key(), "session task stopped");
    }

    /// Time until the task may drop its pin, if it is pinned and idle-able.
    fn unpin_after(&self) -> Option<Duration> {
        let idle = !self.session.exists() && self.channels.is_empty();
        (self.pin.is_some() && idle).then(|| self.env.now().until(self.last_active + self.linger))
    }

    fn touch(&mut self) {
        self.last_active = self.env.now();
        if self.pin.is_none() {
            self.pin = self.mailbox_tx.upgrade();
        }
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Request { request, reply } => {
                let result = self.handle_request(request);
                // The caller may have given up waiting
                let _ = reply.send(result);
            },
            SessionCommand::ChannelClosed(channel) => {
                self.session.channel_closed(channel);
                self.channels.remove(&channel);
            },
        }
    }

    fn handle_request(&mut self, request: SessionRequest) -> Result<SessionReply, ActorError> {
        let kind = request.kind();
        let handled = self.session.handle(request, &self.env, &self.storage).inspect_err(|err| {
            tracing::error!(session = %self.session.key(), kind, error = %err, "request failed");
        })?;

        let reply = match &handled.outcome {
            SessionOutcome::Subscribed { subscription_id, channel: Some(channel) } => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.register(*channel, tx);
                SessionReply::Upgrade(SubscriptionStream::new(*subscription_id, rx))
            },
            outcome => SessionReply::Response(outcome.to_response()),
        };

        self.execute(handled.actions);
        Ok(reply)
    }

    fn fire_alarm(&mut self) {
        match self.session.alarm(&self.storage) {
            Ok(actions) => {
                self.retrying = false;
                self.execute(actions);
            },
            Err(err) => {
                self.retrying = true;
                tracing::error!(session = %self.session.key(), error = %err, "alarm failed");
            },
        }
    }

    fn register(&mut self, channel: ChannelId, tx: mpsc::UnboundedSender<ChannelMessage>) {
        let closed = tx.clone();
        let mailbox = self.mailbox_tx.clone();
        let watcher = tokio::spawn(async move {
            closed.closed().await;
            if let Some(mailbox) = mailbox.upgrade() {
                let _ = mailbox.send(SessionCommand::ChannelClosed(channel)).await;
            }
        });
        self.channels.insert(channel, ChannelEntry { tx, watcher });
    }

    fn execute(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Send { channel, message } => {
                    let Some(entry) = self.channels.get(&channel) else {
                        continue;
                    };
                    // Fails only once the subscriber is gone; ChannelClosed follows
                    if entry.tx.send(message).is_err() {
                        tracing::debug!(
                            session = %self.session.key(),
                            channel = channel.0,
                            "subscriber gone, message discarded"
                        );
                    }
                },
                SessionAction::Release { channel } => {
                    if let Some(entry) = self.channels.remove(&channel) {
                        entry.watcher.abort();
                    }
                },
            }
        }
    }
}

/// Tokio driver of one [`ReplayGuard`]. Exits once its state is reclaimed.
pub(crate) struct GuardTask<E, S> {
    guard: ReplayGuard,
    env: E,
    storage: S,
    mailbox: mpsc::Receiver<GuardCommand>,
    retrying: bool,
}

impl<E: Environment, S: Storage> GuardTask<E, S> {
    pub(crate) fn new(guard: ReplayGuard, env: E, storage: S, mailbox: mpsc::Receiver<GuardCommand>) -> Self {
        Self { guard, env, storage, mailbox, retrying: false }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let wake = next_wake(&self.env, &self.storage, self.guard.scope(), self.retrying);

            tokio::select! {
                command = self.mailbox.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                () = wake_after(self.env.clone(), wake) => {
                    if self.fire_alarm() == Some(GuardAlarm::Reclaimed) {
                        break;
                    }
                },
            }
        }

        // Refuse new work, then finish what was already queued
        self.mailbox.close();
        while let Ok(command) = self.mailbox.try_recv() {
            self.handle_command(command);
        }
        tracing::debug!(peer = %self.guard.peer(), "guard task stopped");
    }

    fn handle_command(&mut self, command: GuardCommand) {
        let GuardCommand { record, reply } = command;
        let result = self.guard.check_nonce_is_used(record, &self.env, &self.storage).inspect_err(|err| {
            tracing::error!(peer = %self.guard.peer(), error = %err, "nonce check failed");
        });
        let _ = reply.send(result);
    }

    fn fire_alarm(&mut self) -> Option<GuardAlarm> {
        let outcome = self
            .guard
            .alarm(&self.env, &self.storage)
            .inspect_err(|err| {
                tracing::error!(peer = %self.guard.peer(), error = %err, "alarm failed");
            })
            .ok();
        self.retrying = outcome.is_none();
        outcome
    }
}

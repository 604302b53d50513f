// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! A group of persistent, independently keyed state machines.
//!
//! Every entity owns an ordered inbound queue and a single task that drains
//! it. An event is first folded into a copy of the current state by
//! [`StateHandler::plan`]; the result is written to the settings store and
//! only then becomes the entity's state, after which [`StateHandler::handle`]
//! runs the side effects of the new state. A crash at any point therefore
//! replays from the last persisted snapshot, which makes delivery
//! at-least-once.
//!
//! The queue keeps draining while a handler is suspended. An event that
//! moves the entity on cancels the suspended handler.

use std::{
    fmt::Display, future::Future, hash::Hash, pin::Pin, str::FromStr, sync::Arc,
    time::Duration,
};

use ahash::HashMap;
use anyhow::{Context as _, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::db::{SettingsStore, SettingsStoreExt};

#[async_trait]
pub trait StateHandler: Send + Sync + 'static {
    type Id: Copy + Eq + Hash + Display + FromStr + Send + Sync + 'static;
    type State: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static;
    type Event: Send + 'static;

    /// Folds `event` into `state`. Must not have side effects; an error
    /// rejects the event and leaves the entity untouched.
    fn plan(&self, id: Self::Id, state: &mut Self::State, event: Self::Event) -> anyhow::Result<()>;

    /// Runs the work attached to `state` once it has been persisted. Results
    /// are reported back through `ctx`.
    async fn handle(
        &self,
        ctx: Context<Self::Id, Self::Event>,
        state: Self::State,
    ) -> anyhow::Result<()>;

    /// Terminal states never have their handler invoked.
    fn is_terminal(&self, state: &Self::State) -> bool;

    /// Called after a new snapshot has been persisted.
    fn on_transition(&self, _id: Self::Id, _from: &Self::State, _to: &Self::State) {}

    /// Whether the handler running for `from` must be cancelled and started
    /// over for `to`. Otherwise it keeps running and is invoked once more for
    /// the latest state when it returns.
    fn supersedes(&self, _from: &Self::State, _to: &Self::State) -> bool {
        true
    }
}

/// Handle passed to [`StateHandler::handle`].
pub struct Context<Id, E> {
    id: Id,
    sender: flume::Sender<E>,
    cancel: CancellationToken,
}

impl<Id: Copy + Display, E> Context<Id, E> {
    pub fn id(&self) -> Id {
        self.id
    }

    /// Queues an event for the entity this handler runs for.
    pub fn send(&self, event: E) -> anyhow::Result<()> {
        self.sender
            .send(event)
            .map_err(|_| anyhow::anyhow!("state machine {} has shut down", self.id))
    }

    /// Resolves when the owning group is stopping.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

struct Inner<DB, H: StateHandler> {
    db: DB,
    handler: H,
    prefix: String,
    machines: Mutex<HashMap<H::Id, flume::Sender<H::Event>>>,
    errored: Mutex<HashMap<H::Id, String>>,
    cancel: CancellationToken,
}

pub struct StateGroup<DB, H: StateHandler> {
    inner: Arc<Inner<DB, H>>,
    tasks: Mutex<JoinSet<()>>,
}

impl<DB, H> StateGroup<DB, H>
where
    DB: SettingsStore + Send + Sync + 'static,
    H: StateHandler,
{
    pub fn new(db: DB, handler: H, prefix: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                handler,
                prefix: prefix.into(),
                machines: Default::default(),
                errored: Default::default(),
                cancel: CancellationToken::new(),
            }),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn handler(&self) -> &H {
        &self.inner.handler
    }

    /// Queues `event` for entity `id` without waiting for it to be applied.
    ///
    /// The zero state of a previously unknown entity is persisted before the
    /// event is queued. Must be called from within a tokio runtime.
    pub fn send(&self, id: H::Id, event: H::Event) -> anyhow::Result<()> {
        if self.inner.cancel.is_cancelled() {
            bail!("state group {} is stopped", self.inner.prefix);
        }
        let mut machines = self.inner.machines.lock();
        let event = match machines.get(&id) {
            Some(sender) => match sender.send(event) {
                Ok(()) => return Ok(()),
                Err(flume::SendError(event)) => event,
            },
            None => event,
        };

        let key = self.inner.key(id);
        let state = match self.inner.db.read_obj::<H::State>(&key)? {
            Some(state) => state,
            None => {
                let state = H::State::default();
                self.inner
                    .db
                    .write_obj(&key, &state)
                    .with_context(|| format!("failed to create {key}"))?;
                state
            }
        };
        let (tx, rx) = flume::unbounded();
        // the receiver is alive, this cannot fail
        let _ = tx.send(event);
        machines.insert(id, tx.clone());
        self.spawn(id, state, tx, rx, false);
        Ok(())
    }

    /// Starts a loop for every persisted entity and re-runs the handler of
    /// each one that is not in a terminal state. Returns the number of
    /// entities restarted.
    pub fn restart(&self) -> anyhow::Result<usize> {
        let mut restarted = 0;
        for (id, state) in self.list()? {
            let mut machines = self.inner.machines.lock();
            if machines.contains_key(&id) {
                continue;
            }
            let (tx, rx) = flume::unbounded();
            machines.insert(id, tx.clone());
            let resume = !self.inner.handler.is_terminal(&state);
            self.spawn(id, state, tx, rx, resume);
            restarted += 1;
        }
        debug!("restarted {restarted} state machines under {}", self.inner.prefix);
        Ok(restarted)
    }

    fn spawn(
        &self,
        id: H::Id,
        state: H::State,
        tx: flume::Sender<H::Event>,
        rx: flume::Receiver<H::Event>,
        resume: bool,
    ) {
        let inner = self.inner.clone();
        self.tasks
            .lock()
            .spawn(async move { inner.run(id, state, tx, rx, resume).await });
    }

    /// Signals every entity loop to stop and waits for them to drain their
    /// queues, up to `timeout`.
    pub async fn stop(&self, timeout: Duration) -> anyhow::Result<()> {
        self.inner.cancel.cancel();
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let drained = tokio::time::timeout(timeout, async {
            while let Some(res) = tasks.join_next().await {
                if let Err(e) = res {
                    warn!("state machine task failed: {e}");
                }
            }
        })
        .await;
        self.inner.machines.lock().clear();
        drained.map_err(|_| {
            anyhow::anyhow!(
                "timed out stopping state group {} after {timeout:?}",
                self.inner.prefix
            )
        })
    }

    /// Reads the persisted snapshot of `id`.
    pub fn get(&self, id: H::Id) -> anyhow::Result<Option<H::State>> {
        self.inner.db.read_obj(&self.inner.key(id))
    }

    /// Every persisted entity. Snapshots that fail to decode are logged and
    /// skipped.
    pub fn list(&self) -> anyhow::Result<Vec<(H::Id, H::State)>> {
        let mut out = vec![];
        for key in self.inner.db.keys_with_prefix(&self.inner.prefix)? {
            let Some(id) = self.inner.parse_key(&key) else {
                warn!("ignoring malformed key {key}");
                continue;
            };
            match self.inner.db.read_obj::<H::State>(&key) {
                Ok(Some(state)) => out.push((id, state)),
                Ok(None) => {}
                Err(e) => error!("failed to decode {key}: {e:#}"),
            }
        }
        Ok(out)
    }

    /// The error that last rejected an event or failed a handler for `id`,
    /// cleared by the next successful transition.
    pub fn last_error(&self, id: H::Id) -> Option<String> {
        self.inner.errored.lock().get(&id).cloned()
    }

    pub fn errored(&self) -> Vec<H::Id> {
        self.inner.errored.lock().keys().copied().collect()
    }
}

impl<DB, H> Inner<DB, H>
where
    DB: SettingsStore + Send + Sync + 'static,
    H: StateHandler,
{
    fn key(&self, id: H::Id) -> String {
        format!("{}/{id}", self.prefix)
    }

    fn parse_key(&self, key: &str) -> Option<H::Id> {
        key.strip_prefix(&self.prefix)?
            .strip_prefix('/')?
            .parse()
            .ok()
    }

    async fn run(
        &self,
        id: H::Id,
        mut state: H::State,
        tx: flume::Sender<H::Event>,
        rx: flume::Receiver<H::Event>,
        resume: bool,
    ) {
        let mut running = resume.then(|| self.run_handler(id, state.clone(), &tx));
        // an event was applied while the handler ran and did not supersede it
        let mut rerun = false;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = rx.recv_async() => {
                    let Ok(event) = event else { return };
                    let prev = state.clone();
                    let accepted = self.apply(id, &mut state, event);
                    if self.handler.is_terminal(&state) {
                        running = None;
                        rerun = false;
                    } else if !accepted {
                        if running.is_none() && std::mem::take(&mut rerun) {
                            running = Some(self.run_handler(id, state.clone(), &tx));
                        }
                    } else if running.is_some() && !self.handler.supersedes(&prev, &state) {
                        rerun = true;
                    } else {
                        // dropping the previous handler cancels it
                        running = Some(self.run_handler(id, state.clone(), &tx));
                        rerun = false;
                    }
                }
                () = async {
                    match running.as_mut() {
                        Some(handler) => handler.await,
                        None => std::future::pending().await,
                    }
                } => {
                    running = None;
                    // a queued event decides what runs next
                    if rerun && rx.is_empty() {
                        rerun = false;
                        running = Some(self.run_handler(id, state.clone(), &tx));
                    }
                }
            }
        }
        drop(running);
        // apply whatever is already queued, but start no new work
        while let Ok(event) = rx.try_recv() {
            self.apply(id, &mut state, event);
        }
    }

    /// Plans and persists a single event. Returns whether it was accepted.
    fn apply(&self, id: H::Id, state: &mut H::State, event: H::Event) -> bool {
        let mut next = state.clone();
        let res = self
            .handler
            .plan(id, &mut next, event)
            .and_then(|()| self.db.write_obj(&self.key(id), &next));
        match res {
            Ok(()) => {
                self.handler.on_transition(id, state, &next);
                *state = next;
                self.errored.lock().remove(&id);
                true
            }
            Err(e) => {
                error!("{}/{id}: event rejected: {e:#}", self.prefix);
                self.errored.lock().insert(id, format!("{e:#}"));
                false
            }
        }
    }

    fn run_handler(
        &self,
        id: H::Id,
        state: H::State,
        tx: &flume::Sender<H::Event>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let ctx = Context {
            id,
            sender: tx.clone(),
            cancel: self.cancel.child_token(),
        };
        Box::pin(async move {
            if let Err(e) = self.handler.handle(ctx, state).await {
                error!("{}/{id}: handler failed: {e:#}", self.prefix);
                self.errored.lock().insert(id, format!("{e:#}"));
            }
        })
    }
}

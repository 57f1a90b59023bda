//! Per-user mailboxes: turns for one user run in arrival order, different
//! users run in parallel.

use super::{ConversationController, InboundEvent, Reply};
use crate::channels::Channel;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};

const MAILBOX_CAPACITY: usize = 32;
const DEFAULT_WORKER_IDLE: Duration = Duration::from_secs(300);
const FULL_MAILBOX_BACKOFF: Duration = Duration::from_millis(10);

type Mailboxes = Arc<Mutex<HashMap<String, mpsc::Sender<InboundEvent>>>>;

pub struct Dispatcher {
    controller: Arc<ConversationController>,
    outbound: mpsc::Sender<Reply>,
    mailboxes: Mailboxes,
    worker_idle: Duration,
}

impl Dispatcher {
    pub fn new(controller: Arc<ConversationController>, outbound: mpsc::Sender<Reply>) -> Self {
        Self {
            controller,
            outbound,
            mailboxes: Arc::new(Mutex::new(HashMap::new())),
            worker_idle: DEFAULT_WORKER_IDLE,
        }
    }

    /// How long a user's worker waits for the next event before exiting.
    pub fn with_worker_idle(mut self, idle: Duration) -> Self {
        self.worker_idle = idle;
        self
    }

    /// Users with a live worker.
    pub fn active_workers(&self) -> usize {
        self.mailboxes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Queue an event on its user's mailbox, starting a worker if none is running.
    pub async fn dispatch(&self, event: InboundEvent) {
        let mut event = event;
        loop {
            let full = {
                let mut boxes = self.mailboxes.lock().unwrap_or_else(|e| e.into_inner());
                let tx = boxes
                    .entry(event.user_id.clone())
                    .or_insert_with(|| self.spawn_worker(&event.user_id));
                match tx.try_send(event) {
                    Ok(()) => return,
                    Err(TrySendError::Full(returned)) => {
                        event = returned;
                        true
                    }
                    Err(TrySendError::Closed(returned)) => {
                        boxes.remove(&returned.user_id);
                        event = returned;
                        false
                    }
                }
            };
            if full {
                tracing::debug!(user_id = %event.user_id, "mailbox full, backing off");
                tokio::time::sleep(FULL_MAILBOX_BACKOFF).await;
            }
        }
    }

    fn spawn_worker(&self, user_id: &str) -> mpsc::Sender<InboundEvent> {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        tokio::spawn(worker(
            user_id.to_string(),
            rx,
            self.controller.clone(),
            self.outbound.clone(),
            self.mailboxes.clone(),
            self.worker_idle,
        ));
        tx
    }
}

async fn worker(
    user_id: String,
    mut rx: mpsc::Receiver<InboundEvent>,
    controller: Arc<ConversationController>,
    outbound: mpsc::Sender<Reply>,
    mailboxes: Mailboxes,
    idle: Duration,
) {
    tracing::debug!(%user_id, "worker started");
    loop {
        let event = match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(_) => {
                // Senders only push while holding the map lock, so an empty
                // queue checked under it stays empty until the entry is gone.
                let next = {
                    let mut boxes = mailboxes.lock().unwrap_or_else(|e| e.into_inner());
                    match rx.try_recv() {
                        Ok(event) => Some(event),
                        Err(_) => {
                            boxes.remove(&user_id);
                            None
                        }
                    }
                };
                match next {
                    Some(event) => event,
                    None => break,
                }
            }
        };

        let reply = controller.handle(&event).await;
        if reply.prompts.is_empty() {
            continue;
        }
        if outbound.send(reply).await.is_err() {
            tracing::warn!(%user_id, "outbound queue closed, worker exiting");
            break;
        }
    }
    tracing::debug!(%user_id, "worker stopped");
}

/// Drive a channel until it closes or ctrl-c: inbound events go through the
/// dispatcher, replies and expiry notices go back out through the channel.
pub async fn run(
    channel: Arc<dyn Channel>,
    controller: Arc<ConversationController>,
    sweep_every: Duration,
) -> anyhow::Result<()> {
    let (in_tx, mut in_rx) = mpsc::channel::<InboundEvent>(256);
    let (out_tx, mut out_rx) = mpsc::channel::<Reply>(256);
    let dispatcher = Dispatcher::new(controller.clone(), out_tx.clone());

    let listener = {
        let channel = channel.clone();
        tokio::spawn(async move {
            if let Err(e) = channel.listen(in_tx).await {
                tracing::error!(channel = channel.name(), "listener stopped: {e:#}");
            }
        })
    };
    let sender = {
        let channel = channel.clone();
        tokio::spawn(async move {
            while let Some(reply) = out_rx.recv().await {
                if let Err(e) = channel.send(&reply).await {
                    tracing::warn!(channel = channel.name(), user_id = %reply.user_id, "send failed: {e:#}");
                }
            }
        })
    };

    let mut sweep = tokio::time::interval(sweep_every);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tracing::info!(channel = channel.name(), "conversation loop running");

    loop {
        tokio::select! {
            event = in_rx.recv() => match event {
                Some(event) => dispatcher.dispatch(event).await,
                None => {
                    tracing::info!(channel = channel.name(), "inbound stream ended");
                    break;
                }
            },
            _ = sweep.tick() => {
                for reply in controller.sweep(Utc::now()) {
                    if out_tx.send(reply).await.is_err() {
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
        }
    }

    listener.abort();
    drop(dispatcher);
    drop(out_tx);
    // Workers still hold outbound senders; give in-flight replies a moment.
    let _ = tokio::time::timeout(Duration::from_secs(5), sender).await;
    Ok(())
}

//! Execution-engine side of the canvas.
//!
//! - The document lives behind [`SharedDocument`]; every access is a short
//!   closure run under the lock.
//! - Mutations arrive as [`EngineCommand`]s on a bounded channel and are
//!   applied by the engine thread ([`ExecutionEngine`]).
//! - The engine reports back through two queues drained by the UI once per
//!   tick: document notices (coalescing on overflow) and plain-data UI tasks.

mod execution;

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use crossbeam_queue::ArrayQueue;
use document_protocol::DocumentCommand;
use protocol::{DocumentNotice, NoticeBatch, UiTask, UiTaskBatch, merge_unique_by_key};
use rtrb::{Consumer, Producer, RingBuffer};

pub use execution::{EngineCommand, EngineWorker, ExecutionEngine};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("engine command queue is full")]
    CommandQueueFull,
    #[error("engine thread has stopped")]
    Disconnected,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(String),
    #[error("engine thread panicked")]
    Panicked,
}

/// Document shared between the UI thread and the engine thread.
pub struct SharedDocument<D> {
    inner: Arc<Mutex<D>>,
}

impl<D> Clone for SharedDocument<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D> SharedDocument<D> {
    pub fn new(document: D) -> Self {
        Self {
            inner: Arc::new(Mutex::new(document)),
        }
    }

    /// Runs `read` under the document lock. Keep the closure short: the
    /// engine thread is blocked for its duration.
    pub fn read<R>(&self, read: impl FnOnce(&D) -> R) -> R {
        let document = self
            .inner
            .lock()
            .unwrap_or_else(|_| panic!("document lock poisoned"));
        read(&document)
    }

    pub fn write<R>(&self, write: impl FnOnce(&mut D) -> R) -> R {
        let mut document = self
            .inner
            .lock()
            .unwrap_or_else(|_| panic!("document lock poisoned"));
        write(&mut document)
    }
}

struct SharedNoticeQueue {
    queue: ArrayQueue<DocumentNotice>,
    overflowed: AtomicBool,
    notify_sender: Sender<()>,
    notify_receiver: Receiver<()>,
    pushed: AtomicU64,
    dropped: AtomicU64,
}

/// Engine-side producer of document notices.
pub struct NoticeSender {
    shared: Arc<SharedNoticeQueue>,
}

impl NoticeSender {
    /// Never blocks. When the queue is full the notice is dropped and an
    /// overflow marker makes the next drain request a full reconciliation.
    pub fn push(&self, notice: DocumentNotice) {
        match self.shared.queue.push(notice) {
            Ok(()) => {
                self.shared.pushed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.shared.overflowed.store(true, Ordering::Release);
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        match self.shared.notify_sender.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                tracing::debug!("notice receiver dropped");
            }
        }
    }

    pub fn dropped_notices(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

/// UI-side consumer of document notices.
pub struct NoticeReceiver {
    shared: Arc<SharedNoticeQueue>,
    // Owned by the UI thread.
    _not_send: PhantomData<*const ()>,
}

impl NoticeReceiver {
    /// Collapses every pending notice into one batch.
    pub fn drain(&self) -> NoticeBatch {
        let mut batch = NoticeBatch::default();
        while let Some(notice) = self.shared.queue.pop() {
            batch.push(notice);
        }
        if self.shared.overflowed.swap(false, Ordering::AcqRel) {
            batch.push(DocumentNotice::Overflowed);
        }
        batch
    }

    /// Waits up to `timeout` for at least one notice, then drains.
    pub fn drain_with_wait(&self, timeout: Duration) -> NoticeBatch {
        let batch = self.drain();
        if !batch.is_empty() || timeout.is_zero() {
            return batch;
        }
        match self.shared.notify_receiver.recv_timeout(timeout) {
            Ok(()) => self.drain(),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => batch,
        }
    }

    pub fn pushed_notices(&self) -> u64 {
        self.shared.pushed.load(Ordering::Relaxed)
    }
}

pub struct UiTaskSender {
    producer: Producer<UiTask>,
    dropped: u64,
}

impl UiTaskSender {
    /// Drops the task when the ring is full; tasks are advisory.
    pub fn push(&mut self, task: UiTask) {
        if let Err(rtrb::PushError::Full(task)) = self.producer.push(task) {
            self.dropped += 1;
            tracing::trace!(?task, "ui task ring full, dropping task");
        }
    }

    pub fn dropped_tasks(&self) -> u64 {
        self.dropped
    }
}

pub struct UiTaskReceiver {
    consumer: Consumer<UiTask>,
}

impl UiTaskReceiver {
    /// Drains pending tasks, dropping repeats of the same task.
    ///
    /// Liveness of each task's target is checked by the caller, which owns
    /// the scene.
    pub fn drain(&mut self) -> UiTaskBatch {
        let mut batch = UiTaskBatch::new();
        let pending = self.consumer.slots();
        if pending == 0 {
            return batch;
        }
        let mut tasks = Vec::with_capacity(pending);
        while let Ok(task) = self.consumer.pop() {
            tasks.push(task);
        }
        merge_unique_by_key(&mut batch, tasks);
        batch
    }
}

pub struct CommandSender {
    sender: Sender<EngineCommand>,
}

impl Clone for CommandSender {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl CommandSender {
    pub fn submit(&self, command: impl Into<EngineCommand>) -> Result<(), EngineError> {
        match self.sender.try_send(command.into()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(EngineError::CommandQueueFull),
            Err(TrySendError::Disconnected(_)) => Err(EngineError::Disconnected),
        }
    }

    /// Blocks while the queue is full.
    pub fn submit_blocking(&self, command: impl Into<EngineCommand>) -> Result<(), EngineError> {
        self.sender
            .send(command.into())
            .map_err(|_| EngineError::Disconnected)
    }
}

impl From<DocumentCommand> for EngineCommand {
    fn from(command: DocumentCommand) -> Self {
        EngineCommand::Document(command)
    }
}

pub struct UiChannels {
    pub commands: CommandSender,
    pub notices: NoticeReceiver,
    pub tasks: UiTaskReceiver,
}

pub struct EngineChannels {
    pub commands: Receiver<EngineCommand>,
    pub notices: NoticeSender,
    pub tasks: UiTaskSender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCapacities {
    pub commands: usize,
    pub notices: usize,
    pub tasks: usize,
}

impl Default for ChannelCapacities {
    fn default() -> Self {
        Self {
            commands: 256,
            notices: 64,
            tasks: 256,
        }
    }
}

pub fn create_engine_channels(capacities: ChannelCapacities) -> (UiChannels, EngineChannels) {
    assert!(
        capacities.commands > 0,
        "command capacity must be greater than zero"
    );
    assert!(
        capacities.notices > 0,
        "notice capacity must be greater than zero"
    );
    assert!(
        capacities.tasks > 0,
        "ui task capacity must be greater than zero"
    );

    let (notify_sender, notify_receiver) = bounded(1);
    let shared_notices = Arc::new(SharedNoticeQueue {
        queue: ArrayQueue::new(capacities.notices),
        overflowed: AtomicBool::new(false),
        notify_sender,
        notify_receiver,
        pushed: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
    });
    let (command_sender, command_receiver) = bounded(capacities.commands);
    let (task_producer, task_consumer) = RingBuffer::new(capacities.tasks);

    let ui_channels = UiChannels {
        commands: CommandSender {
            sender: command_sender,
        },
        notices: NoticeReceiver {
            shared: shared_notices.clone(),
            _not_send: PhantomData,
        },
        tasks: UiTaskReceiver {
            consumer: task_consumer,
        },
    };
    let engine_channels = EngineChannels {
        commands: command_receiver,
        notices: NoticeSender {
            shared: shared_notices,
        },
        tasks: UiTaskSender {
            producer: task_producer,
            dropped: 0,
        },
    };
    (ui_channels, engine_channels)
}

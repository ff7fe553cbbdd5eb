//! Bounded work queue of index tasks with a single batched consumer.
//!
//! Producers wait only for buffer space. The consumer drains up to
//! `batch_length` tasks at a time and hands them to a [`BatchHandler`].
//!
//! With a journal attached every task is written to the metadata store
//! before it enters the channel and deleted once its batch was handled.
//! Entries left over from an earlier run are replayed before live tasks.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use code_index_storage::Storage;
use code_index_types::{IndexTask, QueueKind, QueueSettings};

use crate::blocking::run_blocking;
use crate::error::IndexerError;

/// Consumer side of the queue.
#[async_trait]
pub trait BatchHandler: Send + Sync + 'static {
    /// Apply a batch of well-formed tasks. Per-task failures are the
    /// handler's to report.
    async fn handle(&self, batch: Vec<IndexTask>);
}

#[derive(Debug, Clone, Copy)]
struct QueuedTask {
    task: IndexTask,
    /// Journal sequence, when journaled
    sequence: Option<u64>,
}

/// Work queue of [`IndexTask`]s.
pub struct TaskQueue {
    name: String,
    batch_length: usize,
    sender: mpsc::Sender<QueuedTask>,
    receiver: Mutex<Option<mpsc::Receiver<QueuedTask>>>,
    journal: Option<Arc<Storage>>,
    /// Journal entries below this sequence predate this queue
    replay_bound: u64,
    shutdown: CancellationToken,
}

impl TaskQueue {
    /// Create a queue. `journal` is used only for the persistent kind.
    pub fn new(
        name: impl Into<String>,
        settings: &QueueSettings,
        journal: Option<Arc<Storage>>,
        shutdown: CancellationToken,
    ) -> Self {
        let name = name.into();
        let journal = match (settings.kind, journal) {
            (QueueKind::Persistent, Some(storage)) => Some(storage),
            (QueueKind::Persistent, None) => {
                warn!(queue = %name, "Persistent queue has no journal, falling back to channel");
                None
            }
            (QueueKind::Channel, _) => None,
        };
        let replay_bound = journal
            .as_ref()
            .map(|storage| storage.queue_sequence_bound())
            .unwrap_or(0);

        let (sender, receiver) = mpsc::channel(settings.length.max(1));

        debug!(
            queue = %name,
            kind = %settings.kind,
            length = settings.length,
            batch_length = settings.batch_length,
            replay_bound,
            "Created task queue"
        );

        Self {
            name,
            batch_length: settings.batch_length.max(1),
            sender,
            receiver: Mutex::new(Some(receiver)),
            journal,
            replay_bound,
            shutdown,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_persistent(&self) -> bool {
        self.journal.is_some()
    }

    /// Number of tasks waiting in the in-memory buffer.
    pub fn buffered(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    async fn journal_task(&self, task: IndexTask) -> Result<Option<u64>, IndexerError> {
        match &self.journal {
            Some(storage) => {
                let storage = storage.clone();
                let sequence =
                    run_blocking(move || Ok(storage.enqueue_task(&task)?)).await?;
                Ok(Some(sequence))
            }
            None => Ok(None),
        }
    }

    /// Enqueue a task, waiting while the buffer is full.
    ///
    /// Fails with [`IndexerError::QueueClosed`] once shutdown has begun.
    pub async fn push(&self, task: IndexTask) -> Result<(), IndexerError> {
        task.validate()
            .map_err(|e| IndexerError::InvalidTask(e.to_string()))?;

        let permit = tokio::select! {
            biased;

            _ = self.shutdown.cancelled() => return Err(IndexerError::QueueClosed),
            permit = self.sender.reserve() => permit.map_err(|_| IndexerError::QueueClosed)?,
        };

        let sequence = self.journal_task(task).await?;
        permit.send(QueuedTask { task, sequence });
        debug!(queue = %self.name, task = %task, "Pushed task");
        Ok(())
    }

    /// Enqueue a task without waiting.
    pub async fn try_push(&self, task: IndexTask) -> Result<(), IndexerError> {
        task.validate()
            .map_err(|e| IndexerError::InvalidTask(e.to_string()))?;
        if self.shutdown.is_cancelled() {
            return Err(IndexerError::QueueClosed);
        }

        let permit = self.sender.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => IndexerError::QueueFull,
            mpsc::error::TrySendError::Closed(()) => IndexerError::QueueClosed,
        })?;

        let sequence = self.journal_task(task).await?;
        permit.send(QueuedTask { task, sequence });
        Ok(())
    }

    /// Attach the single consumer and start its loop.
    pub fn register_consumer(
        self: &Arc<Self>,
        handler: Arc<dyn BatchHandler>,
    ) -> Result<JoinHandle<()>, IndexerError> {
        let receiver = self
            .receiver
            .lock()
            .map_err(|_| IndexerError::ConsumerAlreadyRegistered)?
            .take()
            .ok_or(IndexerError::ConsumerAlreadyRegistered)?;

        info!(queue = %self.name, "Registered queue consumer");
        let queue = self.clone();
        Ok(tokio::spawn(async move {
            queue.consume(receiver, handler).await;
        }))
    }

    async fn consume(
        &self,
        mut receiver: mpsc::Receiver<QueuedTask>,
        handler: Arc<dyn BatchHandler>,
    ) {
        if let Some(storage) = &self.journal {
            if let Err(e) = self.replay(storage.clone(), handler.as_ref()).await {
                error!(queue = %self.name, error = %e, "Failed to replay journaled tasks");
            }
        }

        loop {
            let first = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                item = receiver.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            let mut batch = vec![first];
            while batch.len() < self.batch_length {
                match receiver.try_recv() {
                    Ok(item) => batch.push(item),
                    Err(_) => break,
                }
            }

            self.dispatch(batch, handler.as_ref()).await;
        }

        receiver.close();
        let mut remaining = 0;
        while receiver.try_recv().is_ok() {
            remaining += 1;
        }
        if remaining > 0 {
            if self.is_persistent() {
                info!(queue = %self.name, remaining, "Queue stopped, remaining tasks stay journaled");
            } else {
                warn!(queue = %self.name, remaining, "Queue stopped, dropping buffered tasks");
            }
        } else {
            info!(queue = %self.name, "Queue stopped");
        }
    }

    /// Replay journal entries written before this queue was created.
    async fn replay(
        &self,
        storage: Arc<Storage>,
        handler: &dyn BatchHandler,
    ) -> Result<(), IndexerError> {
        let bound = self.replay_bound;
        let mut cursor = 0;
        let mut replayed = 0;

        while cursor < bound {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            let limit = self.batch_length;
            let fetch = storage.clone();
            let entries =
                run_blocking(move || Ok(fetch.get_queue_entries(cursor, limit)?)).await?;

            if entries.is_empty() {
                break;
            }

            let mut reached_bound = false;
            let mut batch = Vec::with_capacity(entries.len());
            for (sequence, bytes) in entries {
                if sequence >= bound {
                    reached_bound = true;
                    break;
                }
                cursor = sequence + 1;
                match IndexTask::from_bytes(&bytes) {
                    Ok(task) => batch.push(QueuedTask {
                        task,
                        sequence: Some(sequence),
                    }),
                    Err(e) => {
                        warn!(queue = %self.name, sequence, error = %e, "Dropping undecodable journal entry");
                        self.ack(vec![sequence]).await;
                    }
                }
            }

            if !batch.is_empty() {
                replayed += batch.len();
                self.dispatch(batch, handler).await;
            }
            if reached_bound {
                break;
            }
        }

        if replayed > 0 {
            info!(queue = %self.name, replayed, "Replayed journaled tasks");
        }
        Ok(())
    }

    async fn dispatch(&self, batch: Vec<QueuedTask>, handler: &dyn BatchHandler) {
        let mut tasks = Vec::with_capacity(batch.len());
        let mut sequences = Vec::with_capacity(batch.len());

        for item in batch {
            if let Some(sequence) = item.sequence {
                sequences.push(sequence);
            }
            if item.task.is_valid() {
                tasks.push(item.task);
            } else {
                warn!(queue = %self.name, task = %item.task, "Dropping malformed task");
            }
        }

        if !tasks.is_empty() {
            debug!(queue = %self.name, count = tasks.len(), "Handling batch");
            handler.handle(tasks).await;
        }

        self.ack(sequences).await;
    }

    async fn ack(&self, sequences: Vec<u64>) {
        let Some(storage) = &self.journal else {
            return;
        };
        if sequences.is_empty() {
            return;
        }
        let storage = storage.clone();
        if let Err(e) = run_blocking(move || Ok(storage.ack_queue_entries(&sequences)?)).await {
            error!(queue = %self.name, error = %e, "Failed to acknowledge journaled tasks");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct RecordingHandler {
        batches: AsyncMutex<Vec<Vec<IndexTask>>>,
    }

    impl RecordingHandler {
        async fn tasks(&self) -> Vec<IndexTask> {
            self.batches.lock().await.iter().flatten().copied().collect()
        }

        async fn wait_for(&self, count: usize) -> Vec<IndexTask> {
            for _ in 0..200 {
                let tasks = self.tasks().await;
                if tasks.len() >= count {
                    return tasks;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            self.tasks().await
        }
    }

    #[async_trait]
    impl BatchHandler for RecordingHandler {
        async fn handle(&self, batch: Vec<IndexTask>) {
            self.batches.lock().await.push(batch);
        }
    }

    fn channel_queue(length: usize, batch_length: usize) -> Arc<TaskQueue> {
        let settings = QueueSettings::default()
            .with_kind(QueueKind::Channel)
            .with_length(length)
            .with_batch_length(batch_length);
        Arc::new(TaskQueue::new("test", &settings, None, CancellationToken::new()))
    }

    #[tokio::test]
    async fn test_push_and_consume_in_order() {
        let queue = channel_queue(20, 20);
        let handler = Arc::new(RecordingHandler::default());
        queue.register_consumer(handler.clone()).unwrap();

        for id in 1..=5 {
            queue.push(IndexTask::index(id)).await.unwrap();
        }
        let tasks = handler.wait_for(5).await;
        let ids: Vec<_> = tasks.iter().map(|t| t.repo_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_batches_respect_batch_length() {
        let queue = channel_queue(20, 2);
        for id in 1..=5 {
            queue.push(IndexTask::index(id)).await.unwrap();
        }

        let handler = Arc::new(RecordingHandler::default());
        queue.register_consumer(handler.clone()).unwrap();
        handler.wait_for(5).await;

        let batches = handler.batches.lock().await;
        assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= 2));
        assert_eq!(batches[0].len(), 2);
    }

    #[tokio::test]
    async fn test_second_consumer_rejected() {
        let queue = channel_queue(4, 4);
        queue
            .register_consumer(Arc::new(RecordingHandler::default()))
            .unwrap();
        let second = queue.register_consumer(Arc::new(RecordingHandler::default()));
        assert!(matches!(second, Err(IndexerError::ConsumerAlreadyRegistered)));
    }

    #[tokio::test]
    async fn test_invalid_task_rejected() {
        let queue = channel_queue(4, 4);
        let result = queue.push(IndexTask::index(0)).await;
        assert!(matches!(result, Err(IndexerError::InvalidTask(_))));
        assert_eq!(queue.buffered(), 0);
    }

    #[tokio::test]
    async fn test_try_push_full() {
        let queue = channel_queue(2, 2);
        queue.try_push(IndexTask::index(1)).await.unwrap();
        queue.try_push(IndexTask::index(2)).await.unwrap();
        assert!(matches!(
            queue.try_push(IndexTask::index(3)).await,
            Err(IndexerError::QueueFull)
        ));
        assert_eq!(queue.buffered(), 2);
    }

    #[tokio::test]
    async fn test_push_unblocks_on_shutdown() {
        let shutdown = CancellationToken::new();
        let settings = QueueSettings::default()
            .with_kind(QueueKind::Channel)
            .with_length(1);
        let queue = Arc::new(TaskQueue::new("test", &settings, None, shutdown.clone()));
        queue.push(IndexTask::index(1)).await.unwrap();

        let blocked = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(IndexTask::index(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();

        let result = blocked.await.unwrap();
        assert!(matches!(result, Err(IndexerError::QueueClosed)));
    }

    #[tokio::test]
    async fn test_consumer_stops_on_shutdown() {
        let shutdown = CancellationToken::new();
        let settings = QueueSettings::default().with_kind(QueueKind::Channel);
        let queue = Arc::new(TaskQueue::new("test", &settings, None, shutdown.clone()));
        let consumer = queue
            .register_consumer(Arc::new(RecordingHandler::default()))
            .unwrap();

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_persistent_acks_handled_tasks() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp_dir.path()).unwrap());
        let settings = QueueSettings::default();
        let queue = Arc::new(TaskQueue::new(
            "test",
            &settings,
            Some(storage.clone()),
            CancellationToken::new(),
        ));
        assert!(queue.is_persistent());

        let handler = Arc::new(RecordingHandler::default());
        queue.register_consumer(handler.clone()).unwrap();
        queue.push(IndexTask::index(1)).await.unwrap();
        queue.push(IndexTask::delete(2)).await.unwrap();
        handler.wait_for(2).await;

        for _ in 0..100 {
            if storage.queue_len().unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(storage.queue_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persistent_replays_previous_run() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp_dir.path()).unwrap());
        storage.enqueue_task(&IndexTask::index(7)).unwrap();
        storage.put_queue_entry(b"garbage").unwrap();
        storage.enqueue_task(&IndexTask::delete(8)).unwrap();

        let queue = Arc::new(TaskQueue::new(
            "test",
            &QueueSettings::default(),
            Some(storage.clone()),
            CancellationToken::new(),
        ));
        let handler = Arc::new(RecordingHandler::default());
        queue.register_consumer(handler.clone()).unwrap();
        queue.push(IndexTask::index(9)).await.unwrap();

        let tasks = handler.wait_for(3).await;
        assert_eq!(
            tasks,
            vec![IndexTask::index(7), IndexTask::delete(8), IndexTask::index(9)]
        );
    }
}

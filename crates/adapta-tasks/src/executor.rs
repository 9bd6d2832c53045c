use crate::store::TaskStore;
use crate::task::{TaskRecord, TaskState, TaskUpdate};
use adapta_core::{
    AdaptaError, AdaptaResult, AgentAdapter, BackendError, BackendResult, TextStream,
};
use futures_util::stream::{BoxStream, Stream};
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{watch, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

struct ExecutorInner {
    adapter: Arc<dyn AgentAdapter>,
    store: Arc<dyn TaskStore>,
    signals: Mutex<HashMap<Uuid, watch::Sender<bool>>>,
    closed: AtomicBool,
    gate: Option<DispatchGate>,
}

/// Queue in front of a single-flight adapter.
struct DispatchGate {
    turn: Arc<tokio::sync::Mutex<()>>,
    /// Task holding the turn. Held across the adapter's cancel hook, so the
    /// turn cannot pass to another task while a kill is being delivered.
    running: tokio::sync::Mutex<Option<Uuid>>,
}

/// Permission to dispatch to the adapter.
enum Turn {
    Shared,
    Exclusive(OwnedMutexGuard<()>),
}

/// Drives tasks through one adapter and records their lifecycle.
///
/// Cloning is cheap; clones share the adapter, store and cancel signals.
/// There is no executor-level timeout: each adapter enforces its own.
#[derive(Clone)]
pub struct TaskExecutor {
    inner: Arc<ExecutorInner>,
}

impl TaskExecutor {
    /// Creates an executor dispatching to `adapter` and recording in `store`.
    ///
    /// Tasks for a [single-flight](AgentAdapter::single_flight) adapter wait
    /// in `Submitted` until the adapter is free.
    pub fn new(adapter: Arc<dyn AgentAdapter>, store: Arc<dyn TaskStore>) -> Self {
        let gate = adapter.single_flight().then(|| DispatchGate {
            turn: Arc::new(tokio::sync::Mutex::new(())),
            running: tokio::sync::Mutex::new(None),
        });
        Self {
            inner: Arc::new(ExecutorInner {
                adapter,
                store,
                signals: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                gate,
            }),
        }
    }

    /// The adapter tasks are dispatched to.
    pub fn adapter(&self) -> &Arc<dyn AgentAdapter> {
        &self.inner.adapter
    }

    /// The store records are kept in.
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.inner.store
    }

    /// Creates a task and starts it in the background. Returns immediately.
    pub async fn submit(&self, input: &str, context_id: Option<&str>) -> AdaptaResult<Uuid> {
        let (id, cancel_rx) = self.create(input, context_id).await?;
        let executor = self.clone();
        let input = input.to_string();
        let context_id = context_id.map(str::to_string);
        tokio::spawn(async move {
            if let Err(e) = executor.drive(id, &input, context_id.as_deref(), cancel_rx).await {
                warn!(task_id = %id, error = %e, "Task run aborted");
            }
        });
        Ok(id)
    }

    /// Creates a task and waits for it to reach a terminal state.
    ///
    /// The run itself is spawned, so dropping this future does not strand
    /// the record in `Working`.
    pub async fn run(&self, input: &str, context_id: Option<&str>) -> AdaptaResult<TaskRecord> {
        let (id, cancel_rx) = self.create(input, context_id).await?;
        let executor = self.clone();
        let input = input.to_string();
        let context_id = context_id.map(str::to_string);
        tokio::spawn(async move {
            executor
                .drive(id, &input, context_id.as_deref(), cancel_rx)
                .await
        })
        .await
        .map_err(|e| BackendError::fault(format!("task run panicked: {e}")))?
    }

    /// Creates a task whose chunks are pulled by the returned stream.
    ///
    /// Fails with [`AdaptaError::StreamingUnsupported`] if the adapter has no
    /// streaming capability. Nothing runs until the stream is first polled;
    /// dropping it unfinished cancels the task.
    pub async fn stream(
        &self,
        input: &str,
        context_id: Option<&str>,
    ) -> AdaptaResult<(Uuid, TaskStream)> {
        if self.inner.adapter.streaming().is_none() {
            return Err(AdaptaError::StreamingUnsupported(
                self.inner.adapter.kind().to_string(),
            ));
        }
        let (id, cancel_rx) = self.create(input, context_id).await?;
        let finished = Arc::new(AtomicBool::new(false));
        let pump = StreamPump {
            executor: self.clone(),
            id,
            input: input.to_string(),
            context_id: context_id.map(str::to_string),
            cancel_rx,
            finished: Arc::clone(&finished),
            phase: Phase::Start,
            turn: None,
        };
        let chunks = futures_util::stream::unfold(pump, |mut pump| async move {
            pump.next_chunk().await.map(|item| (item, pump))
        })
        .boxed();

        Ok((
            id,
            TaskStream {
                id,
                chunks,
                finished,
                executor: self.clone(),
            },
        ))
    }

    /// Fetches a task record.
    pub async fn get(&self, id: Uuid) -> AdaptaResult<TaskRecord> {
        self.inner
            .store
            .get(id)
            .await?
            .ok_or(AdaptaError::TaskNotFound(id))
    }

    /// All task records, oldest first.
    pub async fn list(&self) -> AdaptaResult<Vec<TaskRecord>> {
        self.inner.store.list().await
    }

    /// Deletes a finished task.
    pub async fn remove(&self, id: Uuid) -> AdaptaResult<TaskRecord> {
        let record = self.inner.store.remove(id).await?;
        info!(task_id = %id, state = %record.state, "Task removed");
        Ok(record)
    }

    /// Requests cancellation.
    ///
    /// A terminal task is returned unchanged. Otherwise the record moves to
    /// `Canceled` first; if completion got there first, the completed record
    /// is returned instead. Only after the record is `Canceled` is the running
    /// work told to stop.
    pub async fn cancel(&self, id: Uuid) -> AdaptaResult<TaskRecord> {
        let current = self.get(id).await?;
        if current.state.is_terminal() {
            debug!(task_id = %id, state = %current.state, "Cancel on finished task is a no-op");
            return Ok(current);
        }

        let record = match self.inner.store.transition(id, TaskUpdate::Cancel).await {
            Ok(record) => record,
            Err(AdaptaError::InvalidTransition { .. }) => {
                debug!(task_id = %id, "Cancel lost the race to completion");
                return self.get(id).await;
            }
            Err(e) => return Err(e),
        };
        info!(task_id = %id, from = %current.state, "Task canceled");

        if current.state == TaskState::Working {
            self.interrupt(id).await;
        }
        if let Some(signal) = self.inner.signals.lock().remove(&id) {
            signal.send_replace(true);
        }
        Ok(record)
    }

    /// Cancels every unfinished task, then closes the adapter. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let outstanding: Vec<Uuid> = self.inner.signals.lock().keys().copied().collect();
        info!(outstanding = outstanding.len(), "Closing task executor");
        for id in outstanding {
            if let Err(e) = self.cancel(id).await {
                warn!(task_id = %id, error = %e, "Failed to cancel task on close");
            }
        }
        self.inner.adapter.close().await;
    }

    async fn create(
        &self,
        input: &str,
        context_id: Option<&str>,
    ) -> AdaptaResult<(Uuid, watch::Receiver<bool>)> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(AdaptaError::Config("task executor is closed".into()));
        }
        let record = TaskRecord::new(input, context_id.map(str::to_string));
        let id = record.id;
        self.inner.store.insert(record).await?;

        let (tx, rx) = watch::channel(false);
        self.inner.signals.lock().insert(id, tx);
        info!(task_id = %id, adapter = self.inner.adapter.kind(), "Task submitted");
        Ok((id, rx))
    }

    /// Calls the adapter's cancel hook for a dispatched task.
    ///
    /// The hook acts on whatever the instance is running, so with a gate it
    /// only fires while `id` still holds the turn.
    async fn interrupt(&self, id: Uuid) {
        let Some(cancellable) = self.inner.adapter.cancellation() else {
            return;
        };
        match &self.inner.gate {
            Some(gate) => {
                let running = gate.running.lock().await;
                if *running == Some(id) {
                    cancellable.cancel().await;
                } else {
                    debug!(task_id = %id, "Task no longer holds the adapter, cancel hook skipped");
                }
            }
            None => cancellable.cancel().await,
        }
    }

    /// Waits until the adapter is free for `id`. `None` means the task was
    /// canceled while queued.
    async fn take_turn(&self, id: Uuid, cancel_rx: &mut watch::Receiver<bool>) -> Option<Turn> {
        let Some(gate) = &self.inner.gate else {
            return Some(Turn::Shared);
        };
        let turn = tokio::select! {
            turn = Arc::clone(&gate.turn).lock_owned() => turn,
            _ = cancel_rx.wait_for(|canceled| *canceled) => return None,
        };
        *gate.running.lock().await = Some(id);
        debug!(task_id = %id, "Adapter turn acquired");
        Some(Turn::Exclusive(turn))
    }

    async fn end_turn(&self, turn: Turn) {
        if let (Some(gate), Turn::Exclusive(guard)) = (&self.inner.gate, turn) {
            *gate.running.lock().await = None;
            drop(guard);
        }
    }

    fn release(&self, id: Uuid) {
        self.inner.signals.lock().remove(&id);
    }

    /// Moves `id` to `Working`. `false` means it was canceled first.
    async fn start(&self, id: Uuid) -> AdaptaResult<bool> {
        match self.inner.store.transition(id, TaskUpdate::Start).await {
            Ok(_) => {
                info!(task_id = %id, "Task working");
                Ok(true)
            }
            Err(AdaptaError::InvalidTransition { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Records the outcome unless the task already ended (canceled).
    async fn finish(&self, id: Uuid, update: TaskUpdate) -> AdaptaResult<TaskRecord> {
        let target = update.target();
        match self.inner.store.transition(id, update).await {
            Ok(record) => {
                match &record.error {
                    Some(e) => warn!(task_id = %id, error = %e, "Task failed"),
                    None => info!(task_id = %id, state = %target, "Task finished"),
                }
                Ok(record)
            }
            Err(AdaptaError::InvalidTransition { .. }) => {
                debug!(task_id = %id, "Task already terminal, result discarded");
                self.get(id).await
            }
            Err(e) => Err(e),
        }
    }

    async fn drive(
        &self,
        id: Uuid,
        input: &str,
        context_id: Option<&str>,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> AdaptaResult<TaskRecord> {
        let result = self.drive_inner(id, input, context_id, &mut cancel_rx).await;
        self.release(id);
        result
    }

    async fn drive_inner(
        &self,
        id: Uuid,
        input: &str,
        context_id: Option<&str>,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> AdaptaResult<TaskRecord> {
        let Some(turn) = self.take_turn(id, cancel_rx).await else {
            debug!(task_id = %id, "Task canceled while queued");
            return self.get(id).await;
        };
        let result = self.dispatch(id, input, context_id, cancel_rx).await;
        self.end_turn(turn).await;
        result
    }

    async fn dispatch(
        &self,
        id: Uuid,
        input: &str,
        context_id: Option<&str>,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> AdaptaResult<TaskRecord> {
        if !self.start(id).await? {
            return self.get(id).await;
        }

        let outcome = tokio::select! {
            result = self.inner.adapter.invoke(input, context_id) => Some(result),
            _ = cancel_rx.wait_for(|canceled| *canceled) => None,
        };

        match outcome {
            Some(Ok(output)) => self.finish(id, TaskUpdate::Complete(output)).await,
            Some(Err(e)) => self.finish(id, TaskUpdate::Fail(e)).await,
            None => self.get(id).await,
        }
    }
}

enum Phase {
    Start,
    Pulling { chunks: TextStream, output: String },
    Done,
}

/// State behind a [`TaskStream`]; advanced only when the consumer polls.
struct StreamPump {
    executor: TaskExecutor,
    id: Uuid,
    input: String,
    context_id: Option<String>,
    cancel_rx: watch::Receiver<bool>,
    finished: Arc<AtomicBool>,
    phase: Phase,
    turn: Option<Turn>,
}

impl StreamPump {
    fn canceled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    async fn done(&mut self) {
        self.phase = Phase::Done;
        self.finished.store(true, Ordering::SeqCst);
        self.executor.release(self.id);
        if let Some(turn) = self.turn.take() {
            self.executor.end_turn(turn).await;
        }
    }

    /// Records `err` as the task's failure and yields it to the consumer.
    async fn fail(&mut self, err: BackendError) -> Option<BackendResult<String>> {
        if let Err(e) = self
            .executor
            .finish(self.id, TaskUpdate::Fail(err.clone()))
            .await
        {
            warn!(task_id = %self.id, error = %e, "Failed to record stream failure");
        }
        self.done().await;
        Some(Err(err))
    }

    async fn next_chunk(&mut self) -> Option<BackendResult<String>> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Done) {
                Phase::Done => return None,
                Phase::Start => {
                    match self.executor.take_turn(self.id, &mut self.cancel_rx).await {
                        Some(turn) => self.turn = Some(turn),
                        None => {
                            self.done().await;
                            return None;
                        }
                    }
                    match self.executor.start(self.id).await {
                        Ok(true) => {}
                        Ok(false) => {
                            self.done().await;
                            return None;
                        }
                        Err(e) => {
                            warn!(task_id = %self.id, error = %e, "Could not start stream");
                            self.done().await;
                            return None;
                        }
                    }
                    let adapter = Arc::clone(self.executor.adapter());
                    let Some(streaming) = adapter.streaming() else {
                        return self
                            .fail(BackendError::fault("adapter lost its streaming capability"))
                            .await;
                    };
                    match streaming
                        .stream(&self.input, self.context_id.as_deref())
                        .await
                    {
                        Ok(chunks) => {
                            self.phase = Phase::Pulling {
                                chunks,
                                output: String::new(),
                            };
                        }
                        Err(e) => return self.fail(e).await,
                    }
                }
                Phase::Pulling {
                    mut chunks,
                    mut output,
                } => {
                    if self.canceled() {
                        self.done().await;
                        return None;
                    }
                    let next = tokio::select! {
                        chunk = chunks.next() => Some(chunk),
                        _ = self.cancel_rx.wait_for(|canceled| *canceled) => None,
                    };
                    match next {
                        None => {
                            debug!(task_id = %self.id, "Stream stopped by cancel");
                            self.done().await;
                            return None;
                        }
                        Some(None) => {
                            if let Err(e) = self
                                .executor
                                .finish(self.id, TaskUpdate::Complete(output))
                                .await
                            {
                                warn!(task_id = %self.id, error = %e, "Failed to complete stream");
                            }
                            self.done().await;
                            return None;
                        }
                        Some(Some(Ok(chunk))) => {
                            if let Err(e) = self.executor.store().append_output(self.id, &chunk).await
                            {
                                debug!(task_id = %self.id, error = %e, "Chunk dropped, task ended");
                                self.done().await;
                                return None;
                            }
                            output.push_str(&chunk);
                            self.phase = Phase::Pulling { chunks, output };
                            return Some(Ok(chunk));
                        }
                        Some(Some(Err(e))) => return self.fail(e).await,
                    }
                }
            }
        }
    }
}

/// Chunks of a streaming task, in production order.
///
/// Each poll pulls at most one chunk from the adapter and appends it to the
/// task record. Once the task is canceled no further chunk is pulled; chunks
/// already yielded stay yielded. An adapter error is yielded once, after
/// which the stream ends.
pub struct TaskStream {
    id: Uuid,
    chunks: BoxStream<'static, BackendResult<String>>,
    finished: Arc<AtomicBool>,
    executor: TaskExecutor,
}

impl TaskStream {
    /// The task this stream belongs to.
    pub fn task_id(&self) -> Uuid {
        self.id
    }
}

impl Stream for TaskStream {
    type Item = BackendResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.chunks.poll_next_unpin(cx)
    }
}

impl Drop for TaskStream {
    fn drop(&mut self) {
        if self.finished.load(Ordering::SeqCst) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(task_id = %self.id, "Task stream dropped outside a runtime, task left running");
            return;
        };
        let executor = self.executor.clone();
        let id = self.id;
        handle.spawn(async move {
            if let Err(e) = executor.cancel(id).await {
                warn!(task_id = %id, error = %e, "Failed to cancel abandoned stream");
            }
        });
    }
}

#![allow(clippy::unwrap_used, clippy::expect_used)]

use adapta_backends::{CallableAdapter, SubprocessAdapter, SubprocessConfig};
use adapta_core::{AgentAdapter, BackendError};
use adapta_tasks::{InMemoryTaskStore, TaskExecutor, TaskRecord, TaskState};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn executor(adapter: CallableAdapter) -> TaskExecutor {
    let adapter: Arc<dyn AgentAdapter> = Arc::new(adapter);
    TaskExecutor::new(adapter, Arc::new(InMemoryTaskStore::new()))
}

fn hel_lo() -> CallableAdapter {
    CallableAdapter::from_stream_fn(|_input, _ctx| {
        tokio_stream::iter(vec![
            Ok::<_, BackendError>("Hel".to_string()),
            Ok("lo".to_string()),
        ])
    })
}

async fn wait_terminal(executor: &TaskExecutor, id: Uuid) -> TaskRecord {
    for _ in 0..400 {
        let record = executor.get(id).await.unwrap();
        if record.state.is_terminal() {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {id} never finished");
}

#[tokio::test]
async fn test_cancel_after_first_chunk_sees_exactly_one() {
    let executor = executor(hel_lo());
    let (id, mut stream) = executor.stream("hi", None).await.unwrap();

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first, "Hel");
    assert_eq!(executor.get(id).await.unwrap().state, TaskState::Working);

    let canceled = executor.cancel(id).await.unwrap();
    assert_eq!(canceled.state, TaskState::Canceled);

    assert!(stream.next().await.is_none());

    let record = executor.get(id).await.unwrap();
    assert_eq!(record.state, TaskState::Canceled);
    assert_eq!(record.output, "Hel");
    assert!(record.error.is_none());
}

#[tokio::test]
async fn test_cancel_before_first_poll() {
    let executor = executor(hel_lo());
    let (id, mut stream) = executor.stream("hi", None).await.unwrap();
    assert_eq!(executor.get(id).await.unwrap().state, TaskState::Submitted);

    let record = executor.cancel(id).await.unwrap();
    assert_eq!(record.state, TaskState::Canceled);
    assert!(stream.next().await.is_none());
    assert_eq!(executor.get(id).await.unwrap().output, "");
}

#[tokio::test]
async fn test_stream_error_fails_task() {
    let executor = executor(CallableAdapter::from_stream_fn(|_input, _ctx| {
        tokio_stream::iter(vec![
            Ok("partial ".to_string()),
            Err(BackendError::fault("model crashed")),
            Ok("never".to_string()),
        ])
    }));
    let (id, stream) = executor.stream("hi", None).await.unwrap();
    let items: Vec<_> = stream.collect().await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), "partial ");
    assert_eq!(items[1].as_ref().unwrap_err().message, "model crashed");

    let record = executor.get(id).await.unwrap();
    assert_eq!(record.state, TaskState::Failed);
    assert_eq!(record.output, "partial ");
}

#[tokio::test]
async fn test_cancel_racing_completion_settles_once() {
    for round in 0..20u64 {
        let executor = executor(CallableAdapter::from_async_fn(|input, _ctx| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, BackendError>(input)
        }));
        let id = executor.submit("done", None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(8 + round % 5)).await;
        let from_cancel = executor.cancel(id).await.unwrap();
        assert!(matches!(
            from_cancel.state,
            TaskState::Completed | TaskState::Canceled
        ));

        let settled = wait_terminal(&executor, id).await;
        assert_eq!(settled.state, from_cancel.state);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let later = executor.get(id).await.unwrap();
        assert_eq!(later.state, settled.state);
        assert_eq!(later.updated_at, settled.updated_at);
        match later.state {
            TaskState::Completed => assert_eq!(later.output, "done"),
            _ => assert_eq!(later.output, ""),
        }
    }
}

#[tokio::test]
async fn test_remove_after_completion() {
    let executor = executor(CallableAdapter::from_fn(|input, _ctx| Ok(input.to_uppercase())));
    let record = executor.run("shout", None).await.unwrap();
    assert_eq!(record.output, "SHOUT");

    executor.remove(record.id).await.unwrap();
    assert!(executor.get(record.id).await.is_err());
    assert!(executor.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_tasks_are_independent() {
    let executor = executor(CallableAdapter::from_async_fn(|input, _ctx| async move {
        let delay: u64 = input.parse().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok::<_, BackendError>(format!("slept {delay}"))
    }));

    let (slow, fast) = tokio::join!(executor.run("40", None), executor.run("1", None));
    assert_eq!(slow.unwrap().output, "slept 40");
    assert_eq!(fast.unwrap().output, "slept 1");
    assert_eq!(executor.list().await.unwrap().len(), 2);
}

#[cfg(unix)]
fn slow_process() -> TaskExecutor {
    let adapter = SubprocessAdapter::new(SubprocessConfig::new("sh", &["-c", "sleep 0.5; echo ok"]))
        .unwrap();
    TaskExecutor::new(Arc::new(adapter), Arc::new(InMemoryTaskStore::new()))
}

#[cfg(unix)]
async fn wait_working(executor: &TaskExecutor, id: Uuid) {
    for _ in 0..200 {
        if executor.get(id).await.unwrap().state == TaskState::Working {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {id} never started");
}

#[cfg(unix)]
#[tokio::test]
async fn test_cancel_queued_process_task_spares_the_running_one() {
    let executor = slow_process();
    let running = executor.submit("a", None).await.unwrap();
    wait_working(&executor, running).await;
    let queued = executor.submit("b", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(executor.get(queued).await.unwrap().state, TaskState::Submitted);

    let canceled = executor.cancel(queued).await.unwrap();
    assert_eq!(canceled.state, TaskState::Canceled);

    let record = wait_terminal(&executor, running).await;
    assert_eq!(record.state, TaskState::Completed, "error: {:?}", record.error);
    assert_eq!(record.output, "ok");
}

#[cfg(unix)]
#[tokio::test]
async fn test_cancel_running_process_task_lets_the_next_one_run() {
    let executor = slow_process();
    let running = executor.submit("a", None).await.unwrap();
    wait_working(&executor, running).await;
    let queued = executor.submit("b", None).await.unwrap();

    executor.cancel(running).await.unwrap();

    let record = wait_terminal(&executor, queued).await;
    assert_eq!(record.state, TaskState::Completed, "error: {:?}", record.error);
    assert_eq!(record.output, "ok");
    assert_eq!(
        executor.get(running).await.unwrap().state,
        TaskState::Canceled
    );
}

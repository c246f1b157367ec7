//! End-to-end wire protocol: client -> server -> repository, over TCP and
//! Unix sockets.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use testdag::status::{Message, StatusClient, StatusRepo, StatusServer};
use testdag::types::TaskResult;
use testdag_test_utils::{init_tracing, with_timeout};

fn tagged(mut msg: Message, id: &str, job: &str) -> Message {
    msg.id = Some(id.to_string());
    msg.job_id = Some(job.to_string());
    msg
}

async fn wait_for_result(repo: &Arc<Mutex<StatusRepo>>, task: &str) -> TaskResult {
    for _ in 0..100 {
        if let Some(result) = repo.lock().unwrap().get_task_result(task) {
            return result;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("no result recorded for {task}");
}

#[tokio::test]
async fn tcp_round_trip() {
    init_tracing();
    with_timeout(async {
        let repo = Arc::new(Mutex::new(StatusRepo::new("job")));
        let cancel = CancellationToken::new();
        let server = StatusServer::bind("127.0.0.1:0", Arc::clone(&repo), cancel.clone())
            .await
            .unwrap();
        let uri = server.local_uri().to_string();
        let handle = server.spawn();

        let mut client = StatusClient::new(&uri);
        client
            .post(&tagged(Message::started(), "t1", "job"))
            .await
            .unwrap();
        client
            .post(&tagged(Message::running_log("stdout", b"hello\n"), "t1", "job"))
            .await
            .unwrap();
        client
            .post(&tagged(Message::finished(TaskResult::Pass), "t1", "job"))
            .await
            .unwrap();
        client.close().await;

        assert_eq!(wait_for_result(&repo, "t1").await, TaskResult::Pass);
        let repo = repo.lock().unwrap();
        let journal = repo.get_task_data("t1").unwrap();
        assert_eq!(journal.len(), 3);
        assert_eq!(journal[1].log_bytes().unwrap(), b"hello\n");
        drop(repo);

        cancel.cancel();
        let _ = handle.await;
    })
    .await;
}

#[tokio::test]
async fn unix_socket_round_trip() {
    init_tracing();
    with_timeout(async {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("status.sock");
        let uri = socket.to_string_lossy().into_owned();

        let repo = Arc::new(Mutex::new(StatusRepo::new("job")));
        let cancel = CancellationToken::new();
        let server = StatusServer::bind(&uri, Arc::clone(&repo), cancel.clone())
            .await
            .unwrap();
        let handle = server.spawn();

        let mut client = StatusClient::new(&uri);
        client
            .post(&tagged(Message::finished(TaskResult::Skip), "t1", "job"))
            .await
            .unwrap();
        client.close().await;

        assert_eq!(wait_for_result(&repo, "t1").await, TaskResult::Skip);

        cancel.cancel();
        let _ = handle.await;
    })
    .await;
}

#[tokio::test]
async fn malformed_lines_are_dropped_not_fatal() {
    init_tracing();
    with_timeout(async {
        let repo = Arc::new(Mutex::new(StatusRepo::new("job")));
        let cancel = CancellationToken::new();
        let server = StatusServer::bind("127.0.0.1:0", Arc::clone(&repo), cancel.clone())
            .await
            .unwrap();
        let uri = server.local_uri().to_string();
        let handle = server.spawn();

        // raw connection mixing garbage with a valid message
        let mut stream = tokio::net::TcpStream::connect(&uri).await.unwrap();
        stream.write_all(b"this is not json\n").await.unwrap();
        stream.write_all(b"\n").await.unwrap();
        let valid = tagged(Message::finished(TaskResult::Pass), "t1", "job");
        stream
            .write_all(format!("{}\n", valid.to_wire()).as_bytes())
            .await
            .unwrap();
        stream.shutdown().await.unwrap();

        assert_eq!(wait_for_result(&repo, "t1").await, TaskResult::Pass);
        assert_eq!(repo.lock().unwrap().get_task_data("t1").unwrap().len(), 1);

        cancel.cancel();
        let _ = handle.await;
    })
    .await;
}

#[tokio::test]
async fn client_gives_up_after_backoff() {
    init_tracing();
    // nothing listens here; connect attempts must fail fast enough for the
    // capped backoff to give up with a communication error
    let mut client = StatusClient::new("127.0.0.1:1");
    let msg = tagged(Message::started(), "t1", "job");
    let err = client.post(&msg).await.unwrap_err();
    assert!(matches!(err, testdag::TestdagError::Communication(_)));
}

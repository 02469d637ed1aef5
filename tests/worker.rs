mod common;

use common::{fake_receiver, read_command, receiver, write_message};
use eiscp::{AsyncReceiver, IscpError, WorkerStatus};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[tokio::test]
async fn test_request_async_matches_reply() {
    let (listener, port) = fake_receiver().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        assert_eq!(read_command(&mut stream).await.as_deref(), Some("MVLQSTN"));
        write_message(&mut stream, "MVL28").await;
        read_command(&mut stream).await
    });

    let mut receiver = AsyncReceiver::new(receiver(port), |_| {});
    receiver.connect().await.unwrap();
    assert_eq!(receiver.status(), WorkerStatus::Running);

    let reply = receiver.request_async("MVLQSTN").unwrap().await.unwrap();
    assert_eq!(reply, "MVL28");

    receiver.disconnect().await;
    assert_eq!(receiver.status(), WorkerStatus::Idle);
}

#[tokio::test]
async fn test_timeout_does_not_block_later_sends() {
    let (listener, port) = fake_receiver().await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        // Never answers anything
        while let Some(command) = read_command(&mut stream).await {
            let _ = seen_tx.send(command);
        }
    });

    let mut receiver = AsyncReceiver::new(receiver(port), |_| {});
    receiver.connect().await.unwrap();

    receiver.send_async("PWR01").unwrap();
    let pending = receiver.request_async("MVLQSTN").unwrap();
    receiver.send_async("AMT01").unwrap();

    let err = pending.await.unwrap_err();
    assert!(matches!(err, IscpError::ResponseTimeout { command } if command == "MVLQSTN"));

    let mut seen = Vec::new();
    for _ in 0..3 {
        let command = timeout(Duration::from_secs(2), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        seen.push(command);
    }
    assert_eq!(seen, vec!["PWR01", "MVLQSTN", "AMT01"]);

    receiver.disconnect().await;
}

#[tokio::test]
async fn test_unsolicited_messages_reach_callback() {
    let (listener, port) = fake_receiver().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        write_message(&mut stream, "PWR01").await;
        write_message(&mut stream, "NLTF300000000000000FF00").await;
        read_command(&mut stream).await
    });

    let (message_tx, mut message_rx) = mpsc::unbounded_channel();
    let mut receiver = AsyncReceiver::new(receiver(port), move |message| {
        let _ = message_tx.send(message);
    });
    receiver.connect().await.unwrap();

    let first = timeout(Duration::from_secs(2), message_rx.recv()).await.unwrap();
    let second = timeout(Duration::from_secs(2), message_rx.recv()).await.unwrap();
    assert_eq!(first.as_deref(), Some("PWR01"));
    assert_eq!(second.as_deref(), Some("NLTF300000000000000FF00"));

    receiver.disconnect().await;
}

#[tokio::test]
async fn test_concurrent_enqueue_from_threads() {
    let (listener, port) = fake_receiver().await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        while let Some(command) = read_command(&mut stream).await {
            let _ = seen_tx.send(command);
        }
    });

    let mut receiver = AsyncReceiver::new(receiver(port), |_| {});
    receiver.connect().await.unwrap();

    let threads: Vec<_> = (0..4)
        .map(|n| {
            let queue = receiver.queue().unwrap();
            std::thread::spawn(move || {
                for i in 0..5 {
                    queue.send_async(format!("MVL{:X}{:X}", n, i)).unwrap();
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..20 {
        seen.push(
            timeout(Duration::from_secs(2), seen_rx.recv())
                .await
                .unwrap()
                .unwrap(),
        );
    }
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 20);

    receiver.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_then_reconnect() {
    let (listener, port) = fake_receiver().await;
    let server = tokio::spawn(async move {
        let mut seen = Vec::new();
        for _ in 0..2 {
            let (mut stream, _) = listener.accept().await.unwrap();
            seen.push(read_command(&mut stream).await.unwrap());
        }
        seen
    });

    let mut receiver = AsyncReceiver::new(receiver(port), |_| {});
    receiver.connect().await.unwrap();
    receiver.send_async("PWR01").unwrap();
    // Let the worker pick the command up before stopping it
    tokio::time::sleep(Duration::from_millis(100)).await;
    receiver.disconnect().await;

    assert!(matches!(receiver.send_async("PWR00"), Err(IscpError::NotConnected)));

    receiver.connect().await.unwrap();
    receiver.send_async("PWR00").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let inner = receiver.into_inner().await.unwrap();
    assert!(!inner.is_connected());
    assert_eq!(server.await.unwrap(), vec!["PWR01", "PWR00"]);
}

#[tokio::test]
async fn test_connect_failure_stays_idle() {
    let (listener, port) = fake_receiver().await;
    drop(listener);

    let mut receiver = AsyncReceiver::new(receiver(port), |_| {});
    assert!(receiver.connect().await.is_err());
    assert_eq!(receiver.status(), WorkerStatus::Idle);
}

#[tokio::test]
async fn test_request_async_skips_unrelated_messages() {
    let (listener, port) = fake_receiver().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        assert_eq!(read_command(&mut stream).await.as_deref(), Some("MVLQSTN"));
        write_message(&mut stream, "PWR01").await;
        write_message(&mut stream, "MVL32").await;
        read_command(&mut stream).await
    });

    let mut receiver = AsyncReceiver::new(receiver(port), |_| {});
    receiver.connect().await.unwrap();

    let reply = receiver.request_async("MVLQSTN").unwrap().await.unwrap();
    assert_eq!(reply, "MVL32");

    receiver.disconnect().await;
}

#[tokio::test]
async fn test_worker_stops_when_receiver_hangs_up() {
    let (listener, port) = fake_receiver().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);

        let (mut stream, _) = listener.accept().await.unwrap();
        read_command(&mut stream).await
    });

    let mut receiver = AsyncReceiver::new(receiver(port), |_| {});
    receiver.connect().await.unwrap();

    timeout(Duration::from_secs(2), async {
        while receiver.status() != WorkerStatus::Stopped {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(receiver.queue().is_none());
    assert!(matches!(receiver.send_async("PWR01"), Err(IscpError::NotConnected)));

    // Reconnecting reaps the dead worker and starts a fresh run
    receiver.connect().await.unwrap();
    assert_eq!(receiver.status(), WorkerStatus::Running);
    assert!(receiver.last_error().is_none());
    receiver.send_async("PWR01").unwrap();
    assert_eq!(server.await.unwrap().as_deref(), Some("PWR01"));

    receiver.disconnect().await;
    assert_eq!(receiver.status(), WorkerStatus::Idle);
}

#[tokio::test]
async fn test_disconnect_reports_why_worker_stopped() {
    let (listener, port) = fake_receiver().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
    });

    let mut receiver = AsyncReceiver::new(receiver(port), |_| {});
    receiver.connect().await.unwrap();

    timeout(Duration::from_secs(2), async {
        while receiver.status() != WorkerStatus::Stopped {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    receiver.disconnect().await;
    assert_eq!(receiver.status(), WorkerStatus::Idle);
    assert!(receiver.last_error().is_some_and(IscpError::is_fatal));
}

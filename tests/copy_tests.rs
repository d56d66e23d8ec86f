use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use flowpipe::{pipe, ReaderKind, StreamError, StreamReader};
use tokio::time::{sleep, timeout};

async fn drain(mut reader: StreamReader<i32>) -> Vec<i32> {
    let mut got = Vec::new();
    loop {
        match reader.recv().await {
            Ok(v) => got.push(v),
            Err(err) => {
                assert_eq!(err, StreamError::EndOfStream);
                return got;
            }
        }
    }
}

#[tokio::test]
async fn test_children_see_identical_sequence() {
    let (mut writer, reader) = pipe::<i32>(10);
    assert!(!writer.send(Ok(1)).await);
    assert!(!writer.send(Ok(2)).await);
    assert!(!writer.send(Ok(3)).await);
    writer.close();

    let mut children = reader.copy(2);
    let second = children.pop().unwrap();
    let first = children.pop().unwrap();

    assert_eq!(drain(first).await, vec![1, 2, 3]);
    assert_eq!(drain(second).await, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_interleaved_first_element() {
    let (mut writer, reader) = pipe::<i32>(0);
    let mut children = reader.copy(2);
    let mut child1 = children.pop().unwrap();
    let mut child0 = children.pop().unwrap();

    let producer = tokio::spawn(async move {
        assert!(!writer.send(Ok(1)).await);
        sleep(Duration::from_millis(10)).await;
        assert!(!writer.send(Ok(2)).await);
        writer.close();
    });

    // Child 1 pulls the first element; child 0 then reads it from the
    // replay buffer. Both advance through the same sequence.
    assert_eq!(child1.recv().await.unwrap(), 1);
    assert_eq!(child0.recv().await.unwrap(), 1);
    assert_eq!(child1.recv().await.unwrap(), 2);
    assert_eq!(child0.recv().await.unwrap(), 2);
    assert_eq!(child1.recv().await, Err(StreamError::EndOfStream));
    assert_eq!(child0.recv().await, Err(StreamError::EndOfStream));

    producer.await.unwrap();
}

#[tokio::test]
async fn test_early_close_child_does_not_disturb_sibling() {
    let (mut writer, reader) = pipe::<i32>(0);
    let mut children = reader.copy(2);
    let mut child1 = children.pop().unwrap();
    let mut child0 = children.pop().unwrap();

    let producer = tokio::spawn(async move {
        for i in [1, 2, 3] {
            if writer.send(Ok(i)).await {
                return;
            }
        }
        writer.close();
    });

    assert_eq!(child0.recv().await.unwrap(), 1);
    child0.close();

    assert_eq!(child1.recv().await.unwrap(), 1);
    assert_eq!(child1.recv().await.unwrap(), 2);
    assert_eq!(child1.recv().await.unwrap(), 3);
    assert_eq!(child1.recv().await, Err(StreamError::EndOfStream));
    child1.close();

    producer.await.unwrap();
}

#[tokio::test]
async fn test_double_close_counts_once() {
    let (mut writer, reader) = pipe::<i32>(4);
    let producer = tokio::spawn(async move {
        for i in [1, 2, 3] {
            if writer.send(Ok(i)).await {
                return;
            }
        }
        writer.close();
    });

    let mut children = reader.copy(2);
    let child1 = children.pop().unwrap();
    let mut child0 = children.pop().unwrap();

    child0.close();
    child0.close();

    // If the double close were counted twice the upstream would already be
    // closed and child 1 would see a truncated stream.
    assert_eq!(drain(child1).await, vec![1, 2, 3]);
    producer.await.unwrap();
}

#[tokio::test]
async fn test_all_children_closing_stops_producer() {
    let (mut writer, reader) = pipe::<i32>(2);

    let sent = Arc::new(AtomicU32::new(0));
    let sent_in_task = Arc::clone(&sent);
    let producer = tokio::spawn(async move {
        for i in 0..1000 {
            if writer.send(Ok(i)).await {
                break;
            }
            sent_in_task.fetch_add(1, Ordering::SeqCst);
        }
    });

    let mut children = reader.copy(2);
    let mut child1 = children.pop().unwrap();
    let mut child0 = children.pop().unwrap();

    assert_eq!(child0.recv().await.unwrap(), 0);
    child0.close();
    assert_eq!(child1.recv().await.unwrap(), 0);
    child1.close();

    // The last close propagates to the upstream pipe reader.
    timeout(Duration::from_millis(500), producer)
        .await
        .expect("producer did not observe the upstream close")
        .unwrap();
    assert!(sent.load(Ordering::SeqCst) < 1000);
}

#[tokio::test]
async fn test_buffered_reads_do_not_wait_for_the_puller() {
    let (mut writer, reader) = pipe::<i32>(1);
    let mut children = reader.copy(2);
    let mut child1 = children.pop().unwrap();
    let child0 = children.pop().unwrap();

    let producer = tokio::spawn(async move {
        assert!(!writer.send(Ok(1)).await);
        sleep(Duration::from_millis(200)).await;
        assert!(!writer.send(Ok(2)).await);
        writer.close();
    });

    // Child 0 races ahead and ends up blocked pulling the second element.
    let runner = tokio::spawn(async move { drain(child0).await });

    sleep(Duration::from_millis(100)).await;
    let started = Instant::now();
    assert_eq!(child1.recv().await.unwrap(), 1);
    // The first element is already buffered; reading it must not wait out
    // the producer's 200ms pause that the puller is stuck in.
    assert!(started.elapsed() < Duration::from_millis(100));

    assert_eq!(child1.recv().await.unwrap(), 2);
    assert_eq!(child1.recv().await, Err(StreamError::EndOfStream));
    assert_eq!(runner.await.unwrap(), vec![1, 2]);
    producer.await.unwrap();
}

#[tokio::test]
async fn test_nested_copy() {
    let (mut writer, reader) = pipe::<i32>(2);
    let producer = tokio::spawn(async move {
        for i in 0..10 {
            if writer.send(Ok(i)).await {
                return;
            }
        }
        writer.close();
    });

    let expected: Vec<i32> = (0..10).collect();

    let mut children = reader.copy(3);
    let again = children.pop().unwrap();
    assert_eq!(drain(children.pop().unwrap()).await, expected);

    let mut grandchildren = again.copy(3);
    assert_eq!(drain(grandchildren.pop().unwrap()).await, expected);
    assert_eq!(drain(grandchildren.pop().unwrap()).await, expected);

    producer.await.unwrap();
}

#[tokio::test]
async fn test_copy_one_is_a_direct_forwarder() {
    let (mut writer, reader) = pipe::<i32>(2);
    assert!(!writer.send(Ok(9)).await);
    writer.close();

    let mut children = reader.copy(1);
    assert_eq!(children.len(), 1);
    let child = children.pop().unwrap();
    assert_eq!(child.kind(), ReaderKind::Pipe);
    assert_eq!(drain(child).await, vec![9]);
}

#[tokio::test]
async fn test_error_item_fans_out_to_every_child() {
    let (mut writer, reader) = pipe::<i32>(4);
    assert!(!writer.send(Ok(1)).await);
    assert!(!writer.send(Err(StreamError::custom("upstream failed"))).await);
    writer.close();

    let mut children = reader.copy(2);
    let mut child1 = children.pop().unwrap();
    let mut child0 = children.pop().unwrap();

    for child in [&mut child0, &mut child1] {
        assert_eq!(child.recv().await.unwrap(), 1);
        assert_eq!(
            child.recv().await,
            Err(StreamError::custom("upstream failed"))
        );
        // Delivered once, end-of-stream from then on.
        assert_eq!(child.recv().await, Err(StreamError::EndOfStream));
    }
}

#[tokio::test]
async fn test_recv_after_child_close_returns_end() {
    let (mut writer, reader) = pipe::<i32>(2);
    assert!(!writer.send(Ok(1)).await);
    writer.close();

    let mut children = reader.copy(2);
    let child1 = children.pop().unwrap();
    let mut child0 = children.pop().unwrap();

    child0.close();
    assert_eq!(child0.recv().await, Err(StreamError::EndOfStream));
    assert_eq!(drain(child1).await, vec![1]);
}

#[tokio::test]
async fn test_many_children_all_see_the_full_sequence() {
    let n = 500;
    let m = 16;
    let (mut writer, reader) = pipe::<i32>(2);
    let producer = tokio::spawn(async move {
        for i in 0..n {
            if writer.send(Ok(i)).await {
                return;
            }
        }
        writer.close();
    });

    let children = reader.copy(m);
    let mut tasks = Vec::new();
    for child in children {
        tasks.push(tokio::spawn(async move {
            let got = drain(child).await;
            assert_eq!(got, (0..n).collect::<Vec<i32>>());
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    producer.await.unwrap();
}

#[tokio::test]
async fn test_two_children_under_uneven_pacing() {
    let n = 2000;
    let (mut writer, reader) = pipe::<i32>(8);

    let producer = tokio::spawn(async move {
        for i in 0..n {
            if i % 13 == 0 {
                sleep(Duration::from_micros((i % 5) as u64 * 40)).await;
            }
            if writer.send(Ok(i)).await {
                return;
            }
        }
        writer.close();
    });

    let children = reader.copy(2);
    let mut tasks = Vec::new();
    for mut child in children {
        tasks.push(tokio::spawn(async move {
            let mut expect = 0;
            loop {
                if expect % 5 == 0 {
                    sleep(Duration::from_micros((expect % 7) as u64 * 30)).await;
                }
                match child.recv().await {
                    Ok(v) => {
                        assert_eq!(v, expect);
                        expect += 1;
                    }
                    Err(err) => {
                        assert_eq!(err, StreamError::EndOfStream);
                        break;
                    }
                }
            }
            assert_eq!(expect, n);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    producer.await.unwrap();
}

#[tokio::test]
async fn test_copy_of_array_reader() {
    let reader = StreamReader::from_vec(vec![1, 2, 3]);
    let mut children = reader.copy(2);
    let second = children.pop().unwrap();
    let first = children.pop().unwrap();
    assert_eq!(first.kind(), ReaderKind::Copied);
    assert_eq!(drain(first).await, vec![1, 2, 3]);
    assert_eq!(drain(second).await, vec![1, 2, 3]);
}

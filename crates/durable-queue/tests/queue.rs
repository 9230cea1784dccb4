use durable_queue::DurableQueue;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::redis::Redis;

async fn make_queue() -> (testcontainers::ContainerAsync<Redis>, DurableQueue) {
    let container = Redis::default().start().await.unwrap();
    let port = container.get_host_port_ipv4(6379).await.unwrap();
    let url = format!("redis://127.0.0.1:{port}/");
    let queue = DurableQueue::connect(&url, "queue:node:").await.unwrap();
    (container, queue)
}

#[tokio::test]
async fn enqueue_and_dequeue_preserves_fifo_order() {
    let (_container, queue) = make_queue().await;

    queue.enqueue("node-a", "reading-1").await.unwrap();
    queue.enqueue("node-a", "reading-2").await.unwrap();
    queue.enqueue("node-a", "reading-3").await.unwrap();

    assert_eq!(queue.queue_len("node-a").await.unwrap(), 3);

    let batch = queue.dequeue_batch("node-a", 2).await.unwrap();
    assert_eq!(batch, vec!["reading-1".to_owned(), "reading-2".to_owned()]);
    assert_eq!(queue.queue_len("node-a").await.unwrap(), 1);

    let rest = queue.dequeue_batch("node-a", 10).await.unwrap();
    assert_eq!(rest, vec!["reading-3".to_owned()]);
    assert_eq!(queue.queue_len("node-a").await.unwrap(), 0);
}

#[tokio::test]
async fn enqueue_batch_preserves_order_in_a_single_append() {
    let (_container, queue) = make_queue().await;

    let batch = vec!["reading-1".to_owned(), "reading-2".to_owned(), "reading-3".to_owned()];
    queue.enqueue_batch("node-a", &batch).await.unwrap();

    assert_eq!(queue.queue_len("node-a").await.unwrap(), 3);
    assert_eq!(queue.dequeue_batch("node-a", 10).await.unwrap(), batch);
}

#[tokio::test]
async fn enqueue_batch_of_empty_slice_is_a_no_op() {
    let (_container, queue) = make_queue().await;

    queue.enqueue_batch("node-a", &[]).await.unwrap();
    assert_eq!(queue.queue_len("node-a").await.unwrap(), 0);
}

#[tokio::test]
async fn discover_active_nodes_finds_every_queue_with_pending_entries() {
    let (_container, queue) = make_queue().await;

    queue.enqueue("node-a", "x").await.unwrap();
    queue.enqueue("node-b", "y").await.unwrap();

    let mut nodes = queue.discover_active_nodes().await.unwrap();
    nodes.sort();
    assert_eq!(nodes, vec!["node-a".to_owned(), "node-b".to_owned()]);

    queue.dequeue_batch("node-a", 10).await.unwrap();
    assert_eq!(queue.queue_key("node-a"), "queue:node:node-a");
}

#[tokio::test]
async fn allocate_seq_range_is_gap_free_under_concurrent_callers() {
    let (_container, queue) = make_queue().await;

    let mut ranges = Vec::new();
    for _ in 0..5 {
        let start = queue.allocate_seq_range("node-a", 3).await.unwrap();
        ranges.push(start);
    }

    // Each call claims a disjoint block of 3: 1, 4, 7, 10, 13.
    assert_eq!(ranges, vec![1, 4, 7, 10, 13]);
}

#[tokio::test]
async fn record_flush_updates_metrics_hash() {
    let (_container, queue) = make_queue().await;

    queue.record_flush("node-a", 5, 1_000).await.unwrap();
    queue.record_flush("node-a", 3, 2_000).await.unwrap();

    let metrics = queue.read_metrics("node-a").await.unwrap();
    assert_eq!(metrics.total_records, 8);
    assert_eq!(metrics.last_flush, Some(2_000));
}

#[tokio::test]
async fn dead_letter_entries_do_not_reappear_in_main_queue() {
    let (_container, queue) = make_queue().await;

    queue.enqueue("node-a", "bad-entry").await.unwrap();
    let batch = queue.dequeue_batch("node-a", 10).await.unwrap();
    queue.dead_letter("node-a", &batch).await.unwrap();

    assert_eq!(queue.queue_len("node-a").await.unwrap(), 0);
}

#[tokio::test]
async fn heartbeat_round_trips() {
    let (_container, queue) = make_queue().await;

    assert_eq!(queue.read_heartbeat("ingester:heartbeat").await.unwrap(), None);
    queue.write_heartbeat("ingester:heartbeat", 1_234).await.unwrap();
    assert_eq!(
        queue.read_heartbeat("ingester:heartbeat").await.unwrap(),
        Some(1_234)
    );
}

#[tokio::test]
async fn custom_queue_prefix_is_respected_end_to_end() {
    let container = Redis::default().start().await.unwrap();
    let port = container.get_host_port_ipv4(6379).await.unwrap();
    let url = format!("redis://127.0.0.1:{port}/");
    let queue = DurableQueue::connect(&url, "custom:prefix:").await.unwrap();

    queue.enqueue("node-z", "reading").await.unwrap();
    let nodes = queue.discover_active_nodes().await.unwrap();
    assert_eq!(nodes, vec!["node-z".to_owned()]);
}

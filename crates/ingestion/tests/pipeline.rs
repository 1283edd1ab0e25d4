//! End-to-end tests of the ingestion loop against an in-memory node and bus.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256, U64};
use async_trait::async_trait;
use eth_ingestion::normalize::{encode_hex, is_normalized_hex};
use eth_ingestion::types::{RawBlock, RawLog, RawReceipt, RawTransaction};
use eth_ingestion::{
    BusMessage, BusTransport, DeliveryFuture, DeliveryStatus, FetchError, IngestionConfig,
    IngestionLoop, NodeRpc, PublishError, RetryConfig, TickOutcome,
};
use eth_ingestion_telemetry::Metrics;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct MockNode {
    heads: Mutex<VecDeque<u64>>,
    head_unavailable: AtomicBool,
    blocks: Mutex<HashMap<u64, RawBlock>>,
    receipts: Mutex<HashMap<B256, RawReceipt>>,
    failing_receipts: Mutex<HashSet<B256>>,
    receipt_delay: Option<Duration>,
    receipt_calls: Mutex<HashMap<B256, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockNode {
    /// Queue heads returned by successive `eth_blockNumber` calls; the last
    /// one keeps being returned.
    fn push_heads(&self, heads: impl IntoIterator<Item = u64>) {
        self.heads.lock().unwrap().extend(heads);
    }

    /// Register block `number` with `tx_count` transactions, each emitting
    /// `logs_per_tx` logs. Returns the transaction hashes.
    fn add_block(&self, number: u64, tx_count: usize, logs_per_tx: usize) -> Vec<B256> {
        let mut transactions = Vec::new();
        let mut receipts = self.receipts.lock().unwrap();
        for index in 0..tx_count {
            let mut hash = [0u8; 32];
            hash[..8].copy_from_slice(&number.to_be_bytes());
            hash[24..].copy_from_slice(&(index as u64).to_be_bytes());
            hash[31] |= 0xA0;
            let hash = B256::from(hash);

            transactions.push(RawTransaction {
                hash,
                from: Address::repeat_byte(0xAB),
                to: if index % 2 == 0 { Some(Address::repeat_byte(0xCD)) } else { None },
                value: U256::from(10u64).pow(U256::from(20u64)),
                gas: U64::from(21_000 + index as u64),
                gas_price: Some(U256::from(25_000_000_000u64)),
                input: Bytes::from(vec![0xDE, 0xAD, index as u8]),
            });
            receipts.insert(
                hash,
                RawReceipt {
                    transaction_hash: hash,
                    status: Some(U64::from(1)),
                    gas_used: U64::from(21_000),
                    logs: (0..logs_per_tx)
                        .map(|_| RawLog {
                            address: Address::repeat_byte(0xEF),
                            topics: vec![B256::repeat_byte(0xF0)],
                            data: Bytes::from_static(&[0xBE, 0xEF]),
                        })
                        .collect(),
                },
            );
        }

        let hashes = transactions.iter().map(|tx| tx.hash).collect();
        self.blocks.lock().unwrap().insert(
            number,
            RawBlock {
                number: Some(U64::from(number)),
                hash: Some(B256::repeat_byte(0xAA)),
                parent_hash: Some(B256::repeat_byte(0xBB)),
                timestamp: Some(U64::from(1_700_000_000 + number)),
                transactions,
            },
        );
        hashes
    }

    fn receipt_calls(&self, hash: &B256) -> usize {
        self.receipt_calls.lock().unwrap().get(hash).copied().unwrap_or(0)
    }
}

#[async_trait]
impl NodeRpc for MockNode {
    async fn block_number(&self) -> Result<u64, FetchError> {
        if self.head_unavailable.load(Ordering::SeqCst) {
            return Err(FetchError::Transport("connection refused".into()));
        }
        let mut heads = self.heads.lock().unwrap();
        let head = if heads.len() > 1 { heads.pop_front() } else { heads.front().copied() };
        head.ok_or_else(|| FetchError::Transport("no head configured".into()))
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<RawBlock>, FetchError> {
        Ok(self.blocks.lock().unwrap().get(&number).cloned())
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<RawReceipt>, FetchError> {
        *self.receipt_calls.lock().unwrap().entry(hash).or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.receipt_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_receipts.lock().unwrap().contains(&hash) {
            return Err(FetchError::Transport("upstream timeout".into()));
        }
        Ok(self.receipts.lock().unwrap().get(&hash).cloned())
    }
}

#[derive(Default)]
struct MockBus {
    messages: Mutex<Vec<BusMessage>>,
    overloaded: AtomicBool,
    failing_deliveries: AtomicBool,
}

impl MockBus {
    fn published_numbers(&self) -> Vec<u64> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.key.parse().unwrap())
            .collect()
    }

    fn payload(&self, index: usize) -> Value {
        serde_json::from_slice(&self.messages.lock().unwrap()[index].payload).unwrap()
    }
}

#[async_trait]
impl BusTransport for MockBus {
    fn send(&self, message: BusMessage) -> Result<DeliveryFuture, PublishError> {
        if self.overloaded.load(Ordering::SeqCst) {
            return Err(PublishError::Overloaded);
        }
        let offset = {
            let mut messages = self.messages.lock().unwrap();
            messages.push(message);
            messages.len() as i64 - 1
        };
        if self.failing_deliveries.load(Ordering::SeqCst) {
            return Ok(Box::pin(async {
                DeliveryStatus::DeliveryFailed("leader not available".to_string())
            }));
        }
        Ok(Box::pin(async move { DeliveryStatus::Delivered { partition: 0, offset } }))
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), PublishError> {
        Ok(())
    }
}

fn config(max_concurrent_receipts: usize) -> IngestionConfig {
    IngestionConfig {
        topic: "ethereum-blocks".to_string(),
        max_concurrent_receipts,
        retry: RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            multiplier: 2.0,
        },
        ..IngestionConfig::default()
    }
}

fn pipeline(
    node: &Arc<MockNode>,
    bus: &Arc<MockBus>,
    max_concurrent_receipts: usize,
) -> IngestionLoop<Arc<MockNode>, Arc<MockBus>> {
    IngestionLoop::new(
        Arc::clone(node),
        Arc::clone(bus),
        config(max_concurrent_receipts),
        Metrics::new().unwrap(),
        CancellationToken::new(),
    )
}

fn assert_hex(value: &Value) {
    let text = value.as_str().unwrap_or_else(|| panic!("expected hex string, got {value}"));
    assert!(is_normalized_hex(text), "not normalized hex: {text}");
}

#[tokio::test]
async fn publishes_enriched_block_as_canonical_json() {
    let node = Arc::new(MockNode::default());
    let bus = Arc::new(MockBus::default());
    node.add_block(100, 2, 1);
    node.push_heads([100]);

    let mut ingestion = pipeline(&node, &bus, 10);
    assert_eq!(ingestion.tick().await, TickOutcome::Published(100));

    let messages = bus.messages.lock().unwrap().clone();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].key, "100");
    assert_eq!(messages[0].topic, "ethereum-blocks");

    let block = bus.payload(0);
    let keys: Vec<&str> = block.as_object().unwrap().keys().map(String::as_str).collect();
    let mut expected = vec!["number", "hash", "parent_hash", "timestamp", "transactions"];
    expected.sort_unstable();
    let mut sorted_keys = keys.clone();
    sorted_keys.sort_unstable();
    assert_eq!(sorted_keys, expected);

    assert_eq!(block["number"], 100);
    assert_eq!(block["timestamp"], 1_700_000_100u64);
    assert_hex(&block["hash"]);
    assert_hex(&block["parent_hash"]);

    let transactions = block["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 2);
    for tx in transactions {
        assert_hex(&tx["hash"]);
        assert_hex(&tx["from"]);
        assert_hex(&tx["input"]);
        assert_eq!(tx["value"], "100000000000000000000");
        assert_eq!(tx["gas_price"], "25000000000");
        assert_eq!(tx["status"], 1);
        assert_eq!(tx["gas_used"], 21_000);

        let logs = tx["logs"].as_array().unwrap();
        assert_eq!(logs.len(), 1);
        assert_hex(&logs[0]["address"]);
        assert_hex(&logs[0]["data"]);
        for topic in logs[0]["topics"].as_array().unwrap() {
            assert_hex(topic);
        }
    }
    assert_hex(&transactions[0]["to"]);
    assert!(transactions[1]["to"].is_null());
    assert_eq!(ingestion.state().last_seen_block_number(), Some(100));
}

#[tokio::test]
async fn repeated_head_is_published_once() {
    let node = Arc::new(MockNode::default());
    let bus = Arc::new(MockBus::default());
    node.add_block(100, 1, 0);
    node.push_heads([100, 100]);

    let mut ingestion = pipeline(&node, &bus, 10);
    assert_eq!(ingestion.tick().await, TickOutcome::Published(100));
    assert_eq!(
        ingestion.tick().await,
        TickOutcome::Stale { latest: 100, last_seen: 100 }
    );
    assert_eq!(bus.published_numbers(), vec![100]);
}

#[tokio::test(start_paused = true)]
async fn failed_receipt_withholds_block_until_next_tick() {
    let node = Arc::new(MockNode::default());
    let bus = Arc::new(MockBus::default());
    let hashes = node.add_block(100, 3, 1);
    node.failing_receipts.lock().unwrap().insert(hashes[1]);
    node.push_heads([100]);

    let mut ingestion = pipeline(&node, &bus, 10);
    assert_eq!(
        ingestion.tick().await,
        TickOutcome::Failed { block_number: 100, reason: "transport" }
    );
    assert!(bus.published_numbers().is_empty());
    assert_eq!(ingestion.state().last_seen_block_number(), None);
    // One attempt plus two retries.
    assert_eq!(node.receipt_calls(&hashes[1]), 3);

    node.failing_receipts.lock().unwrap().clear();
    assert_eq!(ingestion.tick().await, TickOutcome::Published(100));
    assert_eq!(bus.published_numbers(), vec![100]);
    assert_eq!(bus.payload(0)["transactions"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn failed_delivery_is_not_republished() {
    let node = Arc::new(MockNode::default());
    let bus = Arc::new(MockBus::default());
    bus.failing_deliveries.store(true, Ordering::SeqCst);
    node.add_block(100, 1, 1);
    node.push_heads([100, 100]);

    let mut ingestion = pipeline(&node, &bus, 10);
    assert_eq!(ingestion.tick().await, TickOutcome::Published(100));
    // Let the delivery watcher observe the failure before the next poll.
    tokio::task::yield_now().await;
    assert_eq!(
        ingestion.tick().await,
        TickOutcome::Stale { latest: 100, last_seen: 100 }
    );
    assert_eq!(bus.published_numbers(), vec![100]);
    assert_eq!(ingestion.state().last_seen_block_number(), Some(100));
}

#[tokio::test]
async fn overloaded_bus_drops_block_but_advances() {
    let node = Arc::new(MockNode::default());
    let bus = Arc::new(MockBus::default());
    node.add_block(100, 1, 1);
    node.add_block(101, 1, 1);
    node.push_heads([100, 100, 101]);
    bus.overloaded.store(true, Ordering::SeqCst);

    let mut ingestion = pipeline(&node, &bus, 10);
    assert_eq!(ingestion.tick().await, TickOutcome::Dropped(100));
    assert_eq!(ingestion.state().last_seen_block_number(), Some(100));

    bus.overloaded.store(false, Ordering::SeqCst);
    assert_eq!(
        ingestion.tick().await,
        TickOutcome::Stale { latest: 100, last_seen: 100 }
    );
    assert_eq!(ingestion.tick().await, TickOutcome::Published(101));
    assert_eq!(bus.published_numbers(), vec![101]);
}

#[tokio::test(start_paused = true)]
async fn receipt_fan_out_respects_concurrency_bound() {
    let node = Arc::new(MockNode {
        receipt_delay: Some(Duration::from_millis(20)),
        ..MockNode::default()
    });
    let bus = Arc::new(MockBus::default());
    let hashes = node.add_block(7, 25, 2);
    node.push_heads([7]);

    let mut ingestion = pipeline(&node, &bus, 4);
    assert_eq!(ingestion.tick().await, TickOutcome::Published(7));

    let max = node.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 4, "observed {max} concurrent receipt fetches");
    assert!(max > 1, "receipt fetches never overlapped");

    let block = bus.payload(0);
    let published: Vec<String> = block["transactions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|tx| tx["hash"].as_str().unwrap().to_string())
        .collect();
    let expected: Vec<String> = hashes.iter().map(encode_hex).collect();
    assert_eq!(published, expected);
}

#[tokio::test]
async fn last_seen_is_monotonic_over_erratic_heads() {
    let node = Arc::new(MockNode::default());
    let bus = Arc::new(MockBus::default());
    for number in [5, 6, 7, 8, 9] {
        node.add_block(number, 1, 0);
    }
    node.push_heads([5, 7, 6, 7, 9, 8]);

    let mut ingestion = pipeline(&node, &bus, 10);
    let mut previous = None;
    for _ in 0..6 {
        ingestion.tick().await;
        let current = ingestion.state().last_seen_block_number();
        assert!(current >= previous, "{current:?} < {previous:?}");
        previous = current;
    }

    // Skipped numbers are not backfilled.
    assert_eq!(bus.published_numbers(), vec![5, 7, 9]);
}

#[tokio::test]
async fn missing_block_is_skipped_without_advancing() {
    let node = Arc::new(MockNode::default());
    let bus = Arc::new(MockBus::default());
    node.push_heads([42]);

    let mut ingestion = pipeline(&node, &bus, 10);
    assert_eq!(
        ingestion.tick().await,
        TickOutcome::Failed { block_number: 42, reason: "not_found" }
    );
    assert_eq!(ingestion.state().last_seen_block_number(), None);
}

#[tokio::test]
async fn block_without_header_is_malformed() {
    let node = Arc::new(MockNode::default());
    let bus = Arc::new(MockBus::default());
    node.add_block(50, 1, 0);
    node.blocks.lock().unwrap().get_mut(&50).unwrap().hash = None;
    node.push_heads([50]);

    let mut ingestion = pipeline(&node, &bus, 10);
    assert_eq!(
        ingestion.tick().await,
        TickOutcome::Failed { block_number: 50, reason: "malformed" }
    );
    assert!(bus.published_numbers().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unreachable_node_is_logged_not_fatal() {
    let node = Arc::new(MockNode::default());
    let bus = Arc::new(MockBus::default());
    node.add_block(10, 0, 0);
    node.push_heads([10]);
    node.head_unavailable.store(true, Ordering::SeqCst);

    let mut ingestion = pipeline(&node, &bus, 10);
    assert_eq!(ingestion.tick().await, TickOutcome::PollFailed);

    node.head_unavailable.store(false, Ordering::SeqCst);
    assert_eq!(ingestion.tick().await, TickOutcome::Published(10));
    assert_eq!(bus.payload(0)["transactions"], Value::Array(Vec::new()));
}

fn assert_send<F: std::future::Future + Send>(_: &F) {}

#[tokio::test]
async fn run_future_is_send() {
    let node = Arc::new(MockNode::default());
    let bus = Arc::new(MockBus::default());
    let ingestion = pipeline(&node, &bus, 10);
    assert_send(&ingestion.run());
}

#[tokio::test(start_paused = true)]
async fn run_stops_on_cancellation() {
    let node = Arc::new(MockNode::default());
    let bus = Arc::new(MockBus::default());
    node.add_block(1, 1, 1);
    node.add_block(2, 1, 1);
    node.push_heads([1, 1, 2]);

    let cancel = CancellationToken::new();
    let ingestion = IngestionLoop::new(
        Arc::clone(&node),
        Arc::clone(&bus),
        config(10),
        Metrics::new().unwrap(),
        cancel.clone(),
    );
    let task = tokio::spawn(ingestion.run());

    // Poll interval is two seconds: ticks at 0s, 2s and 4s.
    tokio::time::sleep(Duration::from_secs(5)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("loop did not stop")
        .unwrap();

    assert_eq!(bus.published_numbers(), vec![1, 2]);
}

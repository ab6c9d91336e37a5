#![allow(dead_code)]

use alloy::primitives::{keccak256, Address, B256, Bytes};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use migration::MigratorTrait;
use parking_lot::Mutex;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use userop_relay::jobs::submission_pool::{start_submission_pool, SubmissionQueue};
use userop_relay::models::record::{
    OperationReceipt, OperationRecord, ReceiptLog, SubmissionOutcome,
};
use userop_relay::services::chain_gateway::{
    ChainGateway, GatewayError, SignedTransaction, TransactionHandle, UnsignedTransaction,
};
use userop_relay::services::intake::IntakeService;
use userop_relay::services::operation_encoder::EntryPointEncoder;
use userop_relay::services::record_store::{RecordStore, SeaOrmRecordStore, StoreError};
use userop_relay::services::relay_signer::{RelaySigner, SignError};
use userop_relay::services::slot_guard::SlotGuard;
use userop_relay::services::status::StatusService;
use userop_relay::services::submission::{SubmissionSettings, SubmissionWorker};
use userop_relay::{build_router, AppState};

pub const ENTRY_POINT: Address = Address::repeat_byte(0xe4);
pub const RELAYER: Address = Address::repeat_byte(0x4e);

/// Set up an isolated in-memory database with migrations applied
pub async fn setup_test_db() -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    // One connection, otherwise every pooled connection sees its own empty database
    options.max_connections(1).min_connections(1).sqlx_logging(false);

    let db = Database::connect(options).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

/// How the fake ledger answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    Confirm,
    RejectBroadcast,
    Revert,
    NeverInclude,
    Unavailable,
    Panic,
    /// Node accepts the first broadcast, then evicts it. Mines strictly in
    /// relayer nonce order and reports only the mined count.
    DropFirst,
}

/// In-process ledger stand-in
///
/// While closed, `sequence_number` blocks, so operations stay `pending`.
pub struct FakeGateway {
    mode: GatewayMode,
    open: AtomicBool,
    opened: Notify,
    /// Relayer nonces of every accepted broadcast, in order
    broadcast_nonces: Mutex<Vec<u64>>,
    sent: Mutex<HashMap<B256, u64>>,
    dropped: Mutex<Option<B256>>,
    mined: Mutex<u64>,
}

impl FakeGateway {
    pub fn new(mode: GatewayMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            open: AtomicBool::new(true),
            opened: Notify::new(),
            broadcast_nonces: Mutex::new(Vec::new()),
            sent: Mutex::new(HashMap::new()),
            dropped: Mutex::new(None),
            mined: Mutex::new(0),
        })
    }

    pub fn closed(mode: GatewayMode) -> Arc<Self> {
        let gateway = Self::new(mode);
        gateway.open.store(false, Ordering::SeqCst);
        gateway
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.opened.notify_waiters();
    }

    pub fn broadcast_nonces(&self) -> Vec<u64> {
        self.broadcast_nonces.lock().clone()
    }

    async fn wait_open(&self) {
        loop {
            let opened = self.opened.notified();
            if self.open.load(Ordering::SeqCst) {
                return;
            }
            opened.await;
        }
    }
}

#[async_trait]
impl ChainGateway for FakeGateway {
    async fn sequence_number(&self, _account: Address) -> Result<u64, GatewayError> {
        self.wait_open().await;
        match self.mode {
            GatewayMode::Unavailable => Err(GatewayError::Unavailable("connection refused".into())),
            GatewayMode::Panic => panic!("fake gateway exploded"),
            GatewayMode::DropFirst => Ok(*self.mined.lock()),
            // Never counts unmined broadcasts, like a lagging node
            _ => Ok(0),
        }
    }

    async fn broadcast(&self, tx: SignedTransaction) -> Result<TransactionHandle, GatewayError> {
        if self.mode == GatewayMode::RejectBroadcast {
            return Err(GatewayError::Broadcast("nonce too low".into()));
        }

        let mut nonce = [0u8; 8];
        nonce.copy_from_slice(&tx.raw[..8]);
        let nonce = u64::from_be_bytes(nonce);

        let mut broadcast = self.broadcast_nonces.lock();
        if self.mode == GatewayMode::DropFirst && broadcast.is_empty() {
            *self.dropped.lock() = Some(tx.hash);
        }
        broadcast.push(nonce);
        self.sent.lock().insert(tx.hash, nonce);

        Ok(TransactionHandle { hash: tx.hash })
    }

    async fn await_inclusion(&self, handle: &TransactionHandle) -> Result<OperationReceipt, GatewayError> {
        match self.mode {
            GatewayMode::Revert => Err(GatewayError::Reverted(handle.hash)),
            GatewayMode::NeverInclude => std::future::pending().await,
            GatewayMode::DropFirst => {
                let nonce = self.sent.lock().get(&handle.hash).copied();
                let evicted = *self.dropped.lock() == Some(handle.hash);
                let next_to_mine = {
                    let mut mined = self.mined.lock();
                    match nonce {
                        Some(n) if !evicted && n == *mined => {
                            *mined += 1;
                            true
                        }
                        _ => false,
                    }
                };
                if !next_to_mine {
                    // Evicted, or stuck behind a nonce gap
                    return std::future::pending().await;
                }
                Ok(confirmed_receipt(handle.hash))
            }
            _ => Ok(confirmed_receipt(handle.hash)),
        }
    }
}

fn confirmed_receipt(hash: B256) -> OperationReceipt {
    OperationReceipt {
        transaction_hash: hash,
        block_number: Some(100),
        gas_used: 95_000,
        success: true,
        logs: vec![ReceiptLog {
            address: ENTRY_POINT,
            topics: vec![B256::repeat_byte(0x49)],
            data: Bytes::new(),
        }],
    }
}

/// Record store whose `mark_submitted` fails while `failing` is set
pub struct FailingStore {
    inner: Arc<dyn RecordStore>,
    failing: AtomicBool,
    failed_writes: AtomicUsize,
}

impl FailingStore {
    pub fn new(inner: Arc<dyn RecordStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failing: AtomicBool::new(true),
            failed_writes: AtomicUsize::new(0),
        })
    }

    pub fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    pub fn failed_writes(&self) -> usize {
        self.failed_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for FailingStore {
    async fn insert(&self, record: &OperationRecord) -> Result<(), StoreError> {
        self.inner.insert(record).await
    }

    async fn mark_submitted(&self, id: &str, tx_hash: B256) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            self.failed_writes.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Database(DbErr::Custom("disk I/O error".into())));
        }
        self.inner.mark_submitted(id, tx_hash).await
    }

    async fn update_status(&self, id: &str, outcome: &SubmissionOutcome) -> Result<(), StoreError> {
        self.inner.update_status(id, outcome).await
    }

    async fn get(&self, id: &str) -> Result<OperationRecord, StoreError> {
        self.inner.get(id).await
    }

    async fn list_all(&self) -> Result<Vec<OperationRecord>, StoreError> {
        self.inner.list_all().await
    }

    async fn list_unfinished(&self) -> Result<Vec<OperationRecord>, StoreError> {
        self.inner.list_unfinished().await
    }
}

/// Signer whose raw transaction is `nonce (8 bytes BE) ++ input`
pub struct FakeSigner;

#[async_trait]
impl RelaySigner for FakeSigner {
    fn address(&self) -> Address {
        RELAYER
    }

    async fn sign(&self, tx: UnsignedTransaction) -> Result<SignedTransaction, SignError> {
        let mut raw = tx.nonce.to_be_bytes().to_vec();
        raw.extend_from_slice(&tx.input);
        Ok(SignedTransaction {
            hash: keccak256(&raw),
            raw: Bytes::from(raw),
        })
    }
}

pub struct TestRelay {
    pub app: Router,
    pub store: Arc<dyn RecordStore>,
    pub slots: SlotGuard,
    pub queue: SubmissionQueue,
    pub pool: JoinHandle<()>,
}

pub fn test_worker(
    store: Arc<dyn RecordStore>,
    gateway: Arc<FakeGateway>,
    inclusion_timeout: Duration,
) -> Arc<SubmissionWorker> {
    Arc::new(SubmissionWorker::new(
        store,
        gateway,
        Arc::new(FakeSigner),
        Arc::new(EntryPointEncoder::new(RELAYER)),
        SubmissionSettings {
            entry_point: ENTRY_POINT,
            gas_limit: 1_000_000,
            inclusion_timeout,
        },
    ))
}

/// Full relay (store, pool, router) over a fresh database
pub async fn spawn_relay(gateway: Arc<FakeGateway>) -> TestRelay {
    spawn_relay_with_timeout(gateway, Duration::from_secs(5)).await
}

pub async fn spawn_relay_with_timeout(gateway: Arc<FakeGateway>, inclusion_timeout: Duration) -> TestRelay {
    let db = setup_test_db().await.expect("Failed to set up test DB");
    let store: Arc<dyn RecordStore> = Arc::new(SeaOrmRecordStore::new(db.clone()));
    spawn_relay_over(db, store, gateway, inclusion_timeout)
}

/// Relay over a caller-provided store (the database still backs `/health`)
pub fn spawn_relay_over(
    db: DatabaseConnection,
    store: Arc<dyn RecordStore>,
    gateway: Arc<FakeGateway>,
    inclusion_timeout: Duration,
) -> TestRelay {
    let worker = test_worker(Arc::clone(&store), gateway, inclusion_timeout);
    let (queue, pool) = start_submission_pool(worker, 4);
    let slots = SlotGuard::default();

    let state = AppState {
        db,
        intake: IntakeService::new(Arc::clone(&store), slots.clone(), queue.clone()),
        status: StatusService::new(Arc::clone(&store)),
    };

    TestRelay {
        app: build_router(state),
        store,
        slots,
        queue,
        pool,
    }
}

/// A valid operation body for `sender` / `nonce`
pub fn operation_body(sender: &str, nonce: u64) -> Value {
    serde_json::json!({
        "sender": sender,
        "nonce": nonce,
        "initCode": "0x",
        "callData": "0xb61d27f6",
        "callGasLimit": 100000,
        "verificationGasLimit": 100000,
        "preVerificationGas": 21000,
        "maxFeePerGas": "0x77359400",
        "maxPriorityFeePerGas": "0x3b9aca00",
        "signature": "0x1234",
        "paymasterAndData": "0x"
    })
}

pub fn sender(byte: u8) -> String {
    Address::repeat_byte(byte).to_string()
}

pub async fn post_json(app: &Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    read_json(response).await
}

/// POST a body verbatim, for JSON a `Value` cannot represent exactly
pub async fn post_raw(app: &Router, uri: &str, body: String) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    read_json(response).await
}

pub async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    read_json(response).await
}

async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

pub async fn submit(app: &Router, body: &Value) -> String {
    let (status, json) = post_json(app, "/api/submit_op", body).await;
    assert_eq!(status, StatusCode::OK, "submit failed: {}", json);
    json["op_hash"].as_str().unwrap().to_string()
}

/// Poll the status endpoint until the operation is completed or failed
pub async fn wait_for_terminal(app: &Router, op_hash: &str) -> Value {
    for _ in 0..500 {
        let (status, json) = get_json(app, &format!("/api/status/{}", op_hash)).await;
        assert_eq!(status, StatusCode::OK);
        if json["status"] == "completed" || json["status"] == "failed" {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("operation {} never reached a terminal status", op_hash);
}

//! 審計流程測試共用的內存協作者
//!
//! 賬本、索引和網絡都在進程內實現，測試可以統計網絡操作次數、注入故障並觀察併發度。

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use shard_auditor::digest::digest_hex;
use shard_auditor::enumerator::ShardEnumerator;
use shard_auditor::error::{AuditorError, Result};
use shard_auditor::index::{ContactDirectory, IndexSnapshot, ShardIndex, ShardQuery, ShardStream, SnapshotIndex};
use shard_auditor::ledger::Ledger;
use shard_auditor::negotiator::RetrievalNegotiator;
use shard_auditor::network::{NetworkClient, ShardByteStream};
use shard_auditor::retry::RetryConfig;
use shard_auditor::shard_path::ShardPathResolver;
use shard_auditor::types::{
    AuditResult, Contact, Contract, NodeId, RetrievalPointer, SamplingMode, ShardDescriptor,
};
use shard_auditor::worker::{ShardVerifier, ShardWorker};
use shard_auditor::Auditor;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn node(c: char) -> NodeId {
    c.to_string().repeat(40).parse().unwrap()
}

pub fn contact(node_id: &NodeId) -> Contact {
    Contact {
        address: "127.0.0.1".into(),
        port: 4000,
        node_id: node_id.clone(),
        protocol: Some("1.2.0".into()),
    }
}

/// 存放在 `node_id` 上且合約仍有效的分片
pub fn shard_on(node_id: &NodeId, payload: &[u8]) -> ShardDescriptor {
    let hash = digest_hex(payload);
    ShardDescriptor {
        hash: hash.clone(),
        contracts: vec![Contract {
            node_id: node_id.clone(),
            data_hash: hash,
            store_begin: 0,
            store_end: i64::MAX,
            extra: Default::default(),
        }],
    }
}

/// `count` 份互不相同的數據，每個分片一份
pub fn payloads(prefix: &str, count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| format!("{}-shard-{}", prefix, i).into_bytes())
        .collect()
}

// ============ 賬本 ============

#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<BTreeMap<String, AuditResult>>,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl MemoryLedger {
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn entry(&self, node_id: &NodeId) -> Option<AuditResult> {
        self.entries.lock().unwrap().get(node_id.as_str()).cloned()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn has(&self, node_id: &NodeId) -> Result<bool> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AuditorError::LedgerRead("disk unavailable".into()));
        }
        Ok(self.entries.lock().unwrap().contains_key(node_id.as_str()))
    }

    async fn commit(&self, node_id: &NodeId, result: &AuditResult) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AuditorError::LedgerWrite("disk full".into()));
        }
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(node_id.as_str()) {
            return Err(AuditorError::AlreadyAudited(node_id.to_string()));
        }
        entries.insert(node_id.to_string(), result.clone());
        Ok(())
    }

    async fn get(&self, node_id: &NodeId) -> Result<Option<AuditResult>> {
        Ok(self.entry(node_id))
    }

    async fn entries(&self) -> Result<Vec<(String, AuditResult)>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

// ============ 索引 ============

/// 先產出 `good` 中的分片，然後返回游標錯誤
pub struct BrokenCursorIndex {
    pub good: Vec<ShardDescriptor>,
}

#[async_trait]
impl ShardIndex for BrokenCursorIndex {
    async fn query(&self, _query: ShardQuery) -> Result<ShardStream> {
        let mut items: Vec<Result<ShardDescriptor>> = self.good.iter().cloned().map(Ok).collect();
        items.push(Err(AuditorError::Index("cursor lost".into())));
        Ok(stream::iter(items).boxed())
    }
}

/// 統計游標被拉取次數的索引
///
/// 每次拉取時記錄「已拉取 - 已結束下載」的最大值，即尚未完成的分片數峰值
pub struct CountingIndex {
    shards: Vec<ShardDescriptor>,
    finished: Arc<AtomicUsize>,
    pub pulled: Arc<AtomicUsize>,
    pub max_outstanding: Arc<AtomicUsize>,
}

impl CountingIndex {
    pub fn new(shards: Vec<ShardDescriptor>, network: &MockNetwork) -> Self {
        Self {
            shards,
            finished: network.finished_downloads.clone(),
            pulled: Arc::new(AtomicUsize::new(0)),
            max_outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl ShardIndex for CountingIndex {
    async fn query(&self, _query: ShardQuery) -> Result<ShardStream> {
        let pulled = self.pulled.clone();
        let finished = self.finished.clone();
        let max_outstanding = self.max_outstanding.clone();

        let cursor = stream::iter(self.shards.clone()).map(move |shard| {
            let pulled = pulled.fetch_add(1, Ordering::SeqCst) + 1;
            let outstanding = pulled.saturating_sub(finished.load(Ordering::SeqCst));
            max_outstanding.fetch_max(outstanding, Ordering::SeqCst);
            Ok(shard)
        });
        Ok(cursor.boxed())
    }
}

// ============ 網絡 ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerBehaviour {
    Token,
    NoToken,
    Fail,
}

/// 存活期間計為一個進行中的網絡操作
///
/// 下載流持有它直到被丟棄，因此一次下載從打開到讀完（或超時）都計入併發度
struct InFlight {
    active: Arc<AtomicUsize>,
    finished: Option<Arc<AtomicUsize>>,
}

impl InFlight {
    fn enter(active: &Arc<AtomicUsize>, max_active: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        max_active.fetch_max(now, Ordering::SeqCst);
        Self {
            active: active.clone(),
            finished: None,
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        if let Some(finished) = &self.finished {
            finished.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// 提供已登記數據並統計每次操作的網絡
#[derive(Default)]
pub struct MockNetwork {
    payloads: Mutex<HashMap<String, Vec<u8>>>,
    pointers: Mutex<HashMap<String, PointerBehaviour>>,
    latency: Mutex<Duration>,
    chunk_latency: Mutex<Duration>,
    pub hang_downloads: AtomicBool,
    pub negotiations: AtomicUsize,
    pub downloads: AtomicUsize,
    pub finished_downloads: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    pub max_active: AtomicUsize,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 為 `digest` 提供 `payload`
    pub fn serve(&self, digest: &str, payload: &[u8]) {
        self.payloads
            .lock()
            .unwrap()
            .insert(digest.to_string(), payload.to_vec());
    }

    pub fn set_pointer(&self, digest: &str, behaviour: PointerBehaviour) {
        self.pointers
            .lock()
            .unwrap()
            .insert(digest.to_string(), behaviour);
    }

    /// 每次協商延遲，讓併發的分片任務重疊
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// 下載流每個數據塊之前的延遲
    pub fn set_chunk_latency(&self, latency: Duration) {
        *self.chunk_latency.lock().unwrap() = latency;
    }

    pub fn network_ops(&self) -> usize {
        self.negotiations.load(Ordering::SeqCst) + self.downloads.load(Ordering::SeqCst)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkClient for MockNetwork {
    async fn get_retrieval_pointer(
        &self,
        _contact: &Contact,
        contract: &Contract,
    ) -> Result<RetrievalPointer> {
        self.negotiations.fetch_add(1, Ordering::SeqCst);
        let in_flight = InFlight::enter(&self.active, &self.max_active);

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        drop(in_flight);

        let behaviour = self
            .pointers
            .lock()
            .unwrap()
            .get(&contract.data_hash)
            .copied()
            .unwrap_or(PointerBehaviour::Token);

        match behaviour {
            PointerBehaviour::Token => Ok(RetrievalPointer::with_token("token")),
            PointerBehaviour::NoToken => Ok(RetrievalPointer::default()),
            PointerBehaviour::Fail => Err(AuditorError::Negotiation("bridge refused".into())),
        }
    }

    async fn open_shard_download(
        &self,
        _contact: &Contact,
        digest: &str,
        _token: &str,
    ) -> Result<ShardByteStream> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let mut in_flight = InFlight::enter(&self.active, &self.max_active);
        in_flight.finished = Some(self.finished_downloads.clone());

        if self.hang_downloads.load(Ordering::SeqCst) {
            let hung = stream::pending::<Result<Bytes>>().map(move |chunk| {
                let _held = &in_flight;
                chunk
            });
            return Ok(hung.boxed());
        }

        let payload = self.payloads.lock().unwrap().get(digest).cloned();
        let data = match payload {
            Some(data) => data,
            None => return Err(AuditorError::Transfer("HTTP 404".into())),
        };

        let latency = *self.chunk_latency.lock().unwrap();
        let chunks: Vec<Result<Bytes>> = data
            .chunks(4)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let body = stream::iter(chunks)
            .then(move |chunk| async move {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                chunk
            })
            .map(move |chunk| {
                let _held = &in_flight;
                chunk
            });
        Ok(body.boxed())
    }
}

// ============ 審計器組裝 ============

pub struct Harness {
    pub ledger: Arc<MemoryLedger>,
    pub network: Arc<MockNetwork>,
    pub auditor: Auditor,
}

pub struct HarnessBuilder {
    contacts: Vec<Contact>,
    shards: Vec<ShardDescriptor>,
    index: Option<Arc<dyn ShardIndex>>,
    node_concurrency: usize,
    shard_concurrency: usize,
    transfer_timeout: Duration,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            contacts: Vec::new(),
            shards: Vec::new(),
            index: None,
            node_concurrency: 4,
            shard_concurrency: 4,
            transfer_timeout: Duration::from_secs(5),
        }
    }

    pub fn contact(mut self, node_id: &NodeId) -> Self {
        self.contacts.push(contact(node_id));
        self
    }

    pub fn shards(mut self, shards: impl IntoIterator<Item = ShardDescriptor>) -> Self {
        self.shards.extend(shards);
        self
    }

    /// 替換快照分片索引，快照仍作為聯絡資訊目錄
    pub fn index(mut self, index: Arc<dyn ShardIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn concurrency(mut self, nodes: usize, shards: usize) -> Self {
        self.node_concurrency = nodes;
        self.shard_concurrency = shards;
        self
    }

    pub fn transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    pub fn build(self, root: &Path, ledger: Arc<MemoryLedger>, network: Arc<MockNetwork>) -> Harness {
        let snapshot = Arc::new(SnapshotIndex::new(IndexSnapshot {
            contacts: self.contacts,
            shards: self.shards,
        }));
        let index: Arc<dyn ShardIndex> = match self.index {
            Some(index) => index,
            None => snapshot.clone(),
        };
        let contacts: Arc<dyn ContactDirectory> = snapshot;
        let net: Arc<dyn NetworkClient> = network.clone();
        let ledger_dyn: Arc<dyn Ledger> = ledger.clone();

        let worker = ShardWorker::new(
            RetrievalNegotiator::new(net.clone(), Duration::from_secs(5), RetryConfig::none()),
            ShardVerifier::new(net, ShardPathResolver::new(root), self.transfer_timeout),
        );

        let auditor = Auditor::new(
            ledger_dyn,
            contacts,
            ShardEnumerator::new(index, SamplingMode::Exhaustive),
            worker,
        )
        .with_concurrency(self.node_concurrency, self.shard_concurrency);

        Harness {
            ledger,
            network,
            auditor,
        }
    }
}

//! 分片內容摘要驗證
//!
//! 以增量方式對流式下載的字節計算 SHA-256，最終以小寫十六進制與預期摘要比對。

use sha2::{Digest, Sha256};

/// 增量摘要計算器
#[derive(Debug, Clone, Default)]
pub struct DigestVerifier {
    hasher: Sha256,
    bytes_seen: u64,
}

impl DigestVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// 送入一塊數據
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes_seen += chunk.len() as u64;
    }

    /// 已處理的字節數
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    /// 結束計算並返回小寫十六進制摘要
    pub fn finalize_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }

    /// 與預期摘要比對（大小寫不敏感），不結束計算
    pub fn matches(&self, expected: &str) -> bool {
        self.clone().finalize_hex() == expected.to_ascii_lowercase()
    }
}

/// 一次性計算整段數據的摘要
pub fn digest_hex(data: &[u8]) -> String {
    let mut verifier = DigestVerifier::new();
    verifier.update(data);
    verifier.finalize_hex()
}

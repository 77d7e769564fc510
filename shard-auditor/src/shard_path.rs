//! 分片本地存儲路徑解析
//!
//! 按預期摘要的前綴分兩級目錄存放，限制單個目錄下的文件數量：
//!
//! ```text
//! {root}/
//!   └── ab/
//!       └── cd/
//!           └── abcd1234...   (完整摘要)
//! ```
//!
//! 路徑只由預期摘要決定，與節點或合約無關；同一摘要的重複審計會覆蓋同一文件。

use crate::error::{AuditorError, Result};
use std::path::PathBuf;

/// 摘要最短長度（兩級前綴各兩個字符）
const MIN_DIGEST_LEN: usize = 4;

#[derive(Debug, Clone)]
pub struct ShardPathResolver {
    root: PathBuf,
}

impl ShardPathResolver {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// 將摘要映射到 `{root}/{d[0:2]}/{d[2:4]}/{d}`，`d` 為小寫形式
    ///
    /// 摘要必須是十六進制字符串，防止路徑穿越
    pub fn resolve(&self, digest: &str) -> Result<PathBuf> {
        if digest.len() < MIN_DIGEST_LEN {
            return Err(AuditorError::InvalidDigest(format!(
                "digest too short: {:?}",
                digest
            )));
        }
        if !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AuditorError::InvalidDigest(format!(
                "digest is not hex: {:?}",
                digest
            )));
        }

        let digest = digest.to_ascii_lowercase();
        Ok(self
            .root
            .join(&digest[0..2])
            .join(&digest[2..4])
            .join(&digest))
    }

    /// 解析路徑並確保父目錄存在
    pub async fn prepare(&self, digest: &str) -> Result<PathBuf> {
        let path = self.resolve(digest)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(path)
    }
}

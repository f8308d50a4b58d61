//! 定价配置来源
//!
//! 外部仓储层的适配器：为一次重载提供只读、读一致的配置快照。

mod file;
mod postgres;

pub use file::JsonFileConfigSource;
pub use postgres::PgConfigSource;

use crate::error::Result;
use crate::models::ConfigSnapshot;
use async_trait::async_trait;
use parking_lot::RwLock;

/// 配置来源接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PricingConfigSource: Send + Sync {
    /// 加载当前配置快照
    async fn load_snapshot(&self) -> Result<ConfigSnapshot>;
}

/// 内存配置来源，可整体替换快照
#[derive(Debug, Default)]
pub struct InMemoryConfigSource {
    snapshot: RwLock<ConfigSnapshot>,
}

impl InMemoryConfigSource {
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    /// 替换快照，下一次重载生效
    pub fn replace(&self, snapshot: ConfigSnapshot) {
        *self.snapshot.write() = snapshot;
    }

    /// 原地修改快照
    pub fn update(&self, f: impl FnOnce(&mut ConfigSnapshot)) {
        f(&mut self.snapshot.write());
    }
}

#[async_trait]
impl PricingConfigSource for InMemoryConfigSource {
    async fn load_snapshot(&self) -> Result<ConfigSnapshot> {
        Ok(self.snapshot.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_replace() {
        let source = InMemoryConfigSource::new(ConfigSnapshot {
            tenant_id: "acme".to_string(),
            ..Default::default()
        });
        assert_eq!(source.load_snapshot().await.unwrap().tenant_id, "acme");

        source.update(|s| s.tenant_id = "globex".to_string());
        assert_eq!(source.load_snapshot().await.unwrap().tenant_id, "globex");

        source.replace(ConfigSnapshot::default());
        assert!(source.load_snapshot().await.unwrap().tenant_id.is_empty());
    }
}

//! JSON 文件配置来源

use super::PricingConfigSource;
use crate::error::{Result, RuleError};
use crate::models::ConfigSnapshot;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// 从 JSON 文档读取 `ConfigSnapshot`
#[derive(Debug, Clone)]
pub struct JsonFileConfigSource {
    path: PathBuf,
    /// 文档未指定租户时使用
    default_tenant: Option<String>,
}

impl JsonFileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            default_tenant: None,
        }
    }

    pub fn with_default_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.default_tenant = Some(tenant_id.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PricingConfigSource for JsonFileConfigSource {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load_snapshot(&self) -> Result<ConfigSnapshot> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            RuleError::ConfigSource(format!("读取 {} 失败: {}", self.path.display(), e))
        })?;

        let mut snapshot: ConfigSnapshot = serde_json::from_str(&content)?;
        if snapshot.tenant_id.is_empty()
            && let Some(tenant) = &self.default_tenant
        {
            snapshot.tenant_id = tenant.clone();
        }

        debug!(
            components = snapshot.components.len(),
            bundle_rules = snapshot.bundle_rules.len(),
            attributes = snapshot.attributes.len(),
            "配置快照已加载"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_snapshot_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "components": [{{"id": 1, "name": "LoanRate", "component_type": "RATE", "tiers": []}}],
                "attributes": [{{"attribute_key": "amount", "data_type": "DECIMAL", "runtime_type": "rust_decimal::Decimal"}}]
            }}"#
        )
        .unwrap();

        let source = JsonFileConfigSource::new(file.path()).with_default_tenant("acme");
        let snapshot = source.load_snapshot().await.unwrap();

        assert_eq!(snapshot.tenant_id, "acme");
        assert_eq!(snapshot.components[0].name, "LoanRate");
        assert_eq!(snapshot.attributes.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_config_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonFileConfigSource::new(dir.path().join("absent.json"));

        let err = source.load_snapshot().await.unwrap_err();
        assert!(matches!(err, RuleError::ConfigSource(_)));
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let err = JsonFileConfigSource::new(file.path())
            .load_snapshot()
            .await
            .unwrap_err();
        assert!(matches!(err, RuleError::JsonError(_)));
    }
}

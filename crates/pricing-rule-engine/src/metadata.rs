//! 属性元数据注册表
//!
//! 每次编译构建一次，按属性键查找声明的数据类型和运行时类型。

use crate::error::{Result, RuleError};
use crate::models::{AttributeMetadata, DataType};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

/// 属性键允许的形式，保证可以安全嵌入规则源码
const ATTRIBUTE_KEY_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_.\-]*$";

/// 运行时类型分派
///
/// 表达式构建按运行时类型（而非声明的数据类型）选择比较语义。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeType {
    Text,
    Integer,
    Boolean,
    Decimal,
    Date,
}

impl RuntimeType {
    /// 从运行时类型全名解析，同时接受短别名
    pub fn from_qualified_name(name: &str) -> Option<Self> {
        match name.trim() {
            "String" | "std::string::String" => Some(Self::Text),
            "i64" => Some(Self::Integer),
            "bool" => Some(Self::Boolean),
            "rust_decimal::Decimal" | "Decimal" => Some(Self::Decimal),
            "chrono::NaiveDate" | "NaiveDate" => Some(Self::Date),
            _ => None,
        }
    }

    /// 规则源码中使用的类型路径
    pub fn qualified_name(&self) -> &'static str {
        match self {
            Self::Text => "String",
            Self::Integer => "i64",
            Self::Boolean => "bool",
            Self::Decimal => "rust_decimal::Decimal",
            Self::Date => "chrono::NaiveDate",
        }
    }

    /// 对应的声明数据类型
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Text => DataType::String,
            Self::Integer => DataType::Integer,
            Self::Boolean => DataType::Boolean,
            Self::Decimal => DataType::Decimal,
            Self::Date => DataType::Date,
        }
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified_name())
    }
}

/// 解析后的属性条目
#[derive(Debug, Clone)]
pub struct ResolvedAttribute {
    pub metadata: AttributeMetadata,
    pub runtime_type: RuntimeType,
}

/// 属性元数据注册表
#[derive(Debug, Clone, Default)]
pub struct AttributeMetadataRegistry {
    entries: HashMap<String, ResolvedAttribute>,
}

impl AttributeMetadataRegistry {
    /// 从元数据列表构建注册表
    ///
    /// 重复键、非法键或未知运行时类型都会使本次编译失败。
    pub fn from_entries(entries: impl IntoIterator<Item = AttributeMetadata>) -> Result<Self> {
        let key_pattern = Regex::new(ATTRIBUTE_KEY_PATTERN).map_err(|e| {
            RuleError::MetadataResolution {
                attribute: String::new(),
                reason: format!("属性键模式无效: {}", e),
            }
        })?;

        let mut map = HashMap::new();
        for metadata in entries {
            let key = metadata.attribute_key.clone();

            if !key_pattern.is_match(&key) {
                return Err(RuleError::MetadataResolution {
                    attribute: key,
                    reason: "属性键包含非法字符".to_string(),
                });
            }

            let runtime_type =
                RuntimeType::from_qualified_name(&metadata.runtime_type).ok_or_else(|| {
                    RuleError::MetadataResolution {
                        attribute: key.clone(),
                        reason: format!("未知的运行时类型 '{}'", metadata.runtime_type),
                    }
                })?;

            if map.contains_key(&key) {
                return Err(RuleError::MetadataResolution {
                    attribute: key,
                    reason: "属性键重复".to_string(),
                });
            }

            map.insert(
                key,
                ResolvedAttribute {
                    metadata,
                    runtime_type,
                },
            );
        }

        Ok(Self { entries: map })
    }

    /// 按键解析属性
    pub fn resolve(&self, key: &str) -> Result<&ResolvedAttribute> {
        self.entries
            .get(key)
            .ok_or_else(|| RuleError::MetadataResolution {
                attribute: key.to_string(),
                reason: "属性未注册".to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_and_unknown() {
        let registry = AttributeMetadataRegistry::from_entries(vec![
            AttributeMetadata::new("amount", DataType::Decimal),
            AttributeMetadata::new("region", DataType::String),
        ])
        .unwrap();

        let amount = registry.resolve("amount").unwrap();
        assert_eq!(amount.runtime_type, RuntimeType::Decimal);
        assert_eq!(registry.len(), 2);

        let err = registry.resolve("tenure").unwrap_err();
        assert!(matches!(err, RuleError::MetadataResolution { ref attribute, .. } if attribute == "tenure"));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let err = AttributeMetadataRegistry::from_entries(vec![
            AttributeMetadata::new("amount", DataType::Decimal),
            AttributeMetadata::new("amount", DataType::Integer),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("重复"));
    }

    #[test]
    fn test_unknown_runtime_type_rejected() {
        let mut metadata = AttributeMetadata::new("amount", DataType::Decimal);
        metadata.runtime_type = "java.math.BigDecimal".to_string();
        let err = AttributeMetadataRegistry::from_entries(vec![metadata]).unwrap_err();
        assert!(err.to_string().contains("运行时类型"));
    }

    #[test]
    fn test_illegal_key_rejected() {
        let err = AttributeMetadataRegistry::from_entries(vec![AttributeMetadata::new(
            "amount\")",
            DataType::Decimal,
        )])
        .unwrap_err();
        assert!(err.to_string().contains("非法字符"));

        assert!(
            AttributeMetadataRegistry::from_entries(vec![AttributeMetadata::new(
                "customer.tier-level",
                DataType::String,
            )])
            .is_ok()
        );
    }

    #[test]
    fn test_short_aliases() {
        assert_eq!(RuntimeType::from_qualified_name("Decimal"), Some(RuntimeType::Decimal));
        assert_eq!(RuntimeType::from_qualified_name("NaiveDate"), Some(RuntimeType::Date));
        assert_eq!(RuntimeType::from_qualified_name("u128"), None);
    }
}

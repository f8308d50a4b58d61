//! 编译产物与版本化存储
//!
//! `CompiledRuleSet` 一经构建即不可变，可被任意多个会话同时持有。
//! `ArtifactStore` 只追加，按版本保留最近的若干产物。

use crate::error::Diagnostic;
use crate::metadata::RuntimeType;
use crate::models::{AdjustmentKind, AttributeValue};
use crate::operators::Operator;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

/// 规则适用的事实种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Component,
    Bundle,
}

/// 属性访问：键 + 显式转换目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeAccess {
    pub key: String,
    pub cast: RuntimeType,
}

/// 日期谓词
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePredicate {
    Equal,
    After,
    Before,
}

/// 编译后的条件树
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// 恒真
    Always,
    /// 组件在调用方的目标集合中
    Targets(i64),
    Not(Box<Predicate>),
    /// 合取
    All(Vec<Predicate>),
    /// 符号比较（整数、字符串、布尔）
    Compare {
        access: AttributeAccess,
        operator: Operator,
        literal: AttributeValue,
    },
    /// 集合成员
    OneOf {
        access: AttributeAccess,
        literals: Vec<AttributeValue>,
    },
    /// 十进制数三路比较：`compare_to(operand) <op> 0`
    DecimalOrder {
        access: AttributeAccess,
        operand: Decimal,
        operator: Operator,
    },
    DateCheck {
        access: AttributeAccess,
        predicate: DatePredicate,
        date: NaiveDate,
    },
}

impl Predicate {
    /// 顶层合取中是否含有目标守卫
    pub fn has_target_guard(&self) -> bool {
        match self {
            Self::Targets(_) => true,
            Self::All(parts) => parts.iter().any(|p| matches!(p, Self::Targets(_))),
            _ => false,
        }
    }

    /// 除目标守卫外不含任何条件
    pub fn is_unconditional(&self) -> bool {
        match self {
            Self::Always | Self::Targets(_) => true,
            Self::All(parts) => parts.iter().all(Self::is_unconditional),
            _ => false,
        }
    }
}

/// 规则动作
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    MatchTier {
        component_id: i64,
        tier_id: i64,
        tier_name: String,
        decision_value: Decimal,
    },
    Adjust {
        code: String,
        kind: AdjustmentKind,
        amount: Decimal,
    },
}

/// 单条编译后的规则
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRule {
    pub name: String,
    pub kind: RuleKind,
    pub predicate: Predicate,
    pub action: Action,
    /// 规则头所在行
    pub line: usize,
}

/// 编译产物：一份源码快照对应的完整可执行规则集
#[derive(Debug)]
pub struct CompiledRuleSet {
    pub version: u64,
    /// 源码的 SHA-256
    pub digest: String,
    pub compiled_at: DateTime<Utc>,
    pub source: String,
    pub rules: Vec<CompiledRule>,
    pub warnings: Vec<Diagnostic>,
}

impl CompiledRuleSet {
    /// 版本 0 的空产物，协调器启动时使用
    pub fn empty() -> Self {
        Self {
            version: 0,
            digest: source_digest(""),
            compiled_at: Utc::now(),
            source: String::new(),
            rules: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn rules_of(&self, kind: RuleKind) -> impl Iterator<Item = (usize, &CompiledRule)> {
        self.rules.iter().enumerate().filter(move |(_, r)| r.kind == kind)
    }

    /// 结构等价：同一源码编译出的规则集
    pub fn is_equivalent(&self, other: &CompiledRuleSet) -> bool {
        self.digest == other.digest && self.rules == other.rules
    }
}

/// 计算源码摘要
pub fn source_digest(source: &str) -> String {
    format!("{:x}", Sha256::digest(source.as_bytes()))
}

/// 版本化产物存储
#[derive(Clone)]
pub struct ArtifactStore {
    artifacts: Arc<DashMap<u64, Arc<CompiledRuleSet>>>,
    max_retained: usize,
}

impl ArtifactStore {
    pub fn new(max_retained: usize) -> Self {
        Self {
            artifacts: Arc::new(DashMap::new()),
            max_retained: max_retained.max(1),
        }
    }

    /// 登记新产物，超出保留上限时丢弃最旧的版本
    ///
    /// 丢弃的只是存储中的句柄，已打开的会话各自持有 `Arc`，不受影响。
    pub fn register(&self, artifact: Arc<CompiledRuleSet>) {
        self.artifacts.insert(artifact.version, artifact);

        while self.artifacts.len() > self.max_retained {
            let Some(oldest) = self.artifacts.iter().map(|e| *e.key()).min() else {
                break;
            };
            self.artifacts.remove(&oldest);
            debug!(version = oldest, "旧版本产物已移出存储");
        }
    }

    pub fn get(&self, version: u64) -> Option<Arc<CompiledRuleSet>> {
        self.artifacts.get(&version).map(|e| Arc::clone(e.value()))
    }

    /// 已保留的版本，升序
    pub fn versions(&self) -> Vec<u64> {
        let mut versions: Vec<u64> = self.artifacts.iter().map(|e| *e.key()).collect();
        versions.sort_unstable();
        versions
    }

    pub fn latest_version(&self) -> Option<u64> {
        self.artifacts.iter().map(|e| *e.key()).max()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

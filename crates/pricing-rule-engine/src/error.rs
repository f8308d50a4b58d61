//! 规则引擎错误类型

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::models::DataType;
use crate::operators::Operator;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("属性元数据解析失败: {attribute} ({reason})")]
    MetadataResolution { attribute: String, reason: String },

    #[error("操作符 {operator} 不支持数据类型 {data_type}")]
    UnsupportedOperator {
        operator: Operator,
        data_type: DataType,
    },

    #[error("属性 {attribute} 的值 '{value}' 不是合法的 {data_type} 字面量")]
    InvalidLiteral {
        attribute: String,
        value: String,
        data_type: DataType,
    },

    #[error("规则编译失败: {}", summarize(.0))]
    Compilation(Vec<Diagnostic>),

    #[error("未找到匹配的定价层级: component_id={component_id}")]
    NoMatch { component_id: i64 },

    #[error("会话资源释放异常: session={session_id}")]
    SessionResource { session_id: String },

    #[error("类型不匹配: 属性 {attribute} 期望 {expected}, 实际 {actual}")]
    TypeMismatch {
        attribute: String,
        expected: String,
        actual: String,
    },

    #[error("规则触发次数超过上限 {limit}")]
    FiringLimitExceeded { limit: usize },

    #[error("金额计算溢出: {code}")]
    ArithmeticOverflow { code: String },

    #[error("规则重载超时: {seconds}s")]
    ReloadTimeout { seconds: u64 },

    #[error("配置来源错误: {0}")]
    ConfigSource(String),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
}

impl RuleError {
    /// 编译期错误：只会出现在重载路径上，不会到达评估调用方
    pub fn is_compile_time(&self) -> bool {
        matches!(
            self,
            Self::MetadataResolution { .. }
                | Self::UnsupportedOperator { .. }
                | Self::InvalidLiteral { .. }
                | Self::Compilation(_)
        )
    }

    /// 转换为诊断列表，供重载结果返回给调用方
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        match self {
            Self::Compilation(diagnostics) => diagnostics,
            other => vec![Diagnostic::error(other.to_string())],
        }
    }
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    let errors: Vec<&Diagnostic> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();
    match errors.first() {
        Some(first) if errors.len() > 1 => format!("{} (另有 {} 条错误)", first, errors.len() - 1),
        Some(first) => first.to_string(),
        None => "未知错误".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;

/// 诊断级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Warning,
}

/// 编译诊断
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// 所属规则名称（规则头解析之前的错误没有规则名）
    pub rule: Option<String>,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl Diagnostic {
    /// 与源码位置无关的错误（数据加载、组装阶段）
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            rule: None,
            line: 0,
            column: 0,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
        };
        write!(f, "{}", level)?;
        if self.line > 0 {
            write!(f, " [{}:{}]", self.line, self.column)?;
        }
        if let Some(rule) = &self.rule {
            write!(f, " rule \"{}\"", rule)?;
        }
        write!(f, ": {}", self.message)
    }
}

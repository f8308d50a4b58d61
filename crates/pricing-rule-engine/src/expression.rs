//! 条件表达式构建
//!
//! 把一个结构化的层级条件（属性、操作符、字面量）连同其元数据转换为
//! 规则语言中的一个布尔表达式片段。比较语义按运行时类型分派：
//!
//! - 十进制数：一律降级为 `compare_to(x) <op> 0`，按数值而非标度比较
//! - 日期：使用 `is_equal` / `is_after` / `is_before` 及其取反
//! - 其余类型：直接使用符号操作符，字符串和布尔只允许 EQ / NE
//!
//! 访问路径统一为 `attr("key")`，非字符串类型再加显式转换 `(attr("key") as T)`。

use crate::error::{Result, RuleError};
use crate::metadata::RuntimeType;
use crate::models::{AttributeMetadata, DATE_FORMAT, TierCondition};
use crate::operators::Operator;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;

/// 恒真片段
pub const ALWAYS_TRUE: &str = "true";

/// 表达式构建器
pub struct ExpressionBuilder;

impl ExpressionBuilder {
    /// 构建单个条件的表达式片段
    pub fn build(condition: &TierCondition, metadata: &AttributeMetadata) -> Result<String> {
        let raw = match condition.attribute_value.as_deref().map(str::trim) {
            None | Some("") => return Ok(ALWAYS_TRUE.to_string()),
            Some(raw) => raw,
        };

        let runtime_type = RuntimeType::from_qualified_name(&metadata.runtime_type)
            .ok_or_else(|| RuleError::MetadataResolution {
                attribute: metadata.attribute_key.clone(),
                reason: format!("未知的运行时类型 '{}'", metadata.runtime_type),
            })?;

        let access = access_path(&metadata.attribute_key, runtime_type);

        if condition.operator == Operator::In {
            return Self::build_membership(&access, raw, metadata, runtime_type);
        }

        let literal = format_literal(raw, metadata, runtime_type)?;
        let unsupported = || RuleError::UnsupportedOperator {
            operator: condition.operator,
            data_type: metadata.data_type,
        };

        match runtime_type {
            RuntimeType::Decimal => {
                let symbol = condition.operator.symbol().ok_or_else(unsupported)?;
                Ok(format!("{}.compare_to({}) {} 0", access, literal, symbol))
            }
            RuntimeType::Date => {
                let fragment = match condition.operator {
                    Operator::Eq => format!("{}.is_equal({})", access, literal),
                    Operator::Ne => format!("!({}.is_equal({}))", access, literal),
                    Operator::Gt => format!("{}.is_after({})", access, literal),
                    Operator::Lt => format!("{}.is_before({})", access, literal),
                    Operator::Ge => format!("!({}.is_before({}))", access, literal),
                    Operator::Le => format!("!({}.is_after({}))", access, literal),
                    // IN 已在上方单独分派，此分支只为穷尽匹配
                    Operator::In => return Err(unsupported()),
                };
                Ok(fragment)
            }
            RuntimeType::Integer => {
                let symbol = condition.operator.symbol().ok_or_else(unsupported)?;
                Ok(format!("{} {} {}", access, symbol, literal))
            }
            RuntimeType::Text | RuntimeType::Boolean => {
                if !condition.operator.is_equality() {
                    return Err(unsupported());
                }
                let symbol = condition.operator.symbol().ok_or_else(unsupported)?;
                Ok(format!("{} {} {}", access, symbol, literal))
            }
        }
    }

    /// IN：逗号拆分，去空白，丢弃空项
    fn build_membership(
        access: &str,
        raw: &str,
        metadata: &AttributeMetadata,
        runtime_type: RuntimeType,
    ) -> Result<String> {
        let literals = raw
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| format_literal(token, metadata, runtime_type))
            .collect::<Result<Vec<_>>>()?;

        // 只有分隔符的列表无法匹配任何值，按非法字面量处理
        if literals.is_empty() {
            return Err(RuleError::InvalidLiteral {
                attribute: metadata.attribute_key.clone(),
                value: raw.to_string(),
                data_type: metadata.data_type,
            });
        }

        Ok(format!("{} in [{}]", access, literals.join(", ")))
    }
}

/// 属性访问路径
fn access_path(key: &str, runtime_type: RuntimeType) -> String {
    match runtime_type {
        RuntimeType::Text => format!("attr(\"{}\")", key),
        other => format!("(attr(\"{}\") as {})", key, other.qualified_name()),
    }
}

/// 校验并格式化字面量：字符串和日期加引号，数值和布尔不加
fn format_literal(raw: &str, metadata: &AttributeMetadata, runtime_type: RuntimeType) -> Result<String> {
    let invalid = || RuleError::InvalidLiteral {
        attribute: metadata.attribute_key.clone(),
        value: raw.to_string(),
        data_type: metadata.data_type,
    };

    match runtime_type {
        RuntimeType::Text => Ok(quote(raw)),
        RuntimeType::Integer => raw
            .parse::<i64>()
            .map(|v| v.to_string())
            .map_err(|_| invalid()),
        RuntimeType::Decimal => Decimal::from_str(raw)
            .map(|v| v.to_string())
            .map_err(|_| invalid()),
        RuntimeType::Boolean => match raw.to_ascii_lowercase().as_str() {
            "true" => Ok("true".to_string()),
            "false" => Ok("false".to_string()),
            _ => Err(invalid()),
        },
        RuntimeType::Date => NaiveDate::parse_from_str(raw, DATE_FORMAT)
            .map(|d| quote(&d.format(DATE_FORMAT).to_string()))
            .map_err(|_| invalid()),
    }
}

/// 转义并加双引号
pub(crate) fn quote(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for c in raw.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

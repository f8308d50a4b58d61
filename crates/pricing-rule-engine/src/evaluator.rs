//! 条件评估器
//!
//! 在事实的属性表上求值编译后的条件树。

use crate::artifact::{AttributeAccess, DatePredicate, Predicate};
use crate::error::{Result, RuleError};
use crate::metadata::RuntimeType;
use crate::models::{AttributeValue, DATE_FORMAT};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

/// 求值所需的事实视图
pub struct FactView<'a> {
    pub attributes: &'a HashMap<String, AttributeValue>,
    /// 捆绑事实没有目标组件集合
    pub targets: Option<&'a BTreeSet<i64>>,
}

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 求值条件树
    ///
    /// 属性缺失时该比较为 false；属性存在但无法转换为声明类型时返回 TypeMismatch。
    pub fn evaluate(predicate: &Predicate, facts: &FactView<'_>) -> Result<bool> {
        match predicate {
            Predicate::Always => Ok(true),
            Predicate::Targets(component_id) => {
                Ok(facts.targets.is_some_and(|t| t.contains(component_id)))
            }
            Predicate::Not(inner) => Self::evaluate(inner, facts).map(|r| !r),
            Predicate::All(parts) => {
                for part in parts {
                    if !Self::evaluate(part, facts)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Compare {
                access,
                operator,
                literal,
            } => {
                let Some(value) = Self::read(access, facts)? else {
                    return Ok(false);
                };
                Ok(Self::order(&value, literal).is_some_and(|o| operator.holds(o)))
            }
            Predicate::OneOf { access, literals } => {
                let Some(value) = Self::read(access, facts)? else {
                    return Ok(false);
                };
                Ok(literals
                    .iter()
                    .any(|literal| Self::order(&value, literal) == Some(Ordering::Equal)))
            }
            Predicate::DecimalOrder {
                access,
                operand,
                operator,
            } => {
                let Some(AttributeValue::Decimal(value)) = Self::read(access, facts)? else {
                    return Ok(false);
                };
                // Decimal 按数值比较，100 与 100.00 相等
                Ok(operator.holds(value.cmp(operand)))
            }
            Predicate::DateCheck {
                access,
                predicate,
                date,
            } => {
                let Some(AttributeValue::Date(value)) = Self::read(access, facts)? else {
                    return Ok(false);
                };
                Ok(match predicate {
                    DatePredicate::Equal => value == *date,
                    DatePredicate::After => value > *date,
                    DatePredicate::Before => value < *date,
                })
            }
        }
    }

    /// 读取属性并转换为访问声明的类型
    fn read(access: &AttributeAccess, facts: &FactView<'_>) -> Result<Option<AttributeValue>> {
        match facts.attributes.get(&access.key) {
            None => Ok(None),
            Some(value) => Self::cast(&access.key, value, access.cast).map(Some),
        }
    }

    /// 宽松转换：兼容的表示之间可互转，不兼容时返回 TypeMismatch
    pub fn cast(key: &str, value: &AttributeValue, target: RuntimeType) -> Result<AttributeValue> {
        let mismatch = || RuleError::TypeMismatch {
            attribute: key.to_string(),
            expected: target.qualified_name().to_string(),
            actual: format!("{} ({})", value.type_name(), value),
        };

        let cast = match (value, target) {
            (AttributeValue::Text(s), RuntimeType::Text) => AttributeValue::Text(s.clone()),
            (other, RuntimeType::Text) => AttributeValue::Text(other.to_string()),

            (AttributeValue::Integer(i), RuntimeType::Integer) => AttributeValue::Integer(*i),
            (AttributeValue::Decimal(d), RuntimeType::Integer) if d.fract().is_zero() => {
                AttributeValue::Integer(d.to_i64().ok_or_else(mismatch)?)
            }
            (AttributeValue::Text(s), RuntimeType::Integer) => {
                AttributeValue::Integer(s.trim().parse().map_err(|_| mismatch())?)
            }

            (AttributeValue::Decimal(d), RuntimeType::Decimal) => AttributeValue::Decimal(*d),
            (AttributeValue::Integer(i), RuntimeType::Decimal) => {
                AttributeValue::Decimal(Decimal::from(*i))
            }
            (AttributeValue::Text(s), RuntimeType::Decimal) => {
                AttributeValue::Decimal(Decimal::from_str(s.trim()).map_err(|_| mismatch())?)
            }

            (AttributeValue::Boolean(b), RuntimeType::Boolean) => AttributeValue::Boolean(*b),
            (AttributeValue::Text(s), RuntimeType::Boolean) => {
                match s.trim().to_ascii_lowercase().as_str() {
                    "true" => AttributeValue::Boolean(true),
                    "false" => AttributeValue::Boolean(false),
                    _ => return Err(mismatch()),
                }
            }

            (AttributeValue::Date(d), RuntimeType::Date) => AttributeValue::Date(*d),
            (AttributeValue::Text(s), RuntimeType::Date) => AttributeValue::Date(
                NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).map_err(|_| mismatch())?,
            ),

            _ => return Err(mismatch()),
        };
        Ok(cast)
    }

    /// 同类型值的三路比较
    fn order(left: &AttributeValue, right: &AttributeValue) -> Option<Ordering> {
        match (left, right) {
            (AttributeValue::Text(a), AttributeValue::Text(b)) => Some(a.cmp(b)),
            (AttributeValue::Integer(a), AttributeValue::Integer(b)) => Some(a.cmp(b)),
            (AttributeValue::Decimal(a), AttributeValue::Decimal(b)) => Some(a.cmp(b)),
            (AttributeValue::Boolean(a), AttributeValue::Boolean(b)) => Some(a.cmp(b)),
            (AttributeValue::Date(a), AttributeValue::Date(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::Operator;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn access(key: &str, cast: RuntimeType) -> AttributeAccess {
        AttributeAccess {
            key: key.to_string(),
            cast,
        }
    }

    fn eval(predicate: &Predicate, attributes: &[(&str, AttributeValue)]) -> Result<bool> {
        let attributes: HashMap<String, AttributeValue> = attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let targets: BTreeSet<i64> = [1].into_iter().collect();
        ConditionEvaluator::evaluate(
            predicate,
            &FactView {
                attributes: &attributes,
                targets: Some(&targets),
            },
        )
    }

    #[test]
    fn test_decimal_equality_ignores_scale() {
        let predicate = Predicate::DecimalOrder {
            access: access("amount", RuntimeType::Decimal),
            operand: dec("100"),
            operator: Operator::Eq,
        };
        assert!(eval(&predicate, &[("amount", AttributeValue::Decimal(dec("100.00")))]).unwrap());
        assert!(eval(&predicate, &[("amount", AttributeValue::Integer(100))]).unwrap());
        assert!(eval(&predicate, &[("amount", AttributeValue::Text("100.0".to_string()))]).unwrap());
        assert!(!eval(&predicate, &[("amount", AttributeValue::Decimal(dec("100.01")))]).unwrap());
    }

    #[test]
    fn test_missing_attribute_is_false() {
        let predicate = Predicate::Compare {
            access: access("term", RuntimeType::Integer),
            operator: Operator::Ge,
            literal: AttributeValue::Integer(12),
        };
        assert!(!eval(&predicate, &[]).unwrap());
    }

    #[test]
    fn test_incompatible_value_is_type_mismatch() {
        let predicate = Predicate::Compare {
            access: access("vip", RuntimeType::Boolean),
            operator: Operator::Eq,
            literal: AttributeValue::Boolean(true),
        };
        let err = eval(&predicate, &[("vip", AttributeValue::Integer(1))]).unwrap_err();
        assert!(matches!(err, RuleError::TypeMismatch { ref attribute, .. } if attribute == "vip"));

        let predicate = Predicate::Compare {
            access: access("term", RuntimeType::Integer),
            operator: Operator::Eq,
            literal: AttributeValue::Integer(12),
        };
        assert!(eval(&predicate, &[("term", AttributeValue::Decimal(dec("12.5")))]).is_err());
        assert!(eval(&predicate, &[("term", AttributeValue::Decimal(dec("12.0")))]).unwrap());
    }

    #[test]
    fn test_date_predicates() {
        let cutoff = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        let not_before = Predicate::Not(Box::new(Predicate::DateCheck {
            access: access("start", RuntimeType::Date),
            predicate: DatePredicate::Before,
            date: cutoff,
        }));

        assert!(eval(&not_before, &[("start", AttributeValue::Text("2024-06-30".to_string()))]).unwrap());
        assert!(eval(&not_before, &[("start", AttributeValue::Date(cutoff.succ_opt().unwrap()))]).unwrap());
        assert!(!eval(&not_before, &[("start", AttributeValue::Text("2024-06-29".to_string()))]).unwrap());
    }

    #[test]
    fn test_membership_and_targets() {
        let predicate = Predicate::All(vec![
            Predicate::Targets(1),
            Predicate::OneOf {
                access: access("region", RuntimeType::Text),
                literals: vec![
                    AttributeValue::Text("a".to_string()),
                    AttributeValue::Text("b".to_string()),
                ],
            },
        ]);
        assert!(eval(&predicate, &[("region", AttributeValue::from("b"))]).unwrap());
        assert!(!eval(&predicate, &[("region", AttributeValue::from(" b"))]).unwrap());

        let other_component = Predicate::Targets(2);
        assert!(!eval(&other_component, &[]).unwrap());
    }

    #[test]
    fn test_conjunction_short_circuits_before_type_error() {
        let predicate = Predicate::All(vec![
            Predicate::Targets(2),
            Predicate::Compare {
                access: access("vip", RuntimeType::Boolean),
                operator: Operator::Eq,
                literal: AttributeValue::Boolean(true),
            },
        ]);
        assert!(!eval(&predicate, &[("vip", AttributeValue::Integer(1))]).unwrap());
    }
}

//! 定价规则领域模型
//!
//! 配置侧（组件、层级、条件、属性元数据）由外部仓储层提供，只读；
//! 事实侧（EvaluationInput / BundleInput）由调用方写入，引擎在评估时回写决策结果。

use crate::error::{Result, RuleError};
use crate::operators::Operator;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

/// 日期字面量格式
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ==================== 属性元数据 ====================

/// 属性声明的数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    String,
    Integer,
    Boolean,
    Decimal,
    Date,
}

impl DataType {
    /// 该数据类型默认对应的运行时类型全名
    pub fn default_runtime_type(&self) -> &'static str {
        match self {
            Self::String => "String",
            Self::Integer => "i64",
            Self::Boolean => "bool",
            Self::Decimal => "rust_decimal::Decimal",
            Self::Date => "chrono::NaiveDate",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "STRING",
            Self::Integer => "INTEGER",
            Self::Boolean => "BOOLEAN",
            Self::Decimal => "DECIMAL",
            Self::Date => "DATE",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STRING" => Ok(Self::String),
            "INTEGER" => Ok(Self::Integer),
            "BOOLEAN" => Ok(Self::Boolean),
            "DECIMAL" => Ok(Self::Decimal),
            "DATE" => Ok(Self::Date),
            other => Err(format!("未知的数据类型: {}", other)),
        }
    }
}

/// 属性元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMetadata {
    pub attribute_key: String,
    pub data_type: DataType,
    /// 运行时类型全名，如 `rust_decimal::Decimal`
    pub runtime_type: String,
    #[serde(default)]
    pub display_name: String,
}

impl AttributeMetadata {
    /// 使用数据类型的默认运行时类型创建元数据
    pub fn new(attribute_key: impl Into<String>, data_type: DataType) -> Self {
        let attribute_key = attribute_key.into();
        Self {
            display_name: attribute_key.clone(),
            attribute_key,
            data_type,
            runtime_type: data_type.default_runtime_type().to_string(),
        }
    }
}

// ==================== 定价配置 ====================

/// 层级条件
///
/// 捆绑调整规则复用同一结构，此时 `tier_id` 存放的是调整规则 ID。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCondition {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub tier_id: i64,
    pub attribute_name: String,
    pub operator: Operator,
    /// 字面量；IN 操作符时为逗号分隔列表；为空表示通配
    #[serde(default)]
    pub attribute_value: Option<String>,
}

impl TierCondition {
    pub fn new(
        attribute_name: impl Into<String>,
        operator: Operator,
        attribute_value: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            tier_id: 0,
            attribute_name: attribute_name.into(),
            operator,
            attribute_value: Some(attribute_value.into()),
        }
    }

    /// 通配条件（值为空）
    pub fn wildcard(attribute_name: impl Into<String>, operator: Operator) -> Self {
        Self {
            id: 0,
            tier_id: 0,
            attribute_name: attribute_name.into(),
            operator,
            attribute_value: None,
        }
    }

    /// 值是否为空白（空白条件恒为真）
    pub fn is_wildcard(&self) -> bool {
        self.attribute_value
            .as_deref()
            .is_none_or(|v| v.trim().is_empty())
    }
}

/// 定价层级：其全部条件的合取
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTier {
    pub id: i64,
    #[serde(default)]
    pub component_id: i64,
    pub name: String,
    #[serde(default)]
    pub min_threshold: Option<Decimal>,
    #[serde(default)]
    pub max_threshold: Option<Decimal>,
    /// 层级命中时写入事实的决策值（费率、费用等）
    pub decision_value: Decimal,
    #[serde(default)]
    pub conditions: Vec<TierCondition>,
}

/// 定价组件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComponentType {
    Fee,
    Rate,
    Discount,
    Charge,
}

impl FromStr for ComponentType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FEE" => Ok(Self::Fee),
            "RATE" => Ok(Self::Rate),
            "DISCOUNT" => Ok(Self::Discount),
            "CHARGE" => Ok(Self::Charge),
            other => Err(format!("未知的组件类型: {}", other)),
        }
    }
}

/// 定价组件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingComponent {
    pub id: i64,
    pub name: String,
    pub component_type: ComponentType,
    /// 所属银行，None 表示通用组件
    #[serde(default)]
    pub bank_id: Option<String>,
    /// 按声明顺序排列
    #[serde(default)]
    pub tiers: Vec<PricingTier>,
}

/// 捆绑调整方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AdjustmentKind {
    /// 固定金额
    Fixed,
    /// 按毛额百分比
    Percent,
}

impl fmt::Display for AdjustmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::Percent => write!(f, "percent"),
        }
    }
}

impl FromStr for AdjustmentKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FIXED" => Ok(Self::Fixed),
            "PERCENT" => Ok(Self::Percent),
            other => Err(format!("未知的调整方式: {}", other)),
        }
    }
}

/// 捆绑调整规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleAdjustmentRule {
    pub id: i64,
    /// 调整码，在同一快照内唯一
    pub code: String,
    #[serde(default)]
    pub name: String,
    pub kind: AdjustmentKind,
    /// 带符号金额（折扣为负）；PERCENT 时为百分比
    pub amount: Decimal,
    #[serde(default)]
    pub conditions: Vec<TierCondition>,
}

/// 一次编译所需的完整配置快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub components: Vec<PricingComponent>,
    #[serde(default)]
    pub bundle_rules: Vec<BundleAdjustmentRule>,
    #[serde(default)]
    pub attributes: Vec<AttributeMetadata>,
}

// ==================== 事实 ====================

/// 事实中的属性值
///
/// JSON 形式不带类型标记：Decimal 写成字符串以保留标度，Date 写成 `%Y-%m-%d`，
/// 读回时二者都是 Text。变体在评估时按属性元数据声明的运行时类型还原，
/// 所以序列化往返不保证得到同一变体。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum AttributeValue {
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    Date(NaiveDate),
}

impl AttributeValue {
    /// 类型名（用于错误信息）
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "string",
            Self::Integer(_) => "integer",
            Self::Decimal(_) => "decimal",
            Self::Boolean(_) => "boolean",
            Self::Date(_) => "date",
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{}", s),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Decimal(d) => write!(f, "{}", d),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
        }
    }
}

impl TryFrom<Value> for AttributeValue {
    type Error = String;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        match value {
            Value::String(s) => Ok(Self::Text(s)),
            Value::Bool(b) => Ok(Self::Boolean(b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Ok(Self::Integer(i));
                }
                let raw = n.to_string();
                Decimal::from_str(&raw)
                    .or_else(|_| Decimal::from_scientific(&raw))
                    .map(Self::Decimal)
                    .map_err(|e| format!("无法表示为十进制数: {} ({})", raw, e))
            }
            other => Err(format!("不支持的属性值: {}", other)),
        }
    }
}

impl From<AttributeValue> for Value {
    fn from(value: AttributeValue) -> Self {
        match value {
            AttributeValue::Text(s) => Value::String(s),
            AttributeValue::Integer(i) => Value::from(i),
            AttributeValue::Decimal(d) => Value::String(d.to_string()),
            AttributeValue::Boolean(b) => Value::Bool(b),
            AttributeValue::Date(d) => Value::String(d.format(DATE_FORMAT).to_string()),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        Self::Integer(value as i64)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<Decimal> for AttributeValue {
    fn from(value: Decimal) -> Self {
        Self::Decimal(value)
    }
}

impl From<NaiveDate> for AttributeValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

/// 单个组件的命中结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierDecision {
    pub component_id: i64,
    pub tier_id: i64,
    pub tier_name: String,
    pub decision_value: Decimal,
    /// 触发的规则名
    pub rule_name: String,
}

/// 组件定价评估事实
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationInput {
    pub tenant_id: String,
    pub target_component_ids: BTreeSet<i64>,
    #[serde(default)]
    pub attributes: HashMap<String, AttributeValue>,

    // 以下字段由引擎写入
    /// 第一个命中的层级
    #[serde(default)]
    pub matched_tier_id: Option<i64>,
    #[serde(default)]
    pub decision_value: Option<Decimal>,
    #[serde(default)]
    pub fired: bool,
    /// 每个命中组件的决策
    #[serde(default)]
    pub decisions: BTreeMap<i64, TierDecision>,
    /// 本次评估使用的产物版本
    #[serde(default)]
    pub artifact_version: Option<u64>,
}

impl EvaluationInput {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            ..Default::default()
        }
    }

    pub fn with_target(mut self, component_id: i64) -> Self {
        self.target_component_ids.insert(component_id);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// 获取某组件的决策，未命中时返回 NoMatch
    pub fn decision_for(&self, component_id: i64) -> Result<&TierDecision> {
        self.decisions
            .get(&component_id)
            .ok_or(RuleError::NoMatch { component_id })
    }

    /// 记录一个层级决策；同一组件已有决策时保持先到者
    pub(crate) fn record_decision(&mut self, decision: TierDecision) -> bool {
        if self.decisions.contains_key(&decision.component_id) {
            return false;
        }
        if !self.fired {
            self.matched_tier_id = Some(decision.tier_id);
            self.decision_value = Some(decision.decision_value);
        }
        self.fired = true;
        self.decisions.insert(decision.component_id, decision);
        true
    }
}

/// 捆绑调整评估事实
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleInput {
    pub tenant_id: String,
    pub bundle_id: i64,
    pub gross_total: Decimal,
    #[serde(default)]
    pub attributes: HashMap<String, AttributeValue>,

    // 以下字段由引擎写入
    /// 调整码 -> 带符号金额
    #[serde(default)]
    pub adjustments: BTreeMap<String, Decimal>,
    #[serde(default)]
    pub net_total: Decimal,
    #[serde(default)]
    pub fired: bool,
    #[serde(default)]
    pub artifact_version: Option<u64>,
}

impl BundleInput {
    pub fn new(tenant_id: impl Into<String>, bundle_id: i64, gross_total: Decimal) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            bundle_id,
            gross_total,
            net_total: gross_total,
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// 累加一笔调整
    pub(crate) fn add_adjustment(&mut self, code: &str, amount: Decimal) -> Result<()> {
        let entry = self.adjustments.entry(code.to_string()).or_default();
        *entry = entry
            .checked_add(amount)
            .ok_or_else(|| RuleError::ArithmeticOverflow {
                code: code.to_string(),
            })?;
        self.fired = true;
        Ok(())
    }

    /// 重新计算净额：毛额 + 全部调整
    pub(crate) fn recompute_net_total(&mut self) -> Result<()> {
        self.net_total = self
            .adjustments
            .values()
            .try_fold(self.gross_total, |total, amount| total.checked_add(*amount))
            .ok_or_else(|| RuleError::ArithmeticOverflow {
                code: "NET_TOTAL".to_string(),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::ConditionEvaluator;
    use crate::metadata::RuntimeType;
    use serde_json::json;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_attribute_value_from_json() {
        let v: AttributeValue = serde_json::from_value(json!(1500)).unwrap();
        assert_eq!(v, AttributeValue::Integer(1500));

        let v: AttributeValue = serde_json::from_value(json!(2.5)).unwrap();
        assert_eq!(v, AttributeValue::Decimal(dec("2.5")));

        let v: AttributeValue = serde_json::from_value(json!("EU")).unwrap();
        assert_eq!(v, AttributeValue::Text("EU".to_string()));

        let v: AttributeValue = serde_json::from_value(json!(true)).unwrap();
        assert_eq!(v, AttributeValue::Boolean(true));

        assert!(serde_json::from_value::<AttributeValue>(json!(null)).is_err());
        assert!(serde_json::from_value::<AttributeValue>(json!([1, 2])).is_err());
    }

    #[test]
    fn test_attribute_value_json_is_untyped() {
        let amount = AttributeValue::Decimal(dec("100.00"));
        let start = AttributeValue::Date(NaiveDate::from_ymd_opt(2024, 12, 25).unwrap());

        assert_eq!(serde_json::to_value(&amount).unwrap(), json!("100.00"));
        assert_eq!(serde_json::to_value(&start).unwrap(), json!("2024-12-25"));

        let amount_back: AttributeValue =
            serde_json::from_value(serde_json::to_value(&amount).unwrap()).unwrap();
        let start_back: AttributeValue =
            serde_json::from_value(serde_json::to_value(&start).unwrap()).unwrap();
        assert_eq!(amount_back, AttributeValue::Text("100.00".to_string()));
        assert_eq!(start_back, AttributeValue::Text("2024-12-25".to_string()));

        // 按声明类型转换后还原
        assert_eq!(
            ConditionEvaluator::cast("amount", &amount_back, RuntimeType::Decimal).unwrap(),
            amount
        );
        assert_eq!(
            ConditionEvaluator::cast("start", &start_back, RuntimeType::Date).unwrap(),
            start
        );
    }

    #[test]
    fn test_evaluation_input_deserialization() {
        let input: EvaluationInput = serde_json::from_value(json!({
            "tenant_id": "acme",
            "target_component_ids": [1, 2],
            "attributes": {"amount": 1500, "region": "EU"}
        }))
        .unwrap();

        assert_eq!(input.tenant_id, "acme");
        assert_eq!(input.target_component_ids.len(), 2);
        assert_eq!(input.attributes["amount"], AttributeValue::Integer(1500));
        assert!(!input.fired);
        assert!(input.decisions.is_empty());
    }

    #[test]
    fn test_record_decision_first_wins() {
        let mut input = EvaluationInput::new("acme").with_target(1);
        let first = TierDecision {
            component_id: 1,
            tier_id: 11,
            tier_name: "T1".to_string(),
            decision_value: dec("2.5"),
            rule_name: "r1".to_string(),
        };
        let second = TierDecision {
            tier_id: 12,
            tier_name: "T2".to_string(),
            decision_value: dec("3.0"),
            rule_name: "r2".to_string(),
            ..first.clone()
        };

        assert!(input.record_decision(first));
        assert!(!input.record_decision(second));
        assert_eq!(input.matched_tier_id, Some(11));
        assert_eq!(input.decision_value, Some(dec("2.5")));
        assert!(input.fired);
    }

    #[test]
    fn test_decision_for_no_match() {
        let input = EvaluationInput::new("acme").with_target(7);
        let err = input.decision_for(7).unwrap_err();
        assert!(matches!(err, RuleError::NoMatch { component_id: 7 }));
    }

    #[test]
    fn test_bundle_net_total() {
        let mut bundle = BundleInput::new("acme", 3, dec("200.00"));
        bundle.add_adjustment("LOYALTY", dec("-10.00")).unwrap();
        bundle.add_adjustment("SERVICE_FEE", dec("2.50")).unwrap();
        bundle.add_adjustment("LOYALTY", dec("-5.00")).unwrap();
        bundle.recompute_net_total().unwrap();

        assert_eq!(bundle.adjustments["LOYALTY"], dec("-15.00"));
        assert_eq!(bundle.net_total, dec("187.50"));
        assert!(bundle.fired);
    }

    #[test]
    fn test_bundle_net_total_overflow() {
        let mut bundle = BundleInput::new("acme", 3, Decimal::MAX);
        bundle.add_adjustment("SERVICE_FEE", dec("5.00")).unwrap();

        let err = bundle.recompute_net_total().unwrap_err();
        assert!(matches!(err, RuleError::ArithmeticOverflow { ref code } if code == "NET_TOTAL"));

        let err = bundle.add_adjustment("SERVICE_FEE", Decimal::MAX).unwrap_err();
        assert!(matches!(err, RuleError::ArithmeticOverflow { ref code } if code == "SERVICE_FEE"));
    }

    #[test]
    fn test_wildcard_condition() {
        assert!(TierCondition::wildcard("amount", Operator::Gt).is_wildcard());
        assert!(TierCondition::new("amount", Operator::Gt, "   ").is_wildcard());
        assert!(!TierCondition::new("amount", Operator::Gt, "10").is_wildcard());
    }

    #[test]
    fn test_config_snapshot_deserialization() {
        let snapshot: ConfigSnapshot = serde_json::from_value(json!({
            "tenant_id": "acme",
            "components": [{
                "id": 1,
                "name": "LoanRate",
                "component_type": "RATE",
                "tiers": [{
                    "id": 11,
                    "name": "T1",
                    "decision_value": "2.5",
                    "conditions": [
                        {"attribute_name": "amount", "operator": "GT", "attribute_value": "1000"}
                    ]
                }]
            }],
            "attributes": [
                {"attribute_key": "amount", "data_type": "DECIMAL", "runtime_type": "rust_decimal::Decimal"}
            ]
        }))
        .unwrap();

        assert_eq!(snapshot.components.len(), 1);
        let tier = &snapshot.components[0].tiers[0];
        assert_eq!(tier.decision_value, dec("2.5"));
        assert_eq!(tier.conditions[0].operator, Operator::Gt);
        assert!(snapshot.bundle_rules.is_empty());
    }
}

//! PostgreSQL 配置来源
//!
//! 在单个 REPEATABLE READ 只读事务内读取一个租户的全部定价配置，
//! 组装器看到的是同一时刻的一致快照。声明顺序为 `sequence` 列，其次为 `id`。

use super::PricingConfigSource;
use crate::error::{Result, RuleError};
use crate::models::{
    AttributeMetadata, BundleAdjustmentRule, ConfigSnapshot, PricingComponent, PricingTier, TierCondition,
};
use crate::operators::Operator;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, instrument};

#[derive(sqlx::FromRow)]
struct ComponentRow {
    id: i64,
    name: String,
    component_type: String,
    bank_id: Option<String>,
}

#[derive(sqlx::FromRow)]
struct TierRow {
    id: i64,
    component_id: i64,
    name: String,
    min_threshold: Option<Decimal>,
    max_threshold: Option<Decimal>,
    decision_value: Decimal,
}

#[derive(sqlx::FromRow)]
struct ConditionRow {
    id: i64,
    owner_id: i64,
    attribute_name: String,
    operator: String,
    attribute_value: Option<String>,
}

#[derive(sqlx::FromRow)]
struct BundleRuleRow {
    id: i64,
    code: String,
    name: String,
    kind: String,
    amount: Decimal,
}

#[derive(sqlx::FromRow)]
struct MetadataRow {
    attribute_key: String,
    data_type: String,
    runtime_type: String,
    display_name: Option<String>,
}

/// 从数据库读取定价配置
#[derive(Clone)]
pub struct PgConfigSource {
    pool: PgPool,
    tenant_id: String,
}

impl PgConfigSource {
    pub fn new(pool: PgPool, tenant_id: impl Into<String>) -> Self {
        Self {
            pool,
            tenant_id: tenant_id.into(),
        }
    }
}

#[async_trait]
impl PricingConfigSource for PgConfigSource {
    #[instrument(skip(self), fields(tenant_id = %self.tenant_id))]
    async fn load_snapshot(&self) -> Result<ConfigSnapshot> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let components = sqlx::query_as::<_, ComponentRow>(
            r#"
            SELECT id, name, component_type, bank_id
            FROM pricing_components
            WHERE tenant_id = $1 AND enabled = TRUE
            ORDER BY sequence, id
            "#,
        )
        .bind(&self.tenant_id)
        .fetch_all(&mut *tx)
        .await?;

        let tiers = sqlx::query_as::<_, TierRow>(
            r#"
            SELECT t.id, t.component_id, t.name, t.min_threshold, t.max_threshold, t.decision_value
            FROM pricing_tiers t
            JOIN pricing_components c ON c.id = t.component_id
            WHERE c.tenant_id = $1 AND c.enabled = TRUE
            ORDER BY t.sequence, t.id
            "#,
        )
        .bind(&self.tenant_id)
        .fetch_all(&mut *tx)
        .await?;

        let tier_conditions = sqlx::query_as::<_, ConditionRow>(
            r#"
            SELECT tc.id, tc.tier_id AS owner_id, tc.attribute_name, tc.operator, tc.attribute_value
            FROM tier_conditions tc
            JOIN pricing_tiers t ON t.id = tc.tier_id
            JOIN pricing_components c ON c.id = t.component_id
            WHERE c.tenant_id = $1 AND c.enabled = TRUE
            ORDER BY tc.sequence, tc.id
            "#,
        )
        .bind(&self.tenant_id)
        .fetch_all(&mut *tx)
        .await?;

        let bundle_rules = sqlx::query_as::<_, BundleRuleRow>(
            r#"
            SELECT id, code, name, kind, amount
            FROM bundle_adjustment_rules
            WHERE tenant_id = $1 AND enabled = TRUE
            ORDER BY sequence, id
            "#,
        )
        .bind(&self.tenant_id)
        .fetch_all(&mut *tx)
        .await?;

        let bundle_conditions = sqlx::query_as::<_, ConditionRow>(
            r#"
            SELECT bc.id, bc.rule_id AS owner_id, bc.attribute_name, bc.operator, bc.attribute_value
            FROM bundle_rule_conditions bc
            JOIN bundle_adjustment_rules r ON r.id = bc.rule_id
            WHERE r.tenant_id = $1 AND r.enabled = TRUE
            ORDER BY bc.sequence, bc.id
            "#,
        )
        .bind(&self.tenant_id)
        .fetch_all(&mut *tx)
        .await?;

        let metadata = sqlx::query_as::<_, MetadataRow>(
            r#"
            SELECT attribute_key, data_type, runtime_type, display_name
            FROM attribute_metadata
            WHERE tenant_id = $1
            ORDER BY attribute_key
            "#,
        )
        .bind(&self.tenant_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let snapshot = build_snapshot(
            &self.tenant_id,
            components,
            tiers,
            tier_conditions,
            bundle_rules,
            bundle_conditions,
            metadata,
        )?;

        debug!(
            components = snapshot.components.len(),
            bundle_rules = snapshot.bundle_rules.len(),
            attributes = snapshot.attributes.len(),
            "配置快照已加载"
        );
        Ok(snapshot)
    }
}

/// 把平铺的行组装成组件 → 层级 → 条件树，保持各级的查询顺序
fn build_snapshot(
    tenant_id: &str,
    components: Vec<ComponentRow>,
    tiers: Vec<TierRow>,
    tier_conditions: Vec<ConditionRow>,
    bundle_rules: Vec<BundleRuleRow>,
    bundle_conditions: Vec<ConditionRow>,
    metadata: Vec<MetadataRow>,
) -> Result<ConfigSnapshot> {
    let mut conditions_by_tier = group_conditions(tier_conditions)?;
    let mut conditions_by_rule = group_conditions(bundle_conditions)?;

    let mut tiers_by_component: HashMap<i64, Vec<PricingTier>> = HashMap::new();
    for row in tiers {
        tiers_by_component
            .entry(row.component_id)
            .or_default()
            .push(PricingTier {
                id: row.id,
                component_id: row.component_id,
                name: row.name,
                min_threshold: row.min_threshold,
                max_threshold: row.max_threshold,
                decision_value: row.decision_value,
                conditions: conditions_by_tier.remove(&row.id).unwrap_or_default(),
            });
    }

    let components = components
        .into_iter()
        .map(|row| {
            Ok(PricingComponent {
                id: row.id,
                component_type: row
                    .component_type
                    .parse()
                    .map_err(RuleError::ConfigSource)?,
                name: row.name,
                bank_id: row.bank_id,
                tiers: tiers_by_component.remove(&row.id).unwrap_or_default(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let bundle_rules = bundle_rules
        .into_iter()
        .map(|row| {
            Ok(BundleAdjustmentRule {
                id: row.id,
                kind: row
                    .kind
                    .parse()
                    .map_err(RuleError::ConfigSource)?,
                code: row.code,
                name: row.name,
                amount: row.amount,
                conditions: conditions_by_rule.remove(&row.id).unwrap_or_default(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let attributes = metadata
        .into_iter()
        .map(|row| {
            Ok(AttributeMetadata {
                data_type: row
                    .data_type
                    .parse()
                    .map_err(RuleError::ConfigSource)?,
                display_name: row.display_name.unwrap_or_else(|| row.attribute_key.clone()),
                attribute_key: row.attribute_key,
                runtime_type: row.runtime_type,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ConfigSnapshot {
        tenant_id: tenant_id.to_string(),
        components,
        bundle_rules,
        attributes,
    })
}

fn group_conditions(rows: Vec<ConditionRow>) -> Result<HashMap<i64, Vec<TierCondition>>> {
    let mut grouped: HashMap<i64, Vec<TierCondition>> = HashMap::new();
    for row in rows {
        let operator = Operator::from_str(&row.operator)
            .map_err(RuleError::ConfigSource)?;
        grouped.entry(row.owner_id).or_default().push(TierCondition {
            id: row.id,
            tier_id: row.owner_id,
            attribute_name: row.attribute_name,
            operator,
            attribute_value: row.attribute_value,
        });
    }
    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AdjustmentKind, ComponentType, DataType};

    fn condition(id: i64, owner_id: i64, operator: &str, value: &str) -> ConditionRow {
        ConditionRow {
            id,
            owner_id,
            attribute_name: "amount".to_string(),
            operator: operator.to_string(),
            attribute_value: Some(value.to_string()),
        }
    }

    #[test]
    fn test_build_snapshot_preserves_order() {
        let snapshot = build_snapshot(
            "acme",
            vec![
                ComponentRow {
                    id: 2,
                    name: "WireFee".to_string(),
                    component_type: "FEE".to_string(),
                    bank_id: Some("bank-a".to_string()),
                },
                ComponentRow {
                    id: 1,
                    name: "LoanRate".to_string(),
                    component_type: "RATE".to_string(),
                    bank_id: None,
                },
            ],
            vec![
                TierRow {
                    id: 12,
                    component_id: 1,
                    name: "T2".to_string(),
                    min_threshold: None,
                    max_threshold: None,
                    decision_value: Decimal::new(30, 1),
                },
                TierRow {
                    id: 11,
                    component_id: 1,
                    name: "T1".to_string(),
                    min_threshold: None,
                    max_threshold: None,
                    decision_value: Decimal::new(25, 1),
                },
            ],
            vec![condition(1, 11, "GT", "1000"), condition(2, 12, "le", "1000")],
            vec![BundleRuleRow {
                id: 5,
                code: "LOYALTY".to_string(),
                name: "Loyalty".to_string(),
                kind: "PERCENT".to_string(),
                amount: Decimal::new(-5, 0),
            }],
            vec![condition(3, 5, "EQ", "1")],
            vec![MetadataRow {
                attribute_key: "amount".to_string(),
                data_type: "DECIMAL".to_string(),
                runtime_type: "rust_decimal::Decimal".to_string(),
                display_name: None,
            }],
        )
        .unwrap();

        assert_eq!(snapshot.components[0].id, 2);
        assert_eq!(snapshot.components[0].component_type, ComponentType::Fee);
        assert!(snapshot.components[0].tiers.is_empty());

        let loan = &snapshot.components[1];
        let tier_ids: Vec<i64> = loan.tiers.iter().map(|t| t.id).collect();
        assert_eq!(tier_ids, vec![12, 11]);
        assert_eq!(loan.tiers[0].conditions[0].operator, Operator::Le);

        assert_eq!(snapshot.bundle_rules[0].kind, AdjustmentKind::Percent);
        assert_eq!(snapshot.bundle_rules[0].conditions.len(), 1);
        assert_eq!(snapshot.attributes[0].data_type, DataType::Decimal);
        assert_eq!(snapshot.attributes[0].display_name, "amount");
    }

    #[test]
    fn test_unknown_operator_is_rejected() {
        let err = group_conditions(vec![condition(1, 11, "BETWEEN", "1")]).unwrap_err();
        assert!(matches!(err, RuleError::ConfigSource(_)));
    }
}

//! 规则程序组装
//!
//! 按作用域汇总组件、层级和条件，为每个层级生成一条决策规则，
//! 为每条捆绑调整规则生成一条调整规则，输出一份自包含的规则源码。
//! 规则按声明顺序输出，多个层级同时满足时先声明者生效。

use crate::error::Result;
use crate::expression::{ALWAYS_TRUE, ExpressionBuilder, quote};
use crate::metadata::AttributeMetadataRegistry;
use crate::models::{BundleAdjustmentRule, ConfigSnapshot, PricingComponent, PricingTier, TierCondition};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Write;
use tracing::{debug, instrument};

/// 组装作用域
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AssemblyScope {
    /// 全部组件
    #[default]
    All,
    /// 指定银行的组件，以及不属于任何银行的通用组件
    Bank(String),
}

impl AssemblyScope {
    pub fn from_bank_id(bank_id: Option<String>) -> Self {
        match bank_id {
            Some(bank) if !bank.trim().is_empty() => Self::Bank(bank),
            _ => Self::All,
        }
    }

    fn includes(&self, component: &PricingComponent) -> bool {
        match (self, &component.bank_id) {
            (Self::All, _) => true,
            (Self::Bank(_), None) => true,
            (Self::Bank(bank), Some(owner)) => bank == owner,
        }
    }
}

/// 组装结果
#[derive(Debug, Clone, Serialize)]
pub struct RuleProgram {
    pub source: String,
    pub rule_count: usize,
    pub component_count: usize,
    pub referenced_attributes: BTreeSet<String>,
}

/// 规则程序组装器
#[derive(Debug, Clone, Default)]
pub struct RuleProgramAssembler {
    scope: AssemblyScope,
}

impl RuleProgramAssembler {
    pub fn new(scope: AssemblyScope) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> &AssemblyScope {
        &self.scope
    }

    /// 组装规则程序
    ///
    /// 纯函数：不产生副作用，同一快照总是得到同一份源码。
    #[instrument(skip(self, snapshot), fields(tenant_id = %snapshot.tenant_id))]
    pub fn assemble(&self, snapshot: &ConfigSnapshot) -> Result<RuleProgram> {
        let registry = AttributeMetadataRegistry::from_entries(snapshot.attributes.iter().cloned())?;

        let mut source = String::new();
        let mut referenced_attributes = BTreeSet::new();
        let mut rule_count = 0;
        let mut component_count = 0;

        let _ = writeln!(source, "// pricing rules, tenant {}", quote(&snapshot.tenant_id));

        for component in snapshot.components.iter().filter(|c| self.scope.includes(c)) {
            component_count += 1;
            for tier in &component.tiers {
                let guard = format!("targets({})", component.id);
                let conditions =
                    self.build_conjunction(&registry, &tier.conditions, &mut referenced_attributes)?;
                let when = match conditions {
                    Some(conditions) => format!("{} && {}", guard, conditions),
                    None => guard,
                };
                write_rule(
                    &mut source,
                    &tier_rule_name(component, tier),
                    "component",
                    &when,
                    &format!(
                        "match_tier({}, {}, {}, {})",
                        component.id,
                        tier.id,
                        quote(&tier.name),
                        tier.decision_value
                    ),
                );
                rule_count += 1;
            }
        }

        for rule in &snapshot.bundle_rules {
            let when = self
                .build_conjunction(&registry, &rule.conditions, &mut referenced_attributes)?
                .unwrap_or_else(|| ALWAYS_TRUE.to_string());
            write_rule(
                &mut source,
                &bundle_rule_name(rule),
                "bundle",
                &when,
                &format!("adjust({}, {}, {})", quote(&rule.code), rule.kind, rule.amount),
            );
            rule_count += 1;
        }

        debug!(rule_count, component_count, "规则程序组装完成");

        Ok(RuleProgram {
            source,
            rule_count,
            component_count,
            referenced_attributes,
        })
    }

    /// 条件合取；全部为通配时返回 None
    fn build_conjunction(
        &self,
        registry: &AttributeMetadataRegistry,
        conditions: &[TierCondition],
        referenced: &mut BTreeSet<String>,
    ) -> Result<Option<String>> {
        let mut fragments = Vec::with_capacity(conditions.len());
        for condition in conditions {
            let resolved = registry.resolve(&condition.attribute_name)?;
            referenced.insert(condition.attribute_name.clone());

            let fragment = ExpressionBuilder::build(condition, &resolved.metadata)?;
            if fragment != ALWAYS_TRUE {
                fragments.push(fragment);
            }
        }

        if fragments.is_empty() {
            Ok(None)
        } else {
            Ok(Some(fragments.join(" && ")))
        }
    }
}

/// 层级规则名：`组件名#组件ID/层级名#层级ID`
pub fn tier_rule_name(component: &PricingComponent, tier: &PricingTier) -> String {
    format!("{}#{}/{}#{}", component.name, component.id, tier.name, tier.id)
}

/// 捆绑规则名：`bundle/调整码#规则ID`
pub fn bundle_rule_name(rule: &BundleAdjustmentRule) -> String {
    format!("bundle/{}#{}", rule.code, rule.id)
}

fn write_rule(out: &mut String, name: &str, kind: &str, when: &str, action: &str) {
    let _ = writeln!(out);
    let _ = writeln!(out, "rule {} for {}", quote(name), kind);
    let _ = writeln!(out, "when");
    let _ = writeln!(out, "    {}", when);
    let _ = writeln!(out, "then");
    let _ = writeln!(out, "    {};", action);
    let _ = writeln!(out, "end");
}

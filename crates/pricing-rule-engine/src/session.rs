//! 评估会话
//!
//! 每次评估从当前发布的产物快照打开一个私有会话：写入调用方提供的事实，
//! 运行到不动点，从同一事实对象读回决策，然后释放会话。
//! 会话在整个执行期间只看它打开时拿到的那个产物，不会中途切换。

use crate::artifact::{Action, CompiledRule, CompiledRuleSet, RuleKind};
use crate::error::{Result, RuleError};
use crate::evaluator::{ConditionEvaluator, FactView};
use crate::models::{AdjustmentKind, BundleInput, EvaluationInput, TierDecision};
use pricing_shared::observability::metrics;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// 会话计数
#[derive(Debug, Default)]
pub struct SessionTracker {
    open: AtomicUsize,
    opened_total: AtomicU64,
    reclaimed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub open: usize,
    pub opened_total: u64,
    pub reclaimed: u64,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_sessions(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            open: self.open.load(Ordering::Acquire),
            opened_total: self.opened_total.load(Ordering::Acquire),
            reclaimed: self.reclaimed.load(Ordering::Acquire),
        }
    }

    fn on_open(&self) {
        self.opened_total.fetch_add(1, Ordering::AcqRel);
        let open = self.open.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::set_active_sessions(open);
    }

    fn on_close(&self, reclaimed: bool) {
        if reclaimed {
            self.reclaimed.fetch_add(1, Ordering::AcqRel);
            metrics::record_session_reclaim();
        }
        let open = self.open.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        metrics::set_active_sessions(open);
    }
}

/// 评估追踪
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationTrace {
    pub artifact_version: u64,
    /// 按触发顺序排列的规则名
    pub fired_rules: Vec<String>,
    pub passes: usize,
}

/// 单次评估的执行上下文
pub struct EvaluationSession {
    id: Uuid,
    artifact: Arc<CompiledRuleSet>,
    tracker: Arc<SessionTracker>,
    max_firings: usize,
    /// 按规则下标记录是否已触发，每条规则每个会话至多触发一次
    fired: Vec<bool>,
    firings: usize,
    trace: EvaluationTrace,
    released: bool,
}

impl EvaluationSession {
    pub fn open(artifact: Arc<CompiledRuleSet>, tracker: Arc<SessionTracker>, max_firings: usize) -> Self {
        tracker.on_open();
        let rule_count = artifact.rule_count();
        let artifact_version = artifact.version;
        Self {
            id: Uuid::new_v4(),
            artifact,
            tracker,
            max_firings,
            fired: vec![false; rule_count],
            firings: 0,
            trace: EvaluationTrace {
                artifact_version,
                ..Default::default()
            },
            released: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn artifact_version(&self) -> u64 {
        self.artifact.version
    }

    /// 组件定价：先声明的层级命中后，同一组件的后续层级不再触发
    pub fn run_component(&mut self, input: &mut EvaluationInput) -> Result<()> {
        input.matched_tier_id = None;
        input.decision_value = None;
        input.fired = false;
        input.decisions.clear();
        input.artifact_version = Some(self.artifact.version);

        self.run_to_fixpoint(RuleKind::Component, |rule| {
            let Action::MatchTier {
                component_id,
                tier_id,
                tier_name,
                decision_value,
            } = &rule.action
            else {
                return Ok(false);
            };
            if input.decisions.contains_key(component_id)
                || !input.target_component_ids.contains(component_id)
            {
                return Ok(false);
            }

            let facts = FactView {
                attributes: &input.attributes,
                targets: Some(&input.target_component_ids),
            };
            if !ConditionEvaluator::evaluate(&rule.predicate, &facts)? {
                return Ok(false);
            }

            Ok(input.record_decision(TierDecision {
                component_id: *component_id,
                tier_id: *tier_id,
                tier_name: tier_name.clone(),
                decision_value: *decision_value,
                rule_name: rule.name.clone(),
            }))
        })
    }

    /// 捆绑调整：累加调整金额并计算净额
    pub fn run_bundle(&mut self, input: &mut BundleInput) -> Result<()> {
        input.adjustments.clear();
        input.fired = false;
        input.artifact_version = Some(self.artifact.version);

        self.run_to_fixpoint(RuleKind::Bundle, |rule| {
            let Action::Adjust { code, kind, amount } = &rule.action else {
                return Ok(false);
            };

            let facts = FactView {
                attributes: &input.attributes,
                targets: None,
            };
            if !ConditionEvaluator::evaluate(&rule.predicate, &facts)? {
                return Ok(false);
            }

            let signed = adjustment_amount(input.gross_total, *kind, *amount).ok_or_else(|| {
                RuleError::ArithmeticOverflow { code: code.clone() }
            })?;
            input.add_adjustment(code, signed)?;
            Ok(true)
        })?;

        input.recompute_net_total()
    }

    /// 按声明顺序反复扫描，直到一轮中没有规则触发
    fn run_to_fixpoint<F>(&mut self, kind: RuleKind, mut try_fire: F) -> Result<()>
    where
        F: FnMut(&CompiledRule) -> Result<bool>,
    {
        let artifact = Arc::clone(&self.artifact);
        loop {
            self.trace.passes += 1;
            let mut progressed = false;

            for (index, rule) in artifact.rules_of(kind) {
                if self.fired[index] || !try_fire(rule)? {
                    continue;
                }

                self.fired[index] = true;
                self.firings += 1;
                self.trace.fired_rules.push(rule.name.clone());
                progressed = true;

                if self.firings > self.max_firings {
                    return Err(RuleError::FiringLimitExceeded {
                        limit: self.max_firings,
                    });
                }
            }

            if !progressed {
                return Ok(());
            }
        }
    }

    /// 正常释放会话，返回追踪
    pub fn release(mut self) -> EvaluationTrace {
        self.released = true;
        std::mem::take(&mut self.trace)
    }
}

impl Drop for EvaluationSession {
    fn drop(&mut self) {
        if !self.released {
            // 只有执行中途异常展开才会走到这里
            let err = RuleError::SessionResource {
                session_id: self.id.to_string(),
            };
            error!(
                error = %err,
                artifact_version = self.artifact.version,
                fired = self.firings,
                "评估会话未正常释放，已强制回收"
            );
        }
        self.tracker.on_close(!self.released);
    }
}

/// 计算调整金额：PERCENT 按毛额百分比，保留两位小数
///
/// 超出 Decimal 表示范围时返回 None。
pub fn adjustment_amount(
    gross_total: Decimal,
    kind: AdjustmentKind,
    amount: Decimal,
) -> Option<Decimal> {
    match kind {
        AdjustmentKind::Fixed => Some(amount),
        AdjustmentKind::Percent => gross_total
            .checked_mul(amount)?
            .checked_div(Decimal::ONE_HUNDRED)
            .map(|v| v.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)),
    }
}

/// 在给定产物快照上评估组件定价
pub fn evaluate_component(
    artifact: Arc<CompiledRuleSet>,
    tracker: &Arc<SessionTracker>,
    max_firings: usize,
    input: EvaluationInput,
) -> Result<(EvaluationInput, EvaluationTrace)> {
    let started = Instant::now();
    let mut input = input;
    let mut session = EvaluationSession::open(artifact, Arc::clone(tracker), max_firings);

    let result = session.run_component(&mut input);
    let trace = session.release();

    let outcome = match &result {
        Ok(()) if input.fired => "fired",
        Ok(()) => "no_match",
        Err(_) => "error",
    };
    metrics::record_evaluation("component", outcome, started.elapsed().as_secs_f64());

    match result {
        Ok(()) => {
            debug!(
                tenant_id = %input.tenant_id,
                artifact_version = trace.artifact_version,
                fired = ?trace.fired_rules,
                "组件定价评估完成"
            );
            Ok((input, trace))
        }
        Err(e) => {
            warn!(tenant_id = %input.tenant_id, error = %e, "组件定价评估失败");
            Err(e)
        }
    }
}

/// 在给定产物快照上评估捆绑调整
pub fn evaluate_bundle(
    artifact: Arc<CompiledRuleSet>,
    tracker: &Arc<SessionTracker>,
    max_firings: usize,
    input: BundleInput,
) -> Result<(BundleInput, EvaluationTrace)> {
    let started = Instant::now();
    let mut input = input;
    let mut session = EvaluationSession::open(artifact, Arc::clone(tracker), max_firings);

    let result = session.run_bundle(&mut input);
    let trace = session.release();

    let outcome = match &result {
        Ok(()) if input.fired => "fired",
        Ok(()) => "no_match",
        Err(_) => "error",
    };
    metrics::record_evaluation("bundle", outcome, started.elapsed().as_secs_f64());

    match result {
        Ok(()) => {
            debug!(
                tenant_id = %input.tenant_id,
                bundle_id = input.bundle_id,
                net_total = %input.net_total,
                "捆绑调整评估完成"
            );
            Ok((input, trace))
        }
        Err(e) => {
            warn!(tenant_id = %input.tenant_id, bundle_id = input.bundle_id, error = %e, "捆绑调整评估失败");
            Err(e)
        }
    }
}

//! 定价服务
//!
//! 评估入口的调用层：校验输入，调用协调器，并把引擎错误翻译为服务错误。
//! “未命中”在这里变为 NotFound，与引擎故障区分开。

use crate::coordinator::HotReloadCoordinator;
use crate::error::RuleError;
use crate::models::{BundleInput, EvaluationInput, TierDecision};
use pricing_shared::error::{Result, ServiceError};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::instrument;

impl From<RuleError> for ServiceError {
    fn from(err: RuleError) -> Self {
        match err {
            RuleError::NoMatch { component_id } => ServiceError::NotFound {
                entity: "pricing_tier".to_string(),
                id: component_id.to_string(),
            },
            RuleError::ReloadTimeout { seconds } => ServiceError::ReloadTimeout { seconds },
            RuleError::Database(e) => ServiceError::Database(e),
            e if e.is_compile_time() => ServiceError::RuleCompileFailed(e.to_string()),
            e @ (RuleError::TypeMismatch { .. }
            | RuleError::FiringLimitExceeded { .. }
            | RuleError::ArithmeticOverflow { .. }
            | RuleError::SessionResource { .. }) => ServiceError::RuleExecutionFailed(e.to_string()),
            e => ServiceError::Internal(e.to_string()),
        }
    }
}

/// 定价服务
#[derive(Clone)]
pub struct PricingService {
    coordinator: Arc<HotReloadCoordinator>,
}

impl PricingService {
    pub fn new(coordinator: Arc<HotReloadCoordinator>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<HotReloadCoordinator> {
        &self.coordinator
    }

    /// 组件定价评估，原样返回被引擎写入决策的事实
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id))]
    pub fn evaluate_component_pricing(&self, input: EvaluationInput) -> Result<EvaluationInput> {
        if input.tenant_id.trim().is_empty() {
            return Err(ServiceError::Validation("tenant_id 不能为空".to_string()));
        }
        if input.target_component_ids.is_empty() {
            return Err(ServiceError::Validation(
                "target_component_ids 不能为空".to_string(),
            ));
        }
        Ok(self.coordinator.evaluate_component_pricing(input)?)
    }

    /// 为单个组件报价，未命中任何层级时返回 NotFound
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id))]
    pub fn quote_component(&self, input: EvaluationInput, component_id: i64) -> Result<TierDecision> {
        let output = self.evaluate_component_pricing(input.with_target(component_id))?;
        let decision = output.decision_for(component_id)?;
        Ok(decision.clone())
    }

    /// 捆绑调整评估
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, bundle_id = input.bundle_id))]
    pub fn evaluate_bundle_adjustments(&self, input: BundleInput) -> Result<BundleInput> {
        if input.tenant_id.trim().is_empty() {
            return Err(ServiceError::Validation("tenant_id 不能为空".to_string()));
        }
        if input.gross_total < Decimal::ZERO {
            return Err(ServiceError::Validation("gross_total 不能为负数".to_string()));
        }
        Ok(self.coordinator.evaluate_bundle_adjustments(input)?)
    }
}

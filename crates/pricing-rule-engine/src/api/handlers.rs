//! HTTP 处理器
//!
//! 规则管理端点：重载、状态与源码。

use axum::{Json, extract::State, http::StatusCode};
use chrono::{DateTime, Utc};
use pricing_shared::error::Result;
use serde::Serialize;
use tracing::info;

use super::AppState;
use super::response::ApiResponse;
use crate::coordinator::{EngineStatus, ReloadOutcome};

// ============================================
// 响应 DTO
// ============================================

/// 当前产物的规则源码
#[derive(Debug, Serialize)]
pub struct RuleSourceView {
    pub version: u64,
    pub digest: String,
    pub compiled_at: DateTime<Utc>,
    pub warnings: Vec<String>,
    pub source: String,
}

// ============================================
// 管理端点
// ============================================

/// 触发一次重载
///
/// 编译失败返回 422 并附带诊断，超时返回 504；两种情况下当前产物都保持不变。
pub async fn reload_rules(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<ApiResponse<ReloadOutcome>>)> {
    let outcome = state.coordinator.reload_with_configured_timeout().await?;

    if outcome.success {
        info!(version = ?outcome.version, published = outcome.published, "管理端触发重载完成");
        Ok((StatusCode::OK, Json(ApiResponse::success(outcome))))
    } else {
        Ok((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiResponse::failure(
                "RULE_RELOAD_FAILED",
                "规则重载失败，保留当前产物",
                outcome,
            )),
        ))
    }
}

/// 引擎状态
pub async fn rule_status(State(state): State<AppState>) -> Json<ApiResponse<EngineStatus>> {
    Json(ApiResponse::success(state.coordinator.status()))
}

/// 当前产物的源码与警告，供排查规则使用
pub async fn rule_source(State(state): State<AppState>) -> Json<ApiResponse<RuleSourceView>> {
    let artifact = state.coordinator.snapshot();
    Json(ApiResponse::success(RuleSourceView {
        version: artifact.version,
        digest: artifact.digest.clone(),
        compiled_at: artifact.compiled_at,
        warnings: artifact.warnings.iter().map(ToString::to_string).collect(),
        source: artifact.source.clone(),
    }))
}

/// 存活探针
pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "pricing-rule-engine",
        "active_version": state.coordinator.active_version()
    }))
}

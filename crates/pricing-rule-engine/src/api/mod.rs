//! HTTP 接口
//!
//! 运维控制面：规则管理端点挂在 `/admin/pricing-rules` 下。

pub mod handlers;
pub mod response;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use pricing_shared::observability::middleware::http_tracing;
use std::sync::Arc;

use crate::coordinator::HotReloadCoordinator;

pub use response::ApiResponse;

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<HotReloadCoordinator>,
}

impl AppState {
    pub fn new(coordinator: Arc<HotReloadCoordinator>) -> Self {
        Self { coordinator }
    }
}

/// 规则管理路由
fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/pricing-rules/reload", post(handlers::reload_rules))
        .route("/admin/pricing-rules/status", get(handlers::rule_status))
        .route("/admin/pricing-rules/source", get(handlers::rule_source))
}

/// 组装完整路由
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(admin_routes())
        .route("/health", get(handlers::health_check))
        .layer(middleware::from_fn(http_tracing))
        .with_state(state)
}

//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册指标描述，出现在 /metrics 端点的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "pricing_rule_reloads_total",
        "Total number of pricing rule reloads by outcome"
    );
    metrics::describe_histogram!(
        "pricing_rule_compile_duration_seconds",
        "Pricing rule program compile duration in seconds"
    );
    metrics::describe_gauge!(
        "pricing_rule_active_version",
        "Version of the currently published rule artifact"
    );

    metrics::describe_counter!(
        "pricing_evaluations_total",
        "Total number of pricing evaluations by kind and outcome"
    );
    metrics::describe_histogram!(
        "pricing_evaluation_duration_seconds",
        "Pricing evaluation duration in seconds"
    );
    metrics::describe_gauge!("pricing_active_sessions", "Open evaluation sessions");
    metrics::describe_counter!(
        "pricing_session_reclaims_total",
        "Evaluation sessions forcibly reclaimed after an abnormal exit"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录一次规则重载
///
/// outcome 取值：published / superseded / failed / timeout
#[inline]
pub fn record_rule_reload(outcome: &str) {
    metrics::counter!("pricing_rule_reloads_total", "outcome" => outcome.to_string())
        .increment(1);
}

/// 记录规则程序编译耗时
#[inline]
pub fn record_rule_compile(duration_secs: f64) {
    metrics::histogram!("pricing_rule_compile_duration_seconds").record(duration_secs);
}

/// 更新当前发布的产物版本
#[inline]
pub fn set_active_rule_version(version: u64) {
    metrics::gauge!("pricing_rule_active_version").set(version as f64);
}

/// 记录定价评估
///
/// kind 取值：component / bundle；outcome 取值：fired / no_match / error
#[inline]
pub fn record_evaluation(kind: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "pricing_evaluations_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "pricing_evaluation_duration_seconds",
        "kind" => kind.to_string()
    )
    .record(duration_secs);
}

/// 更新打开中的会话数
#[inline]
pub fn set_active_sessions(count: usize) {
    metrics::gauge!("pricing_active_sessions").set(count as f64);
}

/// 记录一次强制回收的会话
#[inline]
pub fn record_session_reclaim() {
    metrics::counter!("pricing_session_reclaims_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 未安装 recorder 时这些调用应为空操作
        record_http_request("POST", "/admin/pricing-rules/reload", 200, 0.05);
        record_rule_reload("published");
        record_rule_reload("failed");
        record_rule_compile(0.002);
        set_active_rule_version(3);
        record_evaluation("component", "fired", 0.0001);
        record_evaluation("bundle", "no_match", 0.0001);
        set_active_sessions(0);
        record_session_reclaim();
    }

    #[test]
    fn test_handle_absent_before_init() {
        // 测试进程内未初始化导出器
        let _ = get_handle();
    }
}

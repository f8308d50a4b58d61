//! 可观测性模块集成测试
//!
//! 测试 metrics、middleware 和配置的核心功能。

// ============================================================================
// 指标记录测试
// ============================================================================

mod metrics_tests {
    use pricing_shared::observability::metrics::{
        record_evaluation, record_http_request, record_rule_compile, record_rule_reload,
        record_session_reclaim, set_active_rule_version, set_active_sessions,
    };

    #[test]
    fn test_record_http_request() {
        record_http_request("POST", "/admin/pricing-rules/reload", 200, 0.05);
        record_http_request("POST", "/admin/pricing-rules/reload", 422, 0.02);
        record_http_request("GET", "/admin/pricing-rules/status", 200, 0.001);
        record_http_request("POST", "/api/pricing/components/7/quote", 404, 0.003);
    }

    #[test]
    fn test_record_reload_lifecycle() {
        for outcome in ["published", "superseded", "failed", "timeout"] {
            record_rule_reload(outcome);
        }
        record_rule_compile(0.012);
        set_active_rule_version(42);
    }

    #[test]
    fn test_record_evaluations() {
        record_evaluation("component", "fired", 0.0002);
        record_evaluation("component", "no_match", 0.0001);
        record_evaluation("bundle", "error", 0.0003);
        set_active_sessions(3);
        set_active_sessions(0);
        record_session_reclaim();
    }

    #[test]
    fn test_metrics_with_edge_cases() {
        record_http_request("GET", "", 0, 0.0);
        record_rule_compile(f64::MAX);
        set_active_rule_version(u64::MAX);
        record_evaluation("", "", -1.0);
    }
}

// ============================================================================
// 中间件测试
// ============================================================================

mod middleware_tests {
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
        middleware,
        routing::get,
    };
    use pricing_shared::observability::middleware::http_tracing;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_http_tracing_passes_response_through() {
        let app = Router::new()
            .route("/health", get(|| async { "ok" }))
            .layer(middleware::from_fn(http_tracing));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

// ============================================================================
// 配置测试
// ============================================================================

mod config_tests {
    use pricing_shared::observability::ObservabilityConfig;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert!(config.service_name.is_empty());
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.log_level, "info");
        assert!(config.metrics_enabled);
    }

    #[test]
    fn test_custom_config() {
        let config = ObservabilityConfig {
            service_name: "pricing-rule-engine".to_string(),
            metrics_port: 9091,
            metrics_enabled: false,
            log_level: "debug".to_string(),
            json_logs: true,
        };

        assert_eq!(config.metrics_port, 9091);
        assert_eq!(config.log_level, "debug");
        assert!(config.json_logs);
        assert!(!config.metrics_enabled);
    }
}

// ============================================================================
// Guard 测试
// ============================================================================

mod guard_tests {
    use pricing_shared::observability::ObservabilityGuard;

    #[test]
    fn test_empty_guard() {
        let guard = ObservabilityGuard::empty();
        drop(guard);
    }
}

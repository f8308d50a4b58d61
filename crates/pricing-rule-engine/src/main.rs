//! 定价规则引擎服务
//!
//! 启动时完成一次编译，之后通过管理端点或规则文件监听热重载。

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use pricing_engine::{
    api::{self, AppState},
    AssemblyScope, EngineSettings, HotReloadCoordinator, JsonFileConfigSource, PgConfigSource,
    PricingConfigSource, RuleFileWatcher, RuleProgramAssembler,
};
use pricing_shared::{config::AppConfig, database::Database, observability};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load("pricing-rule-engine").unwrap_or_default();

    let obs_config = config.observability.clone().with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    let engine_config = &config.rule_engine;
    info!(
        source = %engine_config.source,
        tenant_id = %engine_config.tenant_id,
        bank_id = ?engine_config.bank_id,
        "Starting pricing-rule-engine on {}",
        config.server_addr()
    );

    let source: Arc<dyn PricingConfigSource> = match engine_config.source.as_str() {
        "file" => Arc::new(
            JsonFileConfigSource::new(&engine_config.rules_file)
                .with_default_tenant(&engine_config.tenant_id),
        ),
        "database" => {
            let db = Database::connect(&config.database).await?;
            Arc::new(PgConfigSource::new(db.pool().clone(), &engine_config.tenant_id))
        }
        other => bail!("未知的规则配置来源: {}", other),
    };

    let coordinator = Arc::new(HotReloadCoordinator::new(
        source,
        RuleProgramAssembler::new(AssemblyScope::from_bank_id(engine_config.bank_id.clone())),
        EngineSettings::from(engine_config),
    ));

    // 首次编译失败不阻止启动，空产物继续服务直到下一次成功重载
    match coordinator.reload_with_configured_timeout().await {
        Ok(outcome) if outcome.success => {
            info!(version = ?outcome.version, "Initial rule compilation complete");
        }
        Ok(outcome) => {
            for diagnostic in &outcome.diagnostics {
                warn!("{}", diagnostic);
            }
            error!("Initial rule compilation failed, serving empty rule set");
        }
        Err(e) => error!(error = %e, "Initial rule reload failed, serving empty rule set"),
    }

    let watcher = if engine_config.source == "file" && engine_config.watch_enabled {
        let watcher = RuleFileWatcher::new(
            &engine_config.rules_file,
            Duration::from_millis(engine_config.watch_debounce_ms),
            Arc::clone(&coordinator),
        );
        match watcher.start() {
            Ok(_) => Some(watcher),
            Err(e) => {
                warn!(error = %e, "Rule file watcher disabled");
                None
            }
        }
    } else {
        None
    };

    let app = api::router(AppState::new(coordinator));

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(watcher) = watcher {
        watcher.stop();
    }

    info!("Server shutdown complete");

    Ok(())
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

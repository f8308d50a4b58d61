//! 热重载协调器
//!
//! 持有唯一的“当前产物”引用。重载流程：加载配置快照 → 组装 → 在阻塞线程池编译 → 原子发布。
//! 发布是一次 `ArcSwap::rcu`，只有版本比当前更新的候选才会被安装；
//! 版本在编译完成时分配，因此“最后写入”由完成顺序决定。
//! 重载失败时上一个产物保持生效。

use crate::artifact::{ArtifactStore, CompiledRuleSet};
use crate::assembler::RuleProgramAssembler;
use crate::compiler::RuleCompiler;
use crate::error::{Diagnostic, Result, RuleError};
use crate::models::{BundleInput, EvaluationInput};
use crate::session::{self, EvaluationTrace, SessionStats, SessionTracker};
use crate::source::PricingConfigSource;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use pricing_shared::config::RuleEngineConfig;
use pricing_shared::observability::metrics;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// 引擎运行参数
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_rule_firings: usize,
    pub max_retained_versions: usize,
    pub reload_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&RuleEngineConfig::default())
    }
}

impl From<&RuleEngineConfig> for EngineSettings {
    fn from(config: &RuleEngineConfig) -> Self {
        Self {
            max_rule_firings: config.max_rule_firings,
            max_retained_versions: config.max_retained_versions,
            reload_timeout: Duration::from_secs(config.reload_timeout_seconds),
        }
    }
}

/// 协调器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EngineState {
    /// 只有已发布的产物在服务
    Stable,
    /// 正在编译候选产物，已发布的产物继续服务
    Reloading,
}

/// 一次重载的结果
#[derive(Debug, Clone, Serialize)]
pub struct ReloadOutcome {
    pub success: bool,
    /// 本次编译得到的版本
    pub version: Option<u64>,
    /// 候选是否被安装为当前产物
    pub published: bool,
    /// 错误与警告，成功时也可能非空
    pub diagnostics: Vec<String>,
}

impl ReloadOutcome {
    fn failed(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            success: false,
            version: None,
            published: false,
            diagnostics: diagnostics.iter().map(ToString::to_string).collect(),
        }
    }
}

/// 引擎状态快照
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub active_version: u64,
    pub digest: String,
    pub rule_count: usize,
    pub warning_count: usize,
    pub compiled_at: DateTime<Utc>,
    pub retained_versions: Vec<u64>,
    pub sessions: SessionStats,
}

/// 在途重载计数守卫，超时取消时同样会归还
struct ReloadGuard<'a>(&'a AtomicUsize);

impl<'a> ReloadGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for ReloadGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// 热重载协调器
pub struct HotReloadCoordinator {
    source: Arc<dyn PricingConfigSource>,
    assembler: RuleProgramAssembler,
    compiler: Arc<RuleCompiler>,
    active: ArcSwap<CompiledRuleSet>,
    reloads_in_flight: AtomicUsize,
    sessions: Arc<SessionTracker>,
    settings: EngineSettings,
}

impl HotReloadCoordinator {
    /// 以空产物（版本 0）启动，读者永远能拿到一个产物
    pub fn new(
        source: Arc<dyn PricingConfigSource>,
        assembler: RuleProgramAssembler,
        settings: EngineSettings,
    ) -> Self {
        let store = ArtifactStore::new(settings.max_retained_versions);
        Self {
            source,
            assembler,
            compiler: Arc::new(RuleCompiler::new(store)),
            active: ArcSwap::from_pointee(CompiledRuleSet::empty()),
            reloads_in_flight: AtomicUsize::new(0),
            sessions: Arc::new(SessionTracker::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// 当前发布的产物
    pub fn snapshot(&self) -> Arc<CompiledRuleSet> {
        self.active.load_full()
    }

    pub fn active_version(&self) -> u64 {
        self.active.load().version
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        self.compiler.store()
    }

    pub fn sessions(&self) -> &Arc<SessionTracker> {
        &self.sessions
    }

    pub fn state(&self) -> EngineState {
        if self.reloads_in_flight.load(Ordering::Acquire) > 0 {
            EngineState::Reloading
        } else {
            EngineState::Stable
        }
    }

    pub fn status(&self) -> EngineStatus {
        let active = self.active.load();
        EngineStatus {
            state: self.state(),
            active_version: active.version,
            digest: active.digest.clone(),
            rule_count: active.rule_count(),
            warning_count: active.warnings.len(),
            compiled_at: active.compiled_at,
            retained_versions: self.artifacts().versions(),
            sessions: self.sessions.stats(),
        }
    }

    // ==================== 重载 ====================

    /// 从当前配置重建并发布
    ///
    /// 失败时返回诊断，已发布的产物不受影响。
    #[instrument(skip(self))]
    pub async fn reload(&self) -> ReloadOutcome {
        let _guard = ReloadGuard::enter(&self.reloads_in_flight);

        let snapshot = match self.source.load_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => return self.fail("load", e.into_diagnostics()),
        };

        let program = match self.assembler.assemble(&snapshot) {
            Ok(program) => program,
            Err(e) => return self.fail("assemble", e.into_diagnostics()),
        };

        let compiler = Arc::clone(&self.compiler);
        let source = program.source;
        let compiled = tokio::task::spawn_blocking(move || compiler.compile(&source)).await;

        let candidate = match compiled {
            Ok(Ok(candidate)) => candidate,
            Ok(Err(diagnostics)) => return self.fail("compile", diagnostics),
            Err(join_error) => {
                return self.fail(
                    "compile",
                    vec![Diagnostic::error(format!("编译任务异常退出: {}", join_error))],
                );
            }
        };

        let mut diagnostics: Vec<String> = candidate.warnings.iter().map(ToString::to_string).collect();
        let version = candidate.version;

        match self.publish(Arc::clone(&candidate)) {
            None => {
                metrics::record_rule_reload("published");
                metrics::set_active_rule_version(version);
                info!(
                    version,
                    rule_count = candidate.rule_count(),
                    warnings = candidate.warnings.len(),
                    "规则产物已发布"
                );
                ReloadOutcome {
                    success: true,
                    version: Some(version),
                    published: true,
                    diagnostics,
                }
            }
            Some(winner) => {
                metrics::record_rule_reload("superseded");
                warn!(version, winner, "候选产物已被更新的版本取代，未安装");
                diagnostics.push(format!(
                    "WARNING: 版本 {} 已被更新的版本 {} 取代，未安装",
                    version, winner
                ));
                ReloadOutcome {
                    success: true,
                    version: Some(version),
                    published: false,
                    diagnostics,
                }
            }
        }
    }

    /// 带超时的重载；超时后候选即使稍后编译完成也不会被发布
    pub async fn reload_with_timeout(&self, timeout: Duration) -> Result<ReloadOutcome> {
        match tokio::time::timeout(timeout, self.reload()).await {
            Ok(outcome) => Ok(outcome),
            Err(_) => {
                metrics::record_rule_reload("timeout");
                warn!(timeout_ms = timeout.as_millis() as u64, "规则重载超时，候选产物已丢弃");
                Err(RuleError::ReloadTimeout {
                    seconds: timeout.as_secs(),
                })
            }
        }
    }

    /// 使用配置的超时重载
    pub async fn reload_with_configured_timeout(&self) -> Result<ReloadOutcome> {
        self.reload_with_timeout(self.settings.reload_timeout).await
    }

    /// 原子发布；候选不比当前更新时返回当前版本
    fn publish(&self, candidate: Arc<CompiledRuleSet>) -> Option<u64> {
        let mut superseded_by = None;
        self.active.rcu(|current| {
            if candidate.version > current.version {
                superseded_by = None;
                Arc::clone(&candidate)
            } else {
                superseded_by = Some(current.version);
                Arc::clone(current)
            }
        });
        superseded_by
    }

    fn fail(&self, stage: &str, diagnostics: Vec<Diagnostic>) -> ReloadOutcome {
        metrics::record_rule_reload("failed");
        let errors = diagnostics.iter().filter(|d| d.is_error()).count();
        warn!(
            stage,
            errors,
            active_version = self.active_version(),
            "规则重载失败，保留当前产物"
        );
        ReloadOutcome::failed(diagnostics)
    }

    // ==================== 评估 ====================

    /// 组件定价评估，使用调用时刻发布的产物
    pub fn evaluate_component_pricing(&self, input: EvaluationInput) -> Result<EvaluationInput> {
        self.evaluate_component_traced(input).map(|(output, _)| output)
    }

    pub fn evaluate_component_traced(
        &self,
        input: EvaluationInput,
    ) -> Result<(EvaluationInput, EvaluationTrace)> {
        session::evaluate_component(
            self.snapshot(),
            &self.sessions,
            self.settings.max_rule_firings,
            input,
        )
    }

    /// 捆绑调整评估
    pub fn evaluate_bundle_adjustments(&self, input: BundleInput) -> Result<BundleInput> {
        self.evaluate_bundle_traced(input).map(|(output, _)| output)
    }

    pub fn evaluate_bundle_traced(&self, input: BundleInput) -> Result<(BundleInput, EvaluationTrace)> {
        session::evaluate_bundle(
            self.snapshot(),
            &self.sessions,
            self.settings.max_rule_firings,
            input,
        )
    }
}

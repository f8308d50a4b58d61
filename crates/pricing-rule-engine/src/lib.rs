//! 定价规则引擎
//!
//! 把关系型定价配置编译为可热替换的规则产物，并在其上评估定价事实：
//! - 属性元数据解析与条件表达式生成
//! - 规则程序组装、编译与版本化存储
//! - 原子发布的热重载，失败时保留当前产物
//! - 组件层级匹配与捆绑调整评估

pub mod api;
pub mod artifact;
pub mod assembler;
pub mod compiler;
pub mod coordinator;
pub mod error;
pub mod evaluator;
pub mod expression;
pub mod metadata;
pub mod models;
pub mod operators;
pub mod service;
pub mod session;
pub mod source;
pub mod watcher;

pub use artifact::{ArtifactStore, CompiledRuleSet};
pub use assembler::{AssemblyScope, RuleProgram, RuleProgramAssembler};
pub use compiler::RuleCompiler;
pub use coordinator::{EngineSettings, EngineState, EngineStatus, HotReloadCoordinator, ReloadOutcome};
pub use error::{Diagnostic, Result, RuleError, Severity};
pub use models::{
    AttributeMetadata, AttributeValue, BundleInput, ConfigSnapshot, DataType, EvaluationInput,
    TierDecision,
};
pub use operators::Operator;
pub use service::PricingService;
pub use source::{InMemoryConfigSource, JsonFileConfigSource, PgConfigSource, PricingConfigSource};
pub use watcher::RuleFileWatcher;

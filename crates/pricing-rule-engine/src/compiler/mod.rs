//! 规则编译器
//!
//! 把组装好的规则源码编译为不可变的 `CompiledRuleSet`：
//! 词法分析 → 语法分析与类型检查 → 跨规则检查 → 分配版本并登记到产物存储。
//! 任何错误级诊断都会使本次编译失败，不产出任何产物。

pub mod lexer;
pub mod parser;

use crate::artifact::{Action, ArtifactStore, CompiledRule, CompiledRuleSet, Predicate, RuleKind, source_digest};
use crate::error::{Diagnostic, Severity};
use chrono::Utc;
use parser::ParsedRule;
use pricing_shared::observability::metrics;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{info, instrument, warn};

/// 规则编译器
///
/// 版本号在编译完成时分配，因此版本顺序即完成顺序。
pub struct RuleCompiler {
    next_version: AtomicU64,
    store: ArtifactStore,
}

impl RuleCompiler {
    pub fn new(store: ArtifactStore) -> Self {
        Self {
            next_version: AtomicU64::new(1),
            store,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// 编译规则源码
    ///
    /// 成功时返回已登记的产物（警告附在产物上）；失败时返回全部诊断。
    #[instrument(skip(self, source), fields(source_len = source.len()))]
    pub fn compile(&self, source: &str) -> Result<Arc<CompiledRuleSet>, Vec<Diagnostic>> {
        let started = Instant::now();

        let tokens = lexer::tokenize(source);
        let (parsed, mut diagnostics) = parser::parse_program(&tokens);
        diagnostics.extend(check_rules(&parsed));

        metrics::record_rule_compile(started.elapsed().as_secs_f64());

        if diagnostics.iter().any(Diagnostic::is_error) {
            let errors = diagnostics.iter().filter(|d| d.is_error()).count();
            warn!(errors, "规则编译失败");
            return Err(diagnostics);
        }

        let rules: Vec<CompiledRule> = parsed
            .into_iter()
            .map(|rule| CompiledRule {
                name: rule.name,
                kind: rule.kind,
                predicate: rule.predicate,
                action: rule.action,
                line: rule.line,
            })
            .collect();

        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let artifact = Arc::new(CompiledRuleSet {
            version,
            digest: source_digest(source),
            compiled_at: Utc::now(),
            source: source.to_string(),
            rules,
            warnings: diagnostics,
        });
        self.store.register(Arc::clone(&artifact));

        info!(
            version,
            rule_count = artifact.rule_count(),
            warnings = artifact.warnings.len(),
            digest = %artifact.digest,
            "规则编译完成"
        );
        Ok(artifact)
    }
}

/// 跨规则检查：重名、动作与种类不符、目标守卫，以及可达性警告
fn check_rules(rules: &[ParsedRule]) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let mut seen: HashMap<&str, usize> = HashMap::new();
    // 组件 ID -> 对该组件恒成立的第一条规则
    let mut shadowing: HashMap<i64, &str> = HashMap::new();

    for rule in rules {
        let report = |severity: Severity, message: String| Diagnostic {
            severity,
            rule: Some(rule.name.clone()),
            line: rule.line,
            column: rule.column,
            message,
        };

        if let Some(first_line) = seen.insert(rule.name.as_str(), rule.line) {
            diagnostics.push(report(
                Severity::Error,
                format!("规则名重复，首次出现于第 {} 行", first_line),
            ));
        }

        if rule.predicate == Predicate::Always {
            diagnostics.push(report(Severity::Warning, "规则无条件触发".to_string()));
        }

        match (rule.kind, &rule.action) {
            (RuleKind::Component, Action::MatchTier { component_id, .. }) => {
                let component_id = *component_id;

                if !rule.predicate.has_target_guard() {
                    diagnostics.push(report(
                        Severity::Warning,
                        "组件规则缺少 targets(...) 守卫".to_string(),
                    ));
                }
                if let Some(guarded) = top_level_targets(&rule.predicate)
                    .find(|id| *id != component_id)
                {
                    diagnostics.push(report(
                        Severity::Error,
                        format!("targets({}) 与 match_tier 的组件 {} 不一致", guarded, component_id),
                    ));
                }

                if let Some(earlier) = shadowing.get(&component_id) {
                    diagnostics.push(report(
                        Severity::Warning,
                        format!("层级不可达：之前的规则 \"{}\" 对该组件恒成立", earlier),
                    ));
                } else if rule.predicate.is_unconditional() {
                    shadowing.insert(component_id, rule.name.as_str());
                }
            }
            (RuleKind::Bundle, Action::Adjust { .. }) => {
                if contains_targets(&rule.predicate) {
                    diagnostics.push(report(
                        Severity::Error,
                        "捆绑规则不能使用 targets(...)".to_string(),
                    ));
                }
            }
            (RuleKind::Component, _) => diagnostics.push(report(
                Severity::Error,
                "组件规则的动作必须是 match_tier".to_string(),
            )),
            (RuleKind::Bundle, _) => diagnostics.push(report(
                Severity::Error,
                "捆绑规则的动作必须是 adjust".to_string(),
            )),
        }
    }

    diagnostics
}

fn top_level_targets(predicate: &Predicate) -> Box<dyn Iterator<Item = i64> + '_> {
    match predicate {
        Predicate::Targets(id) => Box::new(std::iter::once(*id)),
        Predicate::All(parts) => Box::new(parts.iter().filter_map(|p| match p {
            Predicate::Targets(id) => Some(*id),
            _ => None,
        })),
        _ => Box::new(std::iter::empty()),
    }
}

fn contains_targets(predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Targets(_) => true,
        Predicate::Not(inner) => contains_targets(inner),
        Predicate::All(parts) => parts.iter().any(contains_targets),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler() -> RuleCompiler {
        RuleCompiler::new(ArtifactStore::new(8))
    }

    const LOAN_RATE: &str = r#"
rule "LoanRate#1/T1#11" for component
when
    targets(1) && (attr("amount") as rust_decimal::Decimal).compare_to(1000) > 0
then
    match_tier(1, 11, "T1", 2.5);
end

rule "LoanRate#1/T2#12" for component
when
    targets(1) && (attr("amount") as rust_decimal::Decimal).compare_to(1000) <= 0
then
    match_tier(1, 12, "T2", 3.0);
end
"#;

    #[test]
    fn test_compile_registers_versions() {
        let compiler = compiler();
        let first = compiler.compile(LOAN_RATE).unwrap();
        let second = compiler.compile(LOAN_RATE).unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(first.rule_count(), 2);
        assert!(first.is_equivalent(&second));
        assert!(first.warnings.is_empty());
        assert_eq!(compiler.store().versions(), vec![1, 2]);
    }

    #[test]
    fn test_failed_compile_registers_nothing() {
        let compiler = compiler();
        let broken = LOAN_RATE.replace(".compare_to(1000) > 0", " > 1000");
        let diagnostics = compiler.compile(&broken).unwrap_err();

        assert!(diagnostics.iter().any(|d| d.is_error()));
        assert!(compiler.store().is_empty());

        // 失败不消耗版本号
        assert_eq!(compiler.compile(LOAN_RATE).unwrap().version, 1);
    }

    #[test]
    fn test_duplicate_rule_names() {
        let source = format!("{}{}", LOAN_RATE, LOAN_RATE);
        let diagnostics = compiler().compile(&source).unwrap_err();
        let duplicates = diagnostics
            .iter()
            .filter(|d| d.message.contains("重复"))
            .count();
        assert_eq!(duplicates, 2);
    }

    #[test]
    fn test_action_kind_mismatch() {
        let source = r#"
rule "x" for bundle when true then match_tier(1, 1, "T", 1); end
rule "y" for component when targets(1) then adjust("A", fixed, 1); end
rule "z" for bundle when targets(3) then adjust("B", fixed, 1); end
rule "w" for component when targets(2) then match_tier(4, 1, "T", 1); end
"#;
        let diagnostics = compiler().compile(source).unwrap_err();
        let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();
        assert_eq!(errors.len(), 4);
        assert_eq!(errors[0].rule.as_deref(), Some("x"));
        assert_eq!(errors[3].rule.as_deref(), Some("w"));
    }

    #[test]
    fn test_warnings_do_not_fail_compilation() {
        let source = r#"
rule "Fee#2/Flat#21" for component when targets(2) then match_tier(2, 21, "Flat", 15); end
rule "Fee#2/Never#22" for component when targets(2) && (attr("n") as i64) > 1 then match_tier(2, 22, "Never", 9); end
rule "loose" for component when true then match_tier(3, 31, "Any", 1); end
"#;
        let artifact = compiler().compile(source).unwrap();
        let messages: Vec<&str> = artifact.warnings.iter().map(|d| d.message.as_str()).collect();

        assert_eq!(artifact.warnings.len(), 3);
        assert!(messages[0].contains("不可达"));
        assert!(messages.iter().any(|m| m.contains("无条件")));
        assert!(messages.iter().any(|m| m.contains("targets")));
    }

    #[test]
    fn test_empty_program_compiles() {
        let artifact = compiler().compile("// nothing to price\n").unwrap();
        assert_eq!(artifact.rule_count(), 0);
    }
}

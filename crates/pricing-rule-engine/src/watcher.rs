//! 规则文件监听
//!
//! 使用 `notify` 监听规则快照文件所在目录，文件变更经 debounce 窗口去抖后触发一次重载。
//! 监听目录而不是文件本身，编辑器的“写临时文件再重命名”同样能被捕获。

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::coordinator::HotReloadCoordinator;

/// 规则文件监听器
pub struct RuleFileWatcher {
    path: PathBuf,
    debounce: Duration,
    coordinator: Arc<HotReloadCoordinator>,
    shutdown_tx: watch::Sender<bool>,
}

impl RuleFileWatcher {
    pub fn new(
        path: impl AsRef<Path>,
        debounce: Duration,
        coordinator: Arc<HotReloadCoordinator>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            path: path.as_ref().to_path_buf(),
            debounce,
            coordinator,
            shutdown_tx,
        }
    }

    /// 启动监听，返回 debounce 循环的任务句柄
    ///
    /// notify 监听器由该任务持有，任务结束时一并释放。
    pub fn start(&self) -> Result<JoinHandle<()>> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .with_context(|| format!("规则文件路径无效: {}", self.path.display()))?;
        let watch_dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (event_tx, mut event_rx) = mpsc::channel::<()>(16);

        let mut watcher = notify::recommended_watcher({
            let file_name = file_name.clone();
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if is_relevant(&event, &file_name) {
                        let _ = event_tx.try_send(());
                    }
                }
                Err(e) => warn!(error = %e, "规则文件监听事件错误"),
            }
        })
        .context("创建规则文件监听器失败")?;

        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("监听目录失败: {}", watch_dir.display()))?;

        info!(path = %self.path.display(), debounce_ms = self.debounce.as_millis() as u64, "规则文件监听已启动");

        let debounce = self.debounce;
        let coordinator = Arc::clone(&self.coordinator);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        Ok(tokio::spawn(async move {
            let _watcher: RecommendedWatcher = watcher;
            loop {
                tokio::select! {
                    Some(()) = event_rx.recv() => {
                        tokio::time::sleep(debounce).await;
                        while event_rx.try_recv().is_ok() {}

                        match coordinator.reload_with_configured_timeout().await {
                            Ok(outcome) if outcome.success => {
                                info!(version = ?outcome.version, published = outcome.published, "规则文件变更，已重新编译");
                            }
                            Ok(outcome) => {
                                error!(
                                    diagnostics = ?outcome.diagnostics,
                                    "规则文件变更后编译失败，保留当前产物"
                                );
                            }
                            Err(e) => error!(error = %e, "规则文件变更后重载失败"),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("规则文件监听已停止");
                            break;
                        }
                    }
                }
            }
        }))
    }

    /// 通知监听循环退出
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// 只关心目标文件的写入、创建、删除事件
fn is_relevant(event: &notify::Event, file_name: &OsString) -> bool {
    matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    ) && event
        .paths
        .iter()
        .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::RuleProgramAssembler;
    use crate::coordinator::EngineSettings;
    use crate::source::JsonFileConfigSource;
    use notify::event::{CreateKind, ModifyKind};

    const SNAPSHOT: &str = r#"{
        "tenant_id": "acme",
        "components": [{
            "id": 1, "name": "LoanRate", "component_type": "RATE",
            "tiers": [{"id": 11, "name": "T1", "decision_value": "2.5",
                       "conditions": [{"attribute_name": "amount", "operator": "GT", "attribute_value": "1000"}]}]
        }],
        "attributes": [{"attribute_key": "amount", "data_type": "DECIMAL", "runtime_type": "rust_decimal::Decimal"}]
    }"#;

    #[test]
    fn test_event_filter() {
        let name = OsString::from("pricing-rules.json");
        let event = notify::Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/etc/pricing/pricing-rules.json"));
        assert!(is_relevant(&event, &name));

        let other = notify::Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/etc/pricing/.pricing-rules.json.swp"));
        assert!(!is_relevant(&other, &name));

        let access = notify::Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/etc/pricing/pricing-rules.json"));
        assert!(!is_relevant(&access, &name));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_file_change_triggers_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pricing-rules.json");
        std::fs::write(&path, SNAPSHOT).unwrap();

        let coordinator = Arc::new(HotReloadCoordinator::new(
            Arc::new(JsonFileConfigSource::new(&path)),
            RuleProgramAssembler::default(),
            EngineSettings::default(),
        ));
        assert!(coordinator.reload().await.success);
        assert_eq!(coordinator.active_version(), 1);

        let watcher = RuleFileWatcher::new(&path, Duration::from_millis(50), Arc::clone(&coordinator));
        let handle = watcher.start().unwrap();

        std::fs::write(&path, SNAPSHOT.replace("\"1000\"", "\"2000\"")).unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while coordinator.active_version() < 2 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(coordinator.active_version() >= 2);
        assert!(coordinator.snapshot().source.contains("compare_to(2000)"));

        watcher.stop();
        handle.await.unwrap();
    }
}

//! PoolBuilder - プールの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 省略されたポートには既定の実装を当てる

use std::sync::Arc;

use crate::app::Pool;
use crate::app::scheduler::Scheduler;
use crate::claims::ClaimStore;
use crate::config::{ConfigError, PoolConfig};
use crate::impls::{InMemoryClaimSnapshot, InMemoryEventLog, JsonClaimFile, JsonlEventLog};
use crate::ports::{ClaimSnapshot, Clock, EventLog, IdGenerator, Launcher, SystemClock, UlidGenerator};

/// PoolBuilder はプールを構築
///
/// # 使用例
/// ```ignore
/// let pool = PoolBuilder::new()
///     .config(PoolConfig::from_json_file("heddle.json")?)
///     .launcher(ProcessLauncher::new("./worker.sh"))
///     .build()?;
/// ```
///
/// # 既定の実装
/// - claim snapshot / event log: `stateDir` があればファイル、なければメモリ
/// - clock: `SystemClock`
/// - id generator: clock を使う `UlidGenerator`
pub struct PoolBuilder {
    config: PoolConfig,
    launcher: Option<Arc<dyn Launcher>>,
    claim_snapshot: Option<Box<dyn ClaimSnapshot>>,
    event_log: Option<Box<dyn EventLog>>,
    clock: Option<Arc<dyn Clock>>,
    id_generator: Option<Arc<dyn IdGenerator>>,
}

/// BuildError はプール構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no launcher configured. Call `.launcher(...)` before `build()`.")]
    MissingLauncher,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PoolBuilder {
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
            launcher: None,
            claim_snapshot: None,
            event_log: None,
            clock: None,
            id_generator: None,
        }
    }

    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn launcher<L: Launcher + 'static>(mut self, launcher: L) -> Self {
        self.launcher = Some(Arc::new(launcher));
        self
    }

    /// Overrides the snapshot chosen from `stateDir`.
    pub fn claim_snapshot<S: ClaimSnapshot + 'static>(mut self, snapshot: S) -> Self {
        self.claim_snapshot = Some(Box::new(snapshot));
        self
    }

    /// Overrides the event log chosen from `stateDir`.
    pub fn event_log<E: EventLog + 'static>(mut self, log: E) -> Self {
        self.event_log = Some(Box::new(log));
        self
    }

    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn id_generator<G: IdGenerator + 'static>(mut self, ids: G) -> Self {
        self.id_generator = Some(Arc::new(ids));
        self
    }

    /// # 検証
    /// - launcher が設定されているか
    /// - `PoolConfig::validate()`
    pub fn build(self) -> Result<Pool, BuildError> {
        self.config.validate()?;
        let launcher = self.launcher.ok_or(BuildError::MissingLauncher)?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .id_generator
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        let snapshot = match (self.claim_snapshot, self.config.claims_path()) {
            (Some(snapshot), _) => snapshot,
            (None, Some(path)) => Box::new(JsonClaimFile::new(path)) as Box<dyn ClaimSnapshot>,
            (None, None) => Box::new(InMemoryClaimSnapshot::new()),
        };
        let events = match (self.event_log, self.config.events_path()) {
            (Some(log), _) => log,
            (None, Some(path)) => Box::new(JsonlEventLog::new(path)) as Box<dyn EventLog>,
            (None, None) => Box::new(InMemoryEventLog::new()),
        };

        let scheduler = Scheduler::new(&self.config, ClaimStore::new(snapshot), events, clock, ids);
        Ok(Pool::new(self.config, scheduler, launcher))
    }
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

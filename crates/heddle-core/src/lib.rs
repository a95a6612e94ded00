//! heddle-core
//!
//! A bounded pool of worker slots with file-claim arbitration: no two running
//! tasks ever touch the same file.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task spec, outcome, events, errors）
//! - **queue**: タスクの状態機械・優先度キュー・リトライ方針
//! - **claims**: claim 表とワーカー slot
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, Launcher, ClaimSnapshot, EventLog）
//! - **impls**: ports の実装（JSON ファイル、メモリ、プロセス起動）
//! - **app**: アプリケーション層（builder, pool, scheduler, health monitor）
//! - **subdivide**: タスク分割（純粋関数）
//! - **config**: プール設定

pub mod app;
pub mod claims;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod subdivide;

pub use self::app::{BuildError, Pool, PoolBuilder, PoolStats, RecoveryReport};
pub use self::config::{ConfigError, PoolConfig};
pub use self::domain::{PoolError, Priority, SlotId, TaskId, TaskSpec};
pub use self::queue::{Task, TaskStatus};

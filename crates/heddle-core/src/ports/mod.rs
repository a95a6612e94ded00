//! Ports - 抽象化レイヤー
//!
//! このモジュールはプールが外部に依存する部分の「ポート」を定義します。
//!
//! # 設計原則
//! - Scheduler は単一の所有者（claim 表を書き込むのは Scheduler のみ）
//! - ディスク上のファイルは再起動用のスナップショット
//! - ワーカーの実行方法は Launcher の実装に閉じ込める

pub mod claim_snapshot;
pub mod clock;
pub mod event_log;
pub mod id_generator;
pub mod launcher;

pub use self::claim_snapshot::{ClaimMap, ClaimSnapshot};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_log::EventLog;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::launcher::{LaunchHandle, LaunchRequest, Launcher, WorkerReport, WorkerReporter};

//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてプールを実装します。
//!
//! # 主要コンポーネント
//! - **PoolBuilder**: プールの構築とワイヤリング
//! - **Pool**: 外部 API（submit / cancel / wait / stats）
//! - **Scheduler**: 割り当て・失敗・キャンセルの判断（同期）
//! - **HealthMonitor**: タイムアウトの回収
//! - **ReportLoop**: ワーカーからの報告の処理
//! - **Recovery**: イベントログの再生

pub mod builder;
mod health_monitor;
pub mod pool;
pub mod recovery;
mod report_loop;
pub mod scheduler;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, PoolBuilder};
pub use self::pool::Pool;
pub use self::recovery::RecoveryReport;
pub use self::scheduler::{Dispatch, Scheduler};
pub use self::status::PoolStats;

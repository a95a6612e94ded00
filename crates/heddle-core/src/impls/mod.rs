//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **JsonClaimFile** / **JsonlEventLog**: ディスク上のスナップショットとログ
//! - **InMemoryClaimSnapshot** / **InMemoryEventLog**: テスト用
//! - **ProcessLauncher**: 外部プロセスとしてワーカーを起動
//! - **ChannelLauncher**: プロセス内ドライバーへ起動要求を渡す

pub mod channel_launcher;
pub mod json_claims;
pub mod jsonl_events;
pub mod memory;
pub mod process_launcher;

pub use self::channel_launcher::ChannelLauncher;
pub use self::json_claims::JsonClaimFile;
pub use self::jsonl_events::JsonlEventLog;
pub use self::memory::{InMemoryClaimSnapshot, InMemoryEventLog};
pub use self::process_launcher::ProcessLauncher;

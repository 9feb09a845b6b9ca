//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **ManualHost**: 呼び出し側が tick を回すホスト（テスト・組み込み用）
//! - **TokioHost**: 専用スレッド上の current_thread ランタイムで動くホスト
//! - **StaticConfig / TomlConfig**: 設定値の読み出し

pub mod config;
pub mod manual_host;
pub mod tokio_host;

pub use self::config::{StaticConfig, TomlConfig};
pub use self::manual_host::{HostEvent, ManualHost};
pub use self::tokio_host::TokioHost;

//! Ports - 外部協調者との境界
//!
//! ペアエンジンが依存する外部の仕組みを trait として定義します。
//! - ホストスケジューラ（tick の周期呼び出し、子スレッドの起動）
//! - 設定値の読み出し
//! - メッセージ配送先の解決
//! - 時刻

pub mod clock;
pub mod config;
pub mod destination;
pub mod host;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::config::ConfigProvider;
pub use self::destination::{DestinationResolver, MessageSink};
pub use self::host::{
    AsyncJob, HostScheduler, ScheduleHandle, ScheduleKind, TickTiming, TimerTask,
};

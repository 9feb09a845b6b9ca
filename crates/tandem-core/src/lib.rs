//! tandem-core
//!
//! Parent/child task pairing for single-threaded hosts.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, envelope, state）
//! - **ports**: 抽象化レイヤー（HostScheduler, Clock, ConfigProvider, DestinationResolver）
//! - **pair**: 親子ペアのライフサイクルと停止ハンドシェイク
//! - **pipeline**: 二本のキューを持つペア（QueueProcessor, MessageDispatcher）
//! - **archive**: データファイルの保管（SnapshotArchiver）
//! - **impls**: 実装（ManualHost, TokioHost, StaticConfig, TomlConfig）
//!
//! # Quick start
//! ```no_run
//! use std::time::Duration;
//! use tandem_core::domain::{PayloadEnvelope, Producer};
//! use tandem_core::impls::{StaticConfig, TokioHost};
//! use tandem_core::pipeline::{ParentOutbox, QueueProcessor};
//! use tandem_core::ports::TickTiming;
//!
//! # fn main() -> tandem_core::Result<()> {
//! let host = TokioHost::start("host")?;
//! let processor = QueueProcessor::start(
//!     &host,
//!     &StaticConfig::new(),
//!     "echo",
//!     TickTiming::every(Duration::from_millis(50)),
//!     |envelope: PayloadEnvelope| println!("done: {}", envelope.id()),
//!     |_ctx| |envelope: PayloadEnvelope, outbox: &ParentOutbox<PayloadEnvelope>| {
//!         outbox.submit_to_parent(envelope)
//!     },
//! )?;
//! processor.submit_to_child(PayloadEnvelope::new(&Producer::new("demo", "1.0")));
//! std::thread::sleep(Duration::from_millis(200));
//! processor.cancel()?;
//! host.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod domain;
pub mod error;
pub mod impls;
pub mod pair;
pub mod pipeline;
pub mod ports;

pub use error::{Result, TandemError};
pub use pair::{ChildFn, ChildWork, PairContext, ParentWork, TaskPair, TickStatus};
pub use pipeline::{MessageDispatcher, QueueProcessor};

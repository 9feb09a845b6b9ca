//! HostScheduler port - ホスト側スケジューラの境界
//!
//! ホストは単一スレッドの協調スケジューラです。
//! - 親側の `tick()` を一定周期で呼ぶ（他の処理と直列化される）
//! - 子側のエントリポイントを専用スレッドで一度だけ呼ぶ
//!
//! どちらも登録前に呼び出し側が作った [`ScheduleHandle`] で管理されます。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::domain::ScheduleId;
use crate::error::{Result, TandemError};

/// Periodic work registered with the host.
pub type TimerTask = Box<dyn FnMut() + Send + 'static>;

/// One-shot work the host runs on a dedicated thread.
pub type AsyncJob = Box<dyn FnOnce() + Send + 'static>;

/// Delay before the first tick and period between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickTiming {
    pub delay: Duration,
    pub period: Duration,
}

impl TickTiming {
    /// 周期 0 は 1ms に切り上げる
    pub fn new(delay: Duration, period: Duration) -> Self {
        Self {
            delay,
            period: period.max(Duration::from_millis(1)),
        }
    }

    pub fn every(period: Duration) -> Self {
        Self::new(Duration::ZERO, period)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    Timer,
    Async,
}

struct ScheduleSlot {
    id: ScheduleId,
    name: String,
    kind: ScheduleKind,
    canceled: AtomicBool,
}

/// Shared cancellation handle for one timer or async job.
///
/// Cloning shares the slot: the host and the owner see the same state.
#[derive(Clone)]
pub struct ScheduleHandle {
    slot: Arc<ScheduleSlot>,
}

impl ScheduleHandle {
    pub fn new(name: impl Into<String>, kind: ScheduleKind) -> Self {
        Self {
            slot: Arc::new(ScheduleSlot {
                id: ScheduleId::generate(),
                name: name.into(),
                kind,
                canceled: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> ScheduleId {
        self.slot.id
    }

    pub fn name(&self) -> &str {
        &self.slot.name
    }

    pub fn kind(&self) -> ScheduleKind {
        self.slot.kind
    }

    pub fn is_canceled(&self) -> bool {
        self.slot.canceled.load(Ordering::Acquire)
    }

    /// Cancel the schedule.
    ///
    /// # Errors
    /// `AlreadyCanceled` when this handle (or any clone of it) was canceled before.
    pub fn cancel(&self) -> Result<()> {
        if self.slot.canceled.swap(true, Ordering::AcqRel) {
            return Err(TandemError::AlreadyCanceled {
                id: self.slot.id,
                name: self.slot.name.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for ScheduleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleHandle")
            .field("id", &self.slot.id)
            .field("name", &self.slot.name)
            .field("kind", &self.slot.kind)
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

/// The host scheduler that drives pairs.
///
/// # 契約
/// - `schedule_timer` の tick 呼び出しは互いに、またホスト上の他の処理と直列化されること
/// - `spawn_async` の job は専用スレッドで一度だけ実行されること
/// - handle が cancel 済みなら、以後 tick / job を呼ばないこと
pub trait HostScheduler {
    fn schedule_timer(&self, handle: ScheduleHandle, timing: TickTiming, tick: TimerTask)
    -> Result<()>;

    fn spawn_async(&self, handle: ScheduleHandle, job: AsyncJob) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_cancel_is_an_error() {
        let handle = ScheduleHandle::new("demo", ScheduleKind::Timer);

        handle.cancel().unwrap();
        let err = handle.cancel().unwrap_err();

        assert!(matches!(err, TandemError::AlreadyCanceled { ref name, .. } if name == "demo"));
        assert!(handle.is_canceled());
    }

    #[test]
    fn clones_share_cancellation() {
        let handle = ScheduleHandle::new("demo", ScheduleKind::Async);
        let seen_by_host = handle.clone();

        handle.cancel().unwrap();

        assert!(seen_by_host.is_canceled());
        assert!(seen_by_host.cancel().is_err());
        assert_eq!(seen_by_host.id(), handle.id());
    }

    #[test]
    fn zero_period_is_rounded_up() {
        let timing = TickTiming::every(Duration::ZERO);
        assert_eq!(timing.period, Duration::from_millis(1));
    }
}

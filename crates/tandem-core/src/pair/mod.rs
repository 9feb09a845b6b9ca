//! TaskPair - 親子タスクのライフサイクルエンジン
//!
//! # 構成
//! - **親**: ホストスケジューラから周期的に `tick()` される（ホストスレッド上、ブロック禁止）
//! - **子**: 専用スレッドで一度だけ実行される長時間処理
//!
//! 親は生成時に子ファクトリから子を一つだけ作り、すぐに非同期起動します。
//! 子は処理を終えると親に通知し、persist でなければ親は次の tick で自分を cancel します。
//!
//! # 停止ハンドシェイク
//! 停止は強制終了ではなく協調的です。
//! 1. `request_child_stop()` は子の停止フラグを立てるだけ
//! 2. 子はループ先頭でフラグを見て抜け、後処理をしてから親に通知する
//! 3. 親は通知を受けて（persist でなければ）停止要求状態になる

pub mod handshake;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::domain::{Lifecycle, PairId, Role};
use crate::error::{Result, TandemError};
use crate::ports::{HostScheduler, ScheduleHandle, ScheduleKind, TickTiming};

pub use self::handshake::{ChildPhase, Completion, Handshake, ParentPhase};

/// Parent-side periodic work. Runs on the host thread and must not block.
pub trait ParentWork: Send + 'static {
    fn parent_run(&mut self, ctx: &PairContext);
}

/// Child-side one-shot work. Runs once on a dedicated thread.
///
/// Long-running implementations must poll [`PairContext::child_stop_requested`].
pub trait ChildWork: Send + 'static {
    fn child_run(&mut self, ctx: &PairContext);
}

impl<F> ParentWork for F
where
    F: FnMut(&PairContext) + Send + 'static,
{
    fn parent_run(&mut self, ctx: &PairContext) {
        self(ctx)
    }
}

/// Closures cannot implement both traits, so child closures go through this wrapper.
pub struct ChildFn<F>(pub F);

impl<F> ChildWork for ChildFn<F>
where
    F: FnMut(&PairContext) + Send + 'static,
{
    fn child_run(&mut self, ctx: &PairContext) {
        (self.0)(ctx)
    }
}

/// State shared by both halves of one pair.
struct PairShared {
    id: PairId,
    name: String,
    /// ペア単位のロック（プロセス全体のロックは使わない）
    handshake: Mutex<Handshake>,
    parent_schedule: ScheduleHandle,
    child_schedule: ScheduleHandle,
}

/// One half's view of its pair.
///
/// Both halves get a context; the role decides what `cancel()` does.
#[derive(Clone)]
pub struct PairContext {
    shared: Arc<PairShared>,
    role: Role,
}

impl PairContext {
    fn with_handshake<R>(&self, f: impl FnOnce(&mut Handshake) -> R) -> R {
        let mut guard = self
            .shared
            .handshake
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn id(&self) -> PairId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Ask the child to stop at its next loop check. Idempotent.
    pub fn request_child_stop(&self) {
        if self.with_handshake(Handshake::request_child_stop) {
            tracing::info!(pair = %self.shared.name, role = %self.role, "set child end flag");
        }
    }

    /// True once a stop was requested, the pair was canceled, or the host
    /// canceled the child's schedule.
    pub fn child_stop_requested(&self) -> bool {
        self.shared.child_schedule.is_canceled()
            || self.with_handshake(|hs| hs.child_stop_requested())
    }

    /// Keep the parent ticking after the child completes.
    ///
    /// Whoever sets this must cancel the parent explicitly later.
    pub fn set_persist(&self) {
        if self.with_handshake(Handshake::set_persist) {
            tracing::info!(pair = %self.shared.name, role = %self.role, "parent marked persistent");
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.with_handshake(|hs| hs.persist())
    }

    /// Parent-side stop flag, set when a non-persistent parent's child completes.
    pub fn stop_requested(&self) -> bool {
        self.with_handshake(|hs| hs.stop_requested())
    }

    /// A schedule canceled by the host (shutdown, cancel-all) counts as canceled
    /// even if the handshake never saw it.
    pub fn parent_lifecycle(&self) -> Lifecycle {
        if self.shared.parent_schedule.is_canceled() {
            return Lifecycle::Canceled;
        }
        self.with_handshake(|hs| hs.parent_lifecycle())
    }

    pub fn child_lifecycle(&self) -> Lifecycle {
        if self.shared.child_schedule.is_canceled() {
            return Lifecycle::Canceled;
        }
        self.with_handshake(|hs| hs.child_lifecycle())
    }

    /// Cancel this half's schedule.
    ///
    /// On the parent this also requests the child stop and cancels the
    /// child's schedule.
    ///
    /// # Errors
    /// `AlreadyCanceled` if this half's schedule (or, for a parent, the
    /// child's schedule) was canceled before. The parent is fully canceled
    /// even when only the child's handle reports the error.
    pub fn cancel(&self) -> Result<()> {
        match self.role {
            Role::Parent => {
                self.shared.parent_schedule.cancel()?;
                self.with_handshake(Handshake::cancel_parent);
                tracing::info!(pair = %self.shared.name, "canceled parent");
                self.shared.child_schedule.cancel()
            }
            Role::Child => {
                self.shared.child_schedule.cancel()?;
                self.with_handshake(Handshake::cancel_child);
                tracing::info!(pair = %self.shared.name, "canceled child");
                Ok(())
            }
        }
    }

    pub fn is_canceled(&self) -> bool {
        match self.role {
            Role::Parent => self.shared.parent_schedule.is_canceled(),
            Role::Child => self.shared.child_schedule.is_canceled(),
        }
    }

    /// Child-to-parent completion signal.
    pub(crate) fn notify_child_finished(&self) -> Completion {
        let completion = self.with_handshake(Handshake::child_finished);
        let pair = &self.shared.name;
        match completion {
            Completion::ParentStopping => {
                tracing::info!(pair = %pair, "set parent end flag");
            }
            Completion::ParentPersists => {
                tracing::info!(
                    pair = %pair,
                    "child stopped; parent is persistent and must be canceled manually"
                );
            }
            Completion::ParentGone => {
                tracing::debug!(pair = %pair, "child stopped after parent");
            }
        }
        completion
    }
}

impl fmt::Debug for PairContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairContext")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("role", &self.role)
            .finish()
    }
}

/// Result of one parent tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Continue,
    Canceled,
}

struct ParentInner<P> {
    ctx: PairContext,
    work: Mutex<P>,
}

/// The parent half of a pair.
///
/// A cheap handle: the host keeps one clone for ticking, application code
/// keeps others for control.
pub struct TaskPair<P> {
    inner: Arc<ParentInner<P>>,
}

impl<P> Clone for TaskPair<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: ParentWork> TaskPair<P> {
    /// Build a parent and its single child, start the child, then schedule
    /// the parent tick.
    ///
    /// `child_factory` replaces a self-clone: it receives the child's
    /// context and returns the child work. The child is handed to the host
    /// before the parent timer exists, so it is always launched before the
    /// first tick.
    pub fn start<H, C, F>(
        host: &H,
        name: impl Into<String>,
        timing: TickTiming,
        parent: P,
        child_factory: F,
    ) -> Result<Self>
    where
        H: HostScheduler + ?Sized,
        C: ChildWork,
        F: FnOnce(PairContext) -> C,
    {
        let name = name.into();
        let shared = Arc::new(PairShared {
            id: PairId::generate(),
            parent_schedule: ScheduleHandle::new(format!("{name}/parent"), ScheduleKind::Timer),
            child_schedule: ScheduleHandle::new(format!("{name}/child"), ScheduleKind::Async),
            handshake: Mutex::new(Handshake::new()),
            name,
        });

        let child_ctx = PairContext {
            shared: Arc::clone(&shared),
            role: Role::Child,
        };
        let child = ChildTask {
            work: child_factory(child_ctx.clone()),
            ctx: child_ctx,
        };
        host.spawn_async(
            shared.child_schedule.clone(),
            Box::new(move || child.child_entry()),
        )?;
        tracing::info!(pair = %shared.name, id = %shared.id, "child launched");

        let pair = Self {
            inner: Arc::new(ParentInner {
                ctx: PairContext {
                    shared: Arc::clone(&shared),
                    role: Role::Parent,
                },
                work: Mutex::new(parent),
            }),
        };

        let ticking = pair.clone();
        let registered = host.schedule_timer(
            shared.parent_schedule.clone(),
            timing,
            Box::new(move || {
                if let Err(err) = ticking.tick() {
                    tracing::warn!(pair = %ticking.name(), error = %err, "tick failed");
                }
            }),
        );
        if let Err(err) = registered {
            // 子だけが走り続ける状態を残さない
            pair.inner.ctx.with_handshake(Handshake::cancel_parent);
            if !shared.child_schedule.is_canceled() {
                shared.child_schedule.cancel()?;
            }
            return Err(err);
        }

        Ok(pair)
    }

    /// Host entry point: run the parent hook, then cancel if the child asked
    /// the parent to stop.
    pub fn tick(&self) -> Result<TickStatus> {
        let ctx = &self.inner.ctx;
        if ctx.is_canceled() {
            return Ok(TickStatus::Canceled);
        }

        self.inner
            .work
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .parent_run(ctx);

        if ctx.stop_requested() && !ctx.is_canceled() {
            match ctx.cancel() {
                Ok(()) => {}
                // someone else got there first; the pair is canceled either way
                Err(TandemError::AlreadyCanceled { name, .. }) => {
                    tracing::debug!(pair = %ctx.name(), schedule = %name, "already canceled");
                }
                Err(err) => return Err(err),
            }
        }
        if ctx.is_canceled() {
            return Ok(TickStatus::Canceled);
        }
        Ok(TickStatus::Continue)
    }
}

impl<P> TaskPair<P> {
    pub fn id(&self) -> PairId {
        self.inner.ctx.id()
    }

    pub fn name(&self) -> &str {
        self.inner.ctx.name()
    }

    pub fn context(&self) -> &PairContext {
        &self.inner.ctx
    }

    pub fn request_child_stop(&self) {
        self.inner.ctx.request_child_stop();
    }

    pub fn set_persist(&self) {
        self.inner.ctx.set_persist();
    }

    pub fn cancel(&self) -> Result<()> {
        self.inner.ctx.cancel()
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.ctx.is_canceled()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.ctx.parent_lifecycle()
    }

    pub fn child_lifecycle(&self) -> Lifecycle {
        self.inner.ctx.child_lifecycle()
    }

    /// 親側の work を一時的に借用する（ホストスレッドから呼ぶこと）
    pub fn with_work<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        let mut work = self
            .inner
            .work
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut work)
    }
}

/// The child half, consumed by its single invocation.
struct ChildTask<C> {
    ctx: PairContext,
    work: C,
}

impl<C: ChildWork> ChildTask<C> {
    fn child_entry(mut self) {
        self.ctx.with_handshake(Handshake::child_started);
        tracing::info!(pair = %self.ctx.name(), "start child thread method");
        self.work.child_run(&self.ctx);
        tracing::info!(pair = %self.ctx.name(), "ended child thread method");
        self.ctx.notify_child_finished();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{HostEvent, ManualHost};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn timing() -> TickTiming {
        TickTiming::every(Duration::from_millis(50))
    }

    fn counting_parent(counter: &Arc<AtomicUsize>) -> impl FnMut(&PairContext) + Send + 'static {
        let counter = Arc::clone(counter);
        move |_ctx: &PairContext| {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn idle_child(_ctx: PairContext) -> ChildFn<impl FnMut(&PairContext) + Send + 'static> {
        ChildFn(|_ctx: &PairContext| {})
    }

    #[test]
    fn child_is_launched_before_parent_timer() {
        let host = ManualHost::holding_async();
        let ticks = Arc::new(AtomicUsize::new(0));

        let pair = TaskPair::start(&host, "pairing", timing(), counting_parent(&ticks), idle_child)
            .unwrap();

        let events = host.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], HostEvent::AsyncSpawned { .. }));
        assert!(matches!(events[1], HostEvent::TimerScheduled { .. }));
        assert_eq!(host.pending_async(), 1);
        assert_eq!(pair.lifecycle(), Lifecycle::Running);
        assert_eq!(pair.child_lifecycle(), Lifecycle::Created);
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn persist_keeps_parent_alive_after_child_completion() {
        let host = ManualHost::holding_async();
        let ticks = Arc::new(AtomicUsize::new(0));
        let pair = TaskPair::start(&host, "persist", timing(), counting_parent(&ticks), idle_child)
            .unwrap();

        pair.set_persist();
        pair.context().notify_child_finished();

        assert!(!pair.context().stop_requested());
        assert_eq!(pair.tick().unwrap(), TickStatus::Continue);
        assert_eq!(pair.tick().unwrap(), TickStatus::Continue);
        assert!(!pair.is_canceled());
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn non_persistent_parent_cancels_on_next_tick_after_child_completion() {
        let host = ManualHost::holding_async();
        let ticks = Arc::new(AtomicUsize::new(0));
        let pair = TaskPair::start(&host, "auto-stop", timing(), counting_parent(&ticks), idle_child)
            .unwrap();

        pair.context().notify_child_finished();
        assert!(pair.context().stop_requested());

        assert_eq!(pair.tick().unwrap(), TickStatus::Canceled);
        assert!(pair.is_canceled());
        assert_eq!(pair.lifecycle(), Lifecycle::Canceled);
        // the hook still ran once on the canceling tick
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        // and never again
        assert_eq!(pair.tick().unwrap(), TickStatus::Canceled);
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn child_entry_reports_completion_to_parent() {
        let host = ManualHost::holding_async();
        let ran = Arc::new(AtomicUsize::new(0));
        let child_ran = Arc::clone(&ran);
        let pair = TaskPair::start(
            &host,
            "entry",
            timing(),
            |_ctx: &PairContext| {},
            move |_ctx| {
                ChildFn(move |ctx: &PairContext| {
                    assert_eq!(ctx.role(), Role::Child);
                    child_ran.fetch_add(1, Ordering::SeqCst);
                })
            },
        )
        .unwrap();

        assert_eq!(host.run_async_jobs(), 1);

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(pair.child_lifecycle(), Lifecycle::Finished);
        assert!(pair.context().stop_requested());
    }

    #[test]
    fn repeated_stop_requests_are_harmless() {
        let host = ManualHost::holding_async();
        let seen_child: Arc<Mutex<Option<PairContext>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen_child);
        let pair = TaskPair::start(&host, "stop", timing(), |_ctx: &PairContext| {}, move |ctx| {
            *slot.lock().unwrap() = Some(ctx);
            ChildFn(|_ctx: &PairContext| {})
        })
        .unwrap();
        let child_ctx = seen_child.lock().unwrap().clone().unwrap();

        pair.request_child_stop();
        child_ctx.request_child_stop();
        pair.request_child_stop();

        assert!(child_ctx.child_stop_requested());
        assert_eq!(pair.child_lifecycle(), Lifecycle::StopRequested);
        assert!(!pair.is_canceled());
    }

    #[test]
    fn cancel_twice_is_an_illegal_state() {
        let host = ManualHost::holding_async();
        let pair = TaskPair::start(&host, "twice", timing(), |_ctx: &PairContext| {}, idle_child)
            .unwrap();

        pair.cancel().unwrap();
        assert_eq!(pair.child_lifecycle(), Lifecycle::Canceled);
        assert!(pair.context().child_stop_requested());

        let err = pair.cancel().unwrap_err();
        assert!(matches!(err, TandemError::AlreadyCanceled { .. }));
    }

    #[test]
    fn canceled_child_is_never_run_by_host() {
        let host = ManualHost::holding_async();
        let ran = Arc::new(AtomicUsize::new(0));
        let child_ran = Arc::clone(&ran);
        let pair = TaskPair::start(&host, "skip", timing(), |_ctx: &PairContext| {}, move |_ctx| {
            ChildFn(move |_ctx: &PairContext| {
                child_ran.fetch_add(1, Ordering::SeqCst);
            })
        })
        .unwrap();

        pair.cancel().unwrap();

        assert_eq!(host.run_async_jobs(), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn self_cancel_after_child_canceled_itself_is_not_a_tick_error() {
        let host = ManualHost::holding_async();
        let seen_child: Arc<Mutex<Option<PairContext>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen_child);
        let pair = TaskPair::start(&host, "race", timing(), |_ctx: &PairContext| {}, move |ctx| {
            *slot.lock().unwrap() = Some(ctx);
            ChildFn(|_ctx: &PairContext| {})
        })
        .unwrap();
        let child_ctx = seen_child.lock().unwrap().clone().unwrap();

        child_ctx.cancel().unwrap();
        child_ctx.notify_child_finished();

        assert_eq!(pair.tick().unwrap(), TickStatus::Canceled);
        assert_eq!(pair.lifecycle(), Lifecycle::Canceled);
    }

    #[test]
    fn host_cancel_all_is_reflected_in_lifecycle() {
        let host = ManualHost::holding_async();
        let pair = TaskPair::start(&host, "swept", timing(), |_ctx: &PairContext| {}, idle_child)
            .unwrap();

        assert_eq!(host.cancel_all(), 2);

        assert!(pair.is_canceled());
        assert_eq!(pair.lifecycle(), Lifecycle::Canceled);
        assert_eq!(pair.child_lifecycle(), Lifecycle::Canceled);
        assert_eq!(pair.tick().unwrap(), TickStatus::Canceled);
    }

    #[test]
    fn host_runs_tick_through_registered_timer() {
        let host = ManualHost::holding_async();
        let ticks = Arc::new(AtomicUsize::new(0));
        let pair = TaskPair::start(&host, "timer", timing(), counting_parent(&ticks), idle_child)
            .unwrap();

        host.run_tick();
        host.run_tick();
        assert_eq!(ticks.load(Ordering::SeqCst), 2);

        pair.cancel().unwrap();
        host.run_tick();
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
        assert_eq!(host.live_timers(), 0);
    }
}

//! ManualHost - 呼び出し側が tick を回すホスト
//!
//! # 用途
//! - テスト: tick の回数と子の起動タイミングを決定的に制御する
//! - 組み込み: 既に自前のメインループを持つアプリケーションから `run_tick()` を呼ぶ
//!
//! `run_tick()` 一回につき、生きているタイマーがそれぞれ一度だけ発火します。
//! delay / period は記録されますがシミュレートはしません。

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crate::domain::ScheduleId;
use crate::error::{Result, TandemError};
use crate::ports::{AsyncJob, HostScheduler, ScheduleHandle, TickTiming, TimerTask};

/// What the host was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    AsyncSpawned { id: ScheduleId, name: String },
    TimerScheduled { id: ScheduleId, name: String, timing: TickTiming },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AsyncMode {
    /// Each job gets its own OS thread immediately.
    Threaded,
    /// Jobs wait until `run_async_jobs()` runs them on the caller's thread.
    Held,
}

struct TimerEntry {
    handle: ScheduleHandle,
    tick: TimerTask,
}

pub struct ManualHost {
    mode: AsyncMode,
    timers: Mutex<Vec<TimerEntry>>,
    held: Mutex<VecDeque<(ScheduleHandle, AsyncJob)>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    handles: Mutex<Vec<ScheduleHandle>>,
    events: Mutex<Vec<HostEvent>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ManualHost {
    /// Async jobs run on dedicated threads as soon as they are spawned.
    pub fn new() -> Self {
        Self::with_mode(AsyncMode::Threaded)
    }

    /// Async jobs are held until [`ManualHost::run_async_jobs`].
    pub fn holding_async() -> Self {
        Self::with_mode(AsyncMode::Held)
    }

    fn with_mode(mode: AsyncMode) -> Self {
        Self {
            mode,
            timers: Mutex::new(Vec::new()),
            held: Mutex::new(VecDeque::new()),
            threads: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Fire every live timer once. Returns how many fired.
    ///
    /// Timers are taken out of the lock while they run, so a tick may
    /// schedule new work on this host.
    pub fn run_tick(&self) -> usize {
        let mut due = std::mem::take(&mut *lock(&self.timers));
        let mut fired = 0;
        for entry in due.iter_mut() {
            if entry.handle.is_canceled() {
                continue;
            }
            (entry.tick)();
            fired += 1;
        }
        due.retain(|entry| !entry.handle.is_canceled());

        let mut timers = lock(&self.timers);
        due.append(&mut timers);
        *timers = due;
        fired
    }

    /// Run held async jobs inline, skipping canceled ones. Returns how many ran.
    pub fn run_async_jobs(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = lock(&self.held).pop_front();
            let Some((handle, job)) = next else {
                return ran;
            };
            if handle.is_canceled() {
                tracing::debug!(schedule = %handle.id(), "skipping canceled async job");
                continue;
            }
            job();
            ran += 1;
        }
    }

    /// Wait for every child thread started so far.
    pub fn join_async(&self) -> usize {
        let threads = std::mem::take(&mut *lock(&self.threads));
        let joined = threads.len();
        for thread in threads {
            if thread.join().is_err() {
                tracing::error!("child thread panicked");
            }
        }
        joined
    }

    /// Cancel every handle that is still live. Already-canceled handles are
    /// skipped, not canceled twice.
    pub fn cancel_all(&self) -> usize {
        let handles = std::mem::take(&mut *lock(&self.handles));
        handles
            .iter()
            .filter(|handle| !handle.is_canceled())
            .filter(|handle| handle.cancel().is_ok())
            .count()
    }

    pub fn events(&self) -> Vec<HostEvent> {
        lock(&self.events).clone()
    }

    pub fn pending_async(&self) -> usize {
        lock(&self.held).len()
    }

    pub fn live_timers(&self) -> usize {
        lock(&self.timers)
            .iter()
            .filter(|entry| !entry.handle.is_canceled())
            .count()
    }
}

impl Default for ManualHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostScheduler for ManualHost {
    fn schedule_timer(
        &self,
        handle: ScheduleHandle,
        timing: TickTiming,
        tick: TimerTask,
    ) -> Result<()> {
        lock(&self.events).push(HostEvent::TimerScheduled {
            id: handle.id(),
            name: handle.name().to_string(),
            timing,
        });
        lock(&self.handles).push(handle.clone());
        lock(&self.timers).push(TimerEntry { handle, tick });
        Ok(())
    }

    fn spawn_async(&self, handle: ScheduleHandle, job: AsyncJob) -> Result<()> {
        lock(&self.events).push(HostEvent::AsyncSpawned {
            id: handle.id(),
            name: handle.name().to_string(),
        });
        lock(&self.handles).push(handle.clone());

        match self.mode {
            AsyncMode::Held => {
                lock(&self.held).push_back((handle, job));
            }
            AsyncMode::Threaded => {
                let guard = handle.clone();
                let thread = std::thread::Builder::new()
                    .name(format!("tandem-{}", handle.name()))
                    .spawn(move || {
                        if !guard.is_canceled() {
                            job();
                        }
                    })
                    .map_err(|source| TandemError::SpawnFailed {
                        name: handle.name().to_string(),
                        source,
                    })?;
                lock(&self.threads).push(thread);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ScheduleKind;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counter_tick(counter: &Arc<AtomicUsize>) -> TimerTask {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn canceled_timers_stop_firing_and_are_dropped() {
        let host = ManualHost::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handle = ScheduleHandle::new("t", ScheduleKind::Timer);
        host.schedule_timer(handle.clone(), TickTiming::every(Duration::from_millis(50)), counter_tick(&count))
            .unwrap();

        assert_eq!(host.run_tick(), 1);
        handle.cancel().unwrap();
        assert_eq!(host.run_tick(), 0);
        assert_eq!(host.live_timers(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn threaded_jobs_run_on_their_own_thread() {
        let host = ManualHost::new();
        let caller = std::thread::current().id();
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);

        host.spawn_async(
            ScheduleHandle::new("job", ScheduleKind::Async),
            Box::new(move || {
                *slot.lock().unwrap() = Some(std::thread::current().id());
            }),
        )
        .unwrap();
        assert_eq!(host.join_async(), 1);

        let ran_on = seen.lock().unwrap().unwrap();
        assert_ne!(ran_on, caller);
    }

    #[test]
    fn cancel_all_skips_already_canceled_handles() {
        let host = ManualHost::holding_async();
        let first = ScheduleHandle::new("a", ScheduleKind::Async);
        let second = ScheduleHandle::new("b", ScheduleKind::Async);
        host.spawn_async(first.clone(), Box::new(|| {})).unwrap();
        host.spawn_async(second.clone(), Box::new(|| {})).unwrap();

        first.cancel().unwrap();

        assert_eq!(host.cancel_all(), 1);
        assert!(second.is_canceled());
        assert_eq!(host.run_async_jobs(), 0);
    }
}

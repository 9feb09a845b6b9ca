//! TokioHost - 専用スレッド上の単一スレッドホスト
//!
//! # 実装詳細
//! - ホストスレッドで current_thread ランタイムを回す
//! - タイマーはそれぞれ `interval_at(delay, period)` のタスクになる
//! - 同じスレッド上で動くので tick 同士は必ず直列化される
//! - 子（async job）は名前付きの OS スレッドで実行する
//!
//! `shutdown()` は生きているハンドルを全て cancel し（cancel 済みは飛ばす）、
//! ホストスレッドと子スレッドの終了を待ちます。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::{Result, TandemError};
use crate::ports::{AsyncJob, HostScheduler, ScheduleHandle, TickTiming, TimerTask};

enum HostCommand {
    Timer {
        handle: ScheduleHandle,
        timing: TickTiming,
        tick: TimerTask,
    },
    Shutdown,
}

pub struct TokioHost {
    name: String,
    running: AtomicBool,
    commands: mpsc::UnboundedSender<HostCommand>,
    handles: Mutex<Vec<ScheduleHandle>>,
    host_thread: Mutex<Option<JoinHandle<()>>>,
    children: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TokioHost {
    /// Start the host thread.
    pub fn start(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (commands, rx) = mpsc::unbounded_channel();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let host_thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || runtime.block_on(host_loop(rx)))
            .map_err(|source| TandemError::SpawnFailed {
                name: name.clone(),
                source,
            })?;
        tracing::info!(host = %name, "host scheduler started");

        Ok(Self {
            name,
            running: AtomicBool::new(true),
            commands,
            handles: Mutex::new(Vec::new()),
            host_thread: Mutex::new(Some(host_thread)),
            children: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn track(&self, handle: &ScheduleHandle) {
        let mut handles = lock(&self.handles);
        handles.retain(|h| !h.is_canceled());
        handles.push(handle.clone());
    }

    /// Cancel all live schedules, stop the host thread and join every child.
    ///
    /// Children must observe their stop flag for this to return.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        let handles = std::mem::take(&mut *lock(&self.handles));
        let canceled = handles
            .iter()
            .filter(|handle| !handle.is_canceled())
            .filter(|handle| handle.cancel().is_ok())
            .count();
        tracing::info!(host = %self.name, canceled, "host scheduler shutting down");

        // ignore send error: the host loop may already be gone
        let _ = self.commands.send(HostCommand::Shutdown);

        if let Some(thread) = lock(&self.host_thread).take()
            && thread.join().is_err()
        {
            tracing::error!(host = %self.name, "host thread panicked");
        }

        let children = std::mem::take(&mut *lock(&self.children));
        for child in children {
            if child.join().is_err() {
                tracing::error!(host = %self.name, "child thread panicked");
            }
        }
        tracing::info!(host = %self.name, "host scheduler stopped");
    }
}

impl Drop for TokioHost {
    fn drop(&mut self) {
        if self.running.swap(false, Ordering::AcqRel) {
            let _ = self.commands.send(HostCommand::Shutdown);
        }
    }
}

impl HostScheduler for TokioHost {
    fn schedule_timer(
        &self,
        handle: ScheduleHandle,
        timing: TickTiming,
        tick: TimerTask,
    ) -> Result<()> {
        if !self.is_running() {
            return Err(TandemError::HostUnavailable);
        }
        self.track(&handle);
        self.commands
            .send(HostCommand::Timer {
                handle,
                timing,
                tick,
            })
            .map_err(|_| TandemError::HostUnavailable)
    }

    fn spawn_async(&self, handle: ScheduleHandle, job: AsyncJob) -> Result<()> {
        if !self.is_running() {
            return Err(TandemError::HostUnavailable);
        }
        self.track(&handle);

        let guard = handle.clone();
        let child = std::thread::Builder::new()
            .name(format!("{}-{}", self.name, handle.name()))
            .spawn(move || {
                if !guard.is_canceled() {
                    job();
                }
            })
            .map_err(|source| TandemError::SpawnFailed {
                name: handle.name().to_string(),
                source,
            })?;
        lock(&self.children).push(child);
        Ok(())
    }
}

async fn host_loop(mut commands: mpsc::UnboundedReceiver<HostCommand>) {
    let mut timers = JoinSet::new();
    while let Some(command) = commands.recv().await {
        match command {
            HostCommand::Timer {
                handle,
                timing,
                tick,
            } => {
                timers.spawn(run_timer(handle, timing, tick));
            }
            HostCommand::Shutdown => break,
        }
        while timers.try_join_next().is_some() {}
    }
    timers.abort_all();
}

async fn run_timer(handle: ScheduleHandle, timing: TickTiming, mut tick: TimerTask) {
    let mut interval = tokio::time::interval_at(Instant::now() + timing.delay, timing.period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if handle.is_canceled() {
            break;
        }
        tick();
        if handle.is_canceled() {
            break;
        }
    }
    tracing::debug!(schedule = %handle.id(), name = %handle.name(), "timer removed");
}

//! SnapshotArchiver - データファイルの書き込み完了を待って保管する
//!
//! ホスト側がセッションのデータファイルを書き出した直後に `request()` を呼びます。
//! 子スレッドはファイルの更新時刻が要求時刻を超えるまで待ち、[`ArchiveSink`] に
//! 保管してから結果を親に返します。親はホストスレッド上で [`CompletionListener`] を呼びます。
//!
//! # 待機のルール
//! - 更新時刻 > 要求時刻 なら書き込み完了
//! - 更新時刻が現在時刻の ±tolerance 以内なら完了済みとみなす
//! - 要求から deadline を過ぎたら失敗（listener に失敗として通知）
//! - 子に停止要求が来たら待機をやめて失敗扱い（ファイルは保管しない）

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::domain::{Lifecycle, PairId, Payload, PayloadEnvelope, PayloadId, Producer, SessionId};
use crate::error::{Result, TandemError};
use crate::pair::{PairContext, TickStatus};
use crate::pipeline::settings::{PROCESSOR_KEYS, PipelineSettings};
use crate::pipeline::{ParentOutbox, ProcessHandler, QueueProcessor, ReceiveHandler};
use crate::ports::{Clock, ConfigProvider, HostScheduler, SystemClock, TickTiming};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArchive {
    pub location: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// Not processed yet.
    Pending,
    Archived(StoredArchive),
    Failed { reason: String },
}

impl ArchiveOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ArchiveOutcome::Archived(_))
    }
}

#[derive(Debug)]
pub struct ArchiveRequest {
    envelope: PayloadEnvelope,
    session: SessionId,
    data_file: PathBuf,
    requested_at: DateTime<Utc>,
    outcome: ArchiveOutcome,
}

impl ArchiveRequest {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn data_file(&self) -> &Path {
        &self.data_file
    }

    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }

    pub fn outcome(&self) -> &ArchiveOutcome {
        &self.outcome
    }
}

impl Payload for ArchiveRequest {
    fn envelope(&self) -> &PayloadEnvelope {
        &self.envelope
    }
}

/// Where finished data files end up. Runs on the child's thread.
pub trait ArchiveSink: Send + 'static {
    fn store(&mut self, session: SessionId, source: &Path) -> Result<StoredArchive>;
}

/// Copies each data file to `<root>/<session>.dat`.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArchiveSink for DirectorySink {
    fn store(&mut self, session: SessionId, source: &Path) -> Result<StoredArchive> {
        fs::create_dir_all(&self.root)?;
        let location = self.root.join(format!("{session}.dat"));
        let bytes = fs::copy(source, &location)?;
        Ok(StoredArchive { location, bytes })
    }
}

/// Notified on the host thread once per request, success or not.
pub trait CompletionListener: Send + 'static {
    fn on_complete(&mut self, session: SessionId, outcome: &ArchiveOutcome);
}

impl<F> CompletionListener for F
where
    F: FnMut(SessionId, &ArchiveOutcome) + Send + 'static,
{
    fn on_complete(&mut self, session: SessionId, outcome: &ArchiveOutcome) {
        self(session, outcome)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveTiming {
    pub poll_interval: Duration,
    pub deadline: Duration,
    pub tolerance: Duration,
    /// 待機中に停止要求を確認する間隔
    pub stop_check: Duration,
}

impl Default for ArchiveTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            deadline: Duration::from_secs(50),
            tolerance: Duration::from_secs(1),
            stop_check: Duration::from_millis(10),
        }
    }
}

fn modified_at(path: &Path) -> Result<Option<DateTime<Utc>>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(DateTime::<Utc>::from(meta.modified()?))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Sleep for `total` in slices of `slice`. Returns `false` if stopped early.
fn sleep_unless_stopped(
    total: Duration,
    slice: Duration,
    should_stop: &dyn Fn() -> bool,
) -> bool {
    let slice = slice.max(Duration::from_millis(1));
    let end = Instant::now() + total;
    loop {
        if should_stop() {
            return false;
        }
        let now = Instant::now();
        if now >= end {
            return true;
        }
        std::thread::sleep(slice.min(end - now));
    }
}

/// Block until `path` looks rewritten since `requested_at`.
///
/// `clock` is only used to compare modification times. The deadline runs on
/// the monotonic clock from the moment the wait starts, or from
/// `requested_at` when the clock shows more time has passed.
///
/// # Errors
/// - `ArchiveTimeout` once `timing.deadline` has passed
/// - `ArchiveStopped` as soon as `should_stop` returns `true`
pub fn wait_for_rewrite(
    path: &Path,
    session: SessionId,
    requested_at: DateTime<Utc>,
    timing: ArchiveTiming,
    clock: &dyn Clock,
    should_stop: &dyn Fn() -> bool,
) -> Result<()> {
    let tolerance_ms = i64::try_from(timing.tolerance.as_millis()).unwrap_or(i64::MAX);
    let started = Instant::now();
    loop {
        if should_stop() {
            return Err(TandemError::ArchiveStopped { session });
        }

        let now = clock.now();
        if let Some(modified) = modified_at(path)? {
            if modified > requested_at {
                return Ok(());
            }
            if (now - modified).num_milliseconds().abs() < tolerance_ms {
                return Ok(());
            }
            tracing::debug!(session = %session, %modified, "data file not rewritten yet");
        }

        let waited = (now - requested_at)
            .to_std()
            .unwrap_or_default()
            .max(started.elapsed());
        if waited > timing.deadline {
            return Err(TandemError::ArchiveTimeout { session, waited });
        }
        if !sleep_unless_stopped(timing.poll_interval, timing.stop_check, should_stop) {
            return Err(TandemError::ArchiveStopped { session });
        }
    }
}

struct ArchiveWorker<S> {
    ctx: PairContext,
    sink: S,
    timing: ArchiveTiming,
    clock: Arc<dyn Clock>,
}

impl<S: ArchiveSink> ArchiveWorker<S> {
    fn archive(&mut self, request: &ArchiveRequest) -> Result<StoredArchive> {
        let ctx = &self.ctx;
        wait_for_rewrite(
            &request.data_file,
            request.session,
            request.requested_at,
            self.timing,
            self.clock.as_ref(),
            &|| ctx.child_stop_requested(),
        )?;
        self.sink.store(request.session, &request.data_file)
    }
}

impl<S: ArchiveSink> ProcessHandler<ArchiveRequest> for ArchiveWorker<S> {
    fn process(&mut self, mut request: ArchiveRequest, outbox: &ParentOutbox<ArchiveRequest>) {
        request.outcome = match self.archive(&request) {
            Ok(stored) => {
                tracing::info!(
                    session = %request.session,
                    location = %stored.location.display(),
                    bytes = stored.bytes,
                    "data file archived"
                );
                ArchiveOutcome::Archived(stored)
            }
            Err(err) => {
                tracing::error!(session = %request.session, error = %err, "archive failed");
                ArchiveOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        };
        outbox.submit_to_parent(request);
    }
}

struct ListenerBridge<L>(L);

impl<L: CompletionListener> ReceiveHandler<ArchiveRequest> for ListenerBridge<L> {
    fn receive(&mut self, request: ArchiveRequest) {
        self.0.on_complete(request.session, &request.outcome);
    }
}

/// Everything but the sink and listener.
#[derive(Clone)]
pub struct ArchiverOptions {
    pub name: String,
    pub tick: TickTiming,
    pub timing: ArchiveTiming,
    pub producer: Producer,
    pub clock: Arc<dyn Clock>,
}

impl ArchiverOptions {
    pub fn new(producer: Producer) -> Self {
        Self {
            name: "snapshot-archiver".to_string(),
            tick: TickTiming::every(Duration::from_millis(50)),
            timing: ArchiveTiming::default(),
            producer,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tick(mut self, tick: TickTiming) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_timing(mut self, timing: ArchiveTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

pub struct SnapshotArchiver<L> {
    processor: QueueProcessor<ArchiveRequest, ListenerBridge<L>>,
    producer: Producer,
    clock: Arc<dyn Clock>,
}

impl<L: CompletionListener> SnapshotArchiver<L> {
    pub fn start<H, C, S>(
        host: &H,
        config: &C,
        options: ArchiverOptions,
        sink: S,
        listener: L,
    ) -> Result<Self>
    where
        H: HostScheduler + ?Sized,
        C: ConfigProvider + ?Sized,
        S: ArchiveSink,
    {
        let settings = PipelineSettings::resolve(config, PROCESSOR_KEYS);
        Self::with_settings(host, settings, options, sink, listener)
    }

    pub fn with_settings<H, S>(
        host: &H,
        settings: PipelineSettings,
        options: ArchiverOptions,
        sink: S,
        listener: L,
    ) -> Result<Self>
    where
        H: HostScheduler + ?Sized,
        S: ArchiveSink,
    {
        let ArchiverOptions {
            name,
            tick,
            timing,
            producer,
            clock,
        } = options;

        let worker_clock = Arc::clone(&clock);
        let processor = QueueProcessor::with_settings(
            host,
            settings,
            name,
            tick,
            ListenerBridge(listener),
            move |ctx: &PairContext| ArchiveWorker {
                ctx: ctx.clone(),
                sink,
                timing,
                clock: worker_clock,
            },
        )?;

        Ok(Self {
            processor,
            producer,
            clock,
        })
    }

    /// Queue `data_file` for archiving. The request time is now.
    pub fn request(&self, session: SessionId, data_file: impl Into<PathBuf>) -> PayloadId {
        let envelope = PayloadEnvelope::with_clock(&self.producer, self.clock.as_ref());
        let id = envelope.id();
        let request = ArchiveRequest {
            requested_at: envelope.created_at(),
            envelope,
            session,
            data_file: data_file.into(),
            outcome: ArchiveOutcome::Pending,
        };
        tracing::info!(session = %session, path = %request.data_file.display(), "archive requested");
        self.processor.submit_to_child(request);
        id
    }

    pub fn tick(&self) -> Result<TickStatus> {
        self.processor.tick()
    }
}

impl<L> SnapshotArchiver<L> {
    pub fn id(&self) -> PairId {
        self.processor.id()
    }

    pub fn name(&self) -> &str {
        self.processor.name()
    }

    pub fn context(&self) -> &PairContext {
        self.processor.context()
    }

    pub fn pending(&self) -> usize {
        self.processor.child_backlog()
    }

    pub fn request_child_stop(&self) {
        self.processor.request_child_stop();
    }

    pub fn cancel(&self) -> Result<()> {
        self.processor.cancel()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.processor.lifecycle()
    }

    pub fn child_lifecycle(&self) -> Lifecycle {
        self.processor.child_lifecycle()
    }
}

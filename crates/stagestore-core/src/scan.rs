//! Streaming reader over the current partition
//!
//! `read_all` starts one background thread that walks `current/<group>/<record>`
//! and hands results over two rendezvous channels (capacity 0): one for
//! [`RecordDescriptor`]s and one for [`StageError`]s. Every hand-off waits for
//! the consumer, so memory stays flat no matter how many records exist.
//!
//! Failure policy:
//! - `current` cannot be listed: one error, then the streams close.
//! - a group (or one of its entries) cannot be listed: one error, walk continues.
//! - a record cannot be read: not reported here; `RecordDescriptor::content`
//!   fails when the consumer asks for the bytes.
//!
//! The producer never blocks forever. While the consumer is not ready it
//! re-checks the scan's [`CancelToken`] every `Config::emit_poll_interval`,
//! and it stops as soon as the record receiver is dropped. A dropped error
//! receiver only discards later errors.
//!
//! Consumers must drain both streams concurrently (or use [`Scan::drain`] /
//! [`Scan::for_each`]), and must block on `recv`/iteration: a consumer that
//! only polls with `try_recv` never meets a polling producer on a rendezvous
//! channel.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::config::Config;
use crate::error::{StageError, StageResult};
use crate::stats::StageStats;
use crate::writer::{read_record, record_len};

/// Attempts that only yield the CPU before the producer starts sleeping.
const SPIN_ATTEMPTS: u32 = 64;

/// One record discovered by a scan. Content is read from disk on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDescriptor {
    name: String,
    group: String,
    path: PathBuf,
}

impl RecordDescriptor {
    pub(crate) fn new(name: String, group: String, path: PathBuf) -> Self {
        Self { name, group, path }
    }

    /// Record file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning group.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Full path of the record file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record's bytes. Each call goes to disk.
    pub fn content(&self) -> StageResult<Vec<u8>> {
        read_record(&self.path)
    }

    /// Size of the record on disk.
    pub fn size(&self) -> StageResult<u64> {
        record_len(&self.path)
    }
}

/// Shared flag that tells a scan producer to stop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the producer to stop at its next check.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True once `cancel` has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Owns a scan's producer thread. Dropping it cancels and joins the producer.
pub struct ScanGuard {
    cancel: CancelToken,
    thread: Option<thread::JoinHandle<()>>,
}

impl ScanGuard {
    /// The token the producer watches.
    pub fn token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// True once the producer has closed both streams.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Cancel the producer and wait for it to exit.
    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything a fully drained scan produced.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Discovered records, in filesystem enumeration order
    pub records: Vec<RecordDescriptor>,
    /// Listing errors reported during the walk
    pub errors: Vec<StageError>,
}

impl ScanOutcome {
    /// True when the walk reported no errors.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A running scan of the current partition.
pub struct Scan {
    records: Receiver<RecordDescriptor>,
    errors: Receiver<StageError>,
    guard: ScanGuard,
}

impl Scan {
    /// Spawn the producer for `current_dir` and return immediately.
    pub fn start(current_dir: PathBuf, config: &Config, stats: Arc<StageStats>) -> StageResult<Self> {
        let (record_tx, records) = mpsc::sync_channel(0);
        let (error_tx, errors) = mpsc::sync_channel(0);
        let cancel = CancelToken::new();

        stats.record_scan_started();

        let mut producer = Producer {
            records: record_tx,
            errors: error_tx,
            errors_open: true,
            cancel: cancel.clone(),
            poll: config.emit_poll_interval,
            stats,
            emitted: 0,
            reported: 0,
        };

        let thread = thread::Builder::new()
            .name(config.scan_thread_name.clone())
            .spawn(move || producer.run(&current_dir))
            .map_err(|e| StageError::Io {
                path: None,
                kind: e.kind(),
                message: format!("Failed to spawn scan thread: {}", e),
            })?;

        Ok(Self {
            records,
            errors,
            guard: ScanGuard { cancel, thread: Some(thread) },
        })
    }

    /// Descriptor stream.
    pub fn records(&self) -> &Receiver<RecordDescriptor> {
        &self.records
    }

    /// Error stream.
    pub fn errors(&self) -> &Receiver<StageError> {
        &self.errors
    }

    /// Token that stops this scan when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.guard.token()
    }

    /// Stop the producer and wait for it to exit.
    pub fn cancel(self) {
        let Scan { records, errors, guard } = self;
        drop(records);
        drop(errors);
        guard.cancel();
    }

    /// Split into raw receivers and the guard that owns the producer thread.
    pub fn into_parts(self) -> (Receiver<RecordDescriptor>, Receiver<StageError>, ScanGuard) {
        (self.records, self.errors, self.guard)
    }

    /// Drain both streams to completion.
    pub fn drain(self) -> ScanOutcome {
        let mut records = Vec::new();
        let errors = self.for_each(|record| records.push(record));
        ScanOutcome { records, errors }
    }

    /// Visit every descriptor while errors are collected on a second thread.
    pub fn for_each<F>(self, mut f: F) -> Vec<StageError>
    where
        F: FnMut(RecordDescriptor),
    {
        match self.try_for_each(|record| -> Result<(), std::convert::Infallible> {
            f(record);
            Ok(())
        }) {
            Ok(errors) => errors,
            Err(never) => match never {},
        }
    }

    /// Visit descriptors until `f` fails. A failure cancels the producer and is returned.
    pub fn try_for_each<E, F>(self, mut f: F) -> Result<Vec<StageError>, E>
    where
        F: FnMut(RecordDescriptor) -> Result<(), E>,
    {
        let Scan { records, errors, guard } = self;
        let token = guard.token();

        let result = thread::scope(|s| {
            let collector = s.spawn(move || errors.iter().collect::<Vec<_>>());

            let mut outcome = Ok(());
            for record in records.iter() {
                if let Err(e) = f(record) {
                    token.cancel();
                    outcome = Err(e);
                    break;
                }
            }
            drop(records);

            let reported = collector.join().unwrap_or_default();
            outcome.map(|()| reported)
        });

        drop(guard);
        result
    }
}

enum Flow {
    Continue,
    Stop,
}

enum Offer<T> {
    Sent,
    Cancelled,
    Disconnected(T),
}

struct Producer {
    records: SyncSender<RecordDescriptor>,
    errors: SyncSender<StageError>,
    errors_open: bool,
    cancel: CancelToken,
    poll: Duration,
    stats: Arc<StageStats>,
    emitted: u64,
    reported: u64,
}

impl Producer {
    fn run(&mut self, current: &Path) {
        debug!("scan of {} started", current.display());
        let finished = matches!(self.walk(current), Flow::Continue);
        debug!(
            "scan of {} {}: {} records, {} errors",
            current.display(),
            if finished { "finished" } else { "stopped early" },
            self.emitted,
            self.reported
        );
    }

    fn walk(&mut self, current: &Path) -> Flow {
        let groups = match fs::read_dir(current) {
            Ok(entries) => entries,
            Err(e) => {
                return self.report(StageError::io(current, e, "Failed to list current partition"));
            }
        };

        for entry in groups {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    if let Flow::Stop = self.report(StageError::io(current, e, "Failed to read current partition entry")) {
                        return Flow::Stop;
                    }
                    continue;
                }
            };

            let group_path = entry.path();
            match entry.file_type() {
                Ok(kind) if kind.is_dir() => {}
                Ok(_) => continue,
                Err(e) => {
                    if let Flow::Stop = self.report(StageError::io(&group_path, e, "Failed to stat group directory")) {
                        return Flow::Stop;
                    }
                    continue;
                }
            }

            let group = entry.file_name().to_string_lossy().into_owned();
            if let Flow::Stop = self.walk_group(&group_path, &group) {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn walk_group(&mut self, group_path: &Path, group: &str) -> Flow {
        let entries = match fs::read_dir(group_path) {
            Ok(entries) => entries,
            Err(e) => return self.report(StageError::io(group_path, e, "Failed to list group directory")),
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    if let Flow::Stop = self.report(StageError::io(group_path, e, "Failed to read group entry")) {
                        return Flow::Stop;
                    }
                    continue;
                }
            };

            // nested directories are not records
            if entry.file_type().map_or(false, |kind| kind.is_dir()) {
                continue;
            }

            let descriptor = RecordDescriptor::new(
                entry.file_name().to_string_lossy().into_owned(),
                group.to_string(),
                entry.path(),
            );
            if let Flow::Stop = self.emit(descriptor) {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn emit(&mut self, descriptor: RecordDescriptor) -> Flow {
        match offer(&self.records, descriptor, &self.cancel, self.poll) {
            Offer::Sent => {
                self.emitted += 1;
                self.stats.record_emitted();
                Flow::Continue
            }
            Offer::Cancelled => Flow::Stop,
            Offer::Disconnected(_) => {
                warn!("scan abandoned: record receiver dropped after {} records", self.emitted);
                Flow::Stop
            }
        }
    }

    fn report(&mut self, error: StageError) -> Flow {
        warn!("scan error: {}", error);
        if !self.errors_open {
            return Flow::Continue;
        }
        match offer(&self.errors, error, &self.cancel, self.poll) {
            Offer::Sent => {
                self.reported += 1;
                self.stats.record_scan_error();
                Flow::Continue
            }
            Offer::Cancelled => Flow::Stop,
            Offer::Disconnected(_) => {
                self.errors_open = false;
                Flow::Continue
            }
        }
    }
}

/// Hand `item` to a waiting receiver, re-checking `cancel` while none is ready.
fn offer<T>(tx: &SyncSender<T>, item: T, cancel: &CancelToken, poll: Duration) -> Offer<T> {
    let mut item = item;
    let mut attempts = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Offer::Cancelled;
        }
        match tx.try_send(item) {
            Ok(()) => return Offer::Sent,
            Err(TrySendError::Disconnected(back)) => return Offer::Disconnected(back),
            Err(TrySendError::Full(back)) => {
                item = back;
                if attempts < SPIN_ATTEMPTS {
                    attempts += 1;
                    thread::yield_now();
                } else {
                    thread::sleep(poll);
                }
            }
        }
    }
}

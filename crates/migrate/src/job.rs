use crate::error::{ErrorKind, Result};
use crate::event::MigrationEvent;
use crate::report::{MigrationReport, Outcome};
use derive_more::Display;
use exn::ResultExt;
use handheld_archive::{ArchiveReader, ArchiveWriter, count_records};
use handheld_config::Config;
use handheld_device::{DeviceBus, DeviceHandle, DeviceInfo, DeviceSink, DeviceSource, WriteMode};
use handheld_record::{PumpError, RecordSource, pump};
use handheld_syncutils::{CancelToken, wait_gate};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use time::UtcDateTime;

const DEFAULT_BLOCK_SIZE: u64 = 25;

/// Where a migration job is in its lifecycle.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    #[display("idle")]
    Idle,
    #[display("backing up")]
    Backup,
    #[display("waiting for destination")]
    ResolveDestination,
    #[display("restoring")]
    Restore,
    #[display("done")]
    Done,
    #[display("aborted")]
    Aborted,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Aborted)
    }
}

/// Backup one device into an archive, then restore the archive into another.
///
/// Built on the GUI thread, then handed to [`spawn`](Self::spawn), which
/// runs it on a worker thread. Everything the job needs is passed in: the
/// bus to find both devices on, and the archive to write.
pub struct MigrationJob {
    bus: Arc<dyn DeviceBus>,
    source: DeviceInfo,
    destination: Option<DeviceInfo>,
    write_mode: WriteMode,
    archive_path: PathBuf,
    block_size: u64,
}

impl MigrationJob {
    pub fn new(bus: Arc<dyn DeviceBus>, source: DeviceInfo, archive_path: impl Into<PathBuf>) -> Self {
        Self {
            bus,
            source,
            destination: None,
            write_mode: WriteMode::default(),
            archive_path: archive_path.into(),
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    /// A job using the configured archive location, write mode and
    /// progress block size.
    pub fn from_config(bus: Arc<dyn DeviceBus>, source: DeviceInfo, config: &Config) -> Self {
        let archive_path = config.archive_path(&source, UtcDateTime::now());
        Self::new(bus, source, archive_path)
            .with_write_mode(config.write_mode)
            .with_block_size(config.block_size)
    }

    /// Restore into `destination` without asking the user for one.
    pub fn with_destination(mut self, destination: DeviceInfo) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    /// Records between progress updates. Zero is treated as one.
    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Start the job on a worker thread, posting its events to `events`.
    pub fn spawn(self, events: Sender<MigrationEvent>) -> Result<MigrationHandle> {
        let token = CancelToken::new();
        let phase = Arc::new(Mutex::new(Phase::Idle));
        let worker = Worker {
            job: self,
            events,
            token: token.clone(),
            phase: Arc::clone(&phase),
            report: MigrationReport::new(),
        };
        let thread = thread::Builder::new()
            .name("migration".to_string())
            .spawn(move || worker.run())
            .or_raise(|| ErrorKind::Spawn)?;
        Ok(MigrationHandle {
            token,
            phase,
            thread: Some(thread),
        })
    }
}

/// GUI-side handle to a running [`MigrationJob`].
///
/// Dropping the handle aborts the job and waits for it.
pub struct MigrationHandle {
    token: CancelToken,
    phase: Arc<Mutex<Phase>>,
    thread: Option<JoinHandle<MigrationReport>>,
}

impl MigrationHandle {
    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Ask the job to stop, and block until it has. The worker notices
    /// between records, or while waiting for an answer from the GUI.
    pub fn abort(mut self) -> MigrationReport {
        tracing::info!(phase = %self.phase(), "Migration abort requested");
        self.token.cancel();
        self.wait()
    }

    /// Block until the job finishes on its own.
    pub fn join(mut self) -> MigrationReport {
        self.wait()
    }

    fn wait(&mut self) -> MigrationReport {
        match self.thread.take().map(JoinHandle::join) {
            Some(Ok(report)) => report,
            Some(Err(panic)) => std::panic::resume_unwind(panic),
            None => MigrationReport::new(),
        }
    }
}

impl Drop for MigrationHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.token.cancel();
            let _ = thread.join();
        }
    }
}

struct Worker {
    job: MigrationJob,
    events: Sender<MigrationEvent>,
    token: CancelToken,
    phase: Arc<Mutex<Phase>>,
    report: MigrationReport,
}

impl Worker {
    fn run(mut self) -> MigrationReport {
        let result = self.run_phases();
        let (outcome, phase) = match result {
            Ok(()) => (Outcome::Completed, Phase::Done),
            Err(err) if err.is_cancelled() => (Outcome::Cancelled, Phase::Aborted),
            Err(err) => {
                tracing::error!(error = ?err, "Migration failed");
                self.post_error(format!("Migration failed: {}", &*err));
                (Outcome::Failed(err.to_string()), Phase::Aborted)
            },
        };
        self.report.outcome = outcome;
        self.set_phase(phase);
        self.status(format!("Migration {}", self.report.summary()), 0, 0);
        tracing::info!(
            outcome = %self.report,
            backed_up = self.report.backed_up,
            restored = self.report.restored,
            "Migration finished"
        );
        self.report
    }

    fn run_phases(&mut self) -> Result<()> {
        self.enter(Phase::Backup)?;
        self.backup()?;
        self.enter(Phase::ResolveDestination)?;
        let destination = self.resolve_destination()?;
        self.enter(Phase::Restore)?;
        self.restore(&destination)
    }

    fn enter(&self, phase: Phase) -> Result<()> {
        self.check_cancelled()?;
        tracing::info!(%phase, "Migration phase");
        self.set_phase(phase);
        Ok(())
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.lock() = phase;
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.token.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        Ok(())
    }

    fn post(&self, event: MigrationEvent) {
        if self.events.send(event).is_err() {
            // Nobody is listening; any request in the event was dropped with
            // it, which the caller sees as an unanswered request.
            tracing::debug!("Migration event receiver is gone");
        }
    }

    fn status(&self, text: String, processed: u64, total: u64) {
        self.post(MigrationEvent::Status { text, processed, total });
    }

    fn post_error(&self, text: String) {
        self.post(MigrationEvent::ErrorMessage { text });
    }

    /// Connect to `device`, asking the user for its password for as long as
    /// the device keeps asking for one.
    fn connect(&self, device: &DeviceInfo) -> Result<DeviceHandle> {
        let mut password: Option<String> = None;
        loop {
            self.check_cancelled()?;
            let err = match self.job.bus.connect(device, password.as_deref()) {
                Ok(handle) => return Ok(handle),
                Err(err) => err,
            };
            let Some(remaining_tries) = err.password_tries() else {
                return Err(ErrorKind::device(err));
            };
            tracing::info!(%device, remaining_tries, "Device wants a password");
            let (gate, reply) = wait_gate();
            self.post(MigrationEvent::PasswordRequest {
                device: device.clone(),
                remaining_tries,
                reply,
            });
            match gate.wait_or_cancel(&self.token) {
                Some(answer) if !answer.is_empty() => password = Some(answer),
                _ => {
                    tracing::info!(%device, "Password prompt abandoned");
                    self.token.cancel();
                    exn::bail!(ErrorKind::Cancelled);
                },
            }
        }
    }

    #[tracing::instrument(level = "info", skip_all, fields(source = %self.job.source))]
    fn backup(&mut self) -> Result<()> {
        let source = self.job.source.clone();
        let handle = self.connect(&source)?;
        let mut guard = handle.acquire();
        let session = guard.session();
        let catalog = session.catalog().map_err(ErrorKind::device)?;
        let total: u64 = catalog.iter().map(|descriptor| u64::from(descriptor.record_count)).sum();
        let names = catalog.into_iter().map(|descriptor| descriptor.name);

        let path = self.job.archive_path.clone();
        let mut writer = ArchiveWriter::create(&path).map_err(ErrorKind::archive)?;
        let mut reader = DeviceSource::new(session, names);
        self.status(format!("Backing up {source}"), 0, total);

        let mut processed = 0;
        let pumped = loop {
            if reader.end_of_stream() {
                break Ok(());
            }
            match pump(&mut reader, &mut writer) {
                Ok(true) => {
                    processed += 1;
                    if processed % self.job.block_size == 0 {
                        let database = reader.current_database().unwrap_or_default();
                        self.status(format!("Backing up {source}: {database}"), processed, total);
                    }
                },
                Ok(false) => {},
                Err(PumpError::Read(err)) => break Err(ErrorKind::device(err)),
                Err(PumpError::Write { error, .. }) => break Err(ErrorKind::archive(error)),
            }
            if let Err(err) = self.check_cancelled() {
                break Err(err);
            }
        };
        drop(reader);
        drop(guard);
        self.report.backed_up = processed;

        if let Err(err) = pumped {
            drop(writer);
            if let Err(cleanup) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %cleanup, "Could not remove partial archive");
            }
            return Err(err);
        }
        writer.finish().map_err(ErrorKind::archive)?;
        tracing::info!(records = processed, path = %path.display(), "Backup complete");
        self.status(format!("Backed up {source}"), processed, total);
        self.report.archive_path = Some(path);
        Ok(())
    }

    /// The device to restore into. Never the source device.
    fn resolve_destination(&mut self) -> Result<DeviceInfo> {
        let source = self.job.source.clone();
        match self.job.destination.take() {
            Some(destination) if destination.pin != source.pin => return Ok(destination),
            Some(_) => self.post_error(format!("Cannot restore {source} into itself, choose another device")),
            None => {},
        }
        loop {
            self.check_cancelled()?;
            let (gate, reply) = wait_gate();
            self.post(MigrationEvent::DestinationPinRequest {
                source: source.clone(),
                reply,
            });
            match gate.wait_or_cancel(&self.token) {
                None => {
                    tracing::info!("Destination prompt abandoned");
                    self.token.cancel();
                    exn::bail!(ErrorKind::Cancelled);
                },
                Some(destination) if destination.pin == source.pin => {
                    tracing::warn!(%destination, "Destination is the source device, asking again");
                    self.post_error(format!("{destination} is the device being migrated from, choose another"));
                },
                Some(destination) => {
                    tracing::info!(%destination, "Destination chosen");
                    return Ok(destination);
                },
            }
        }
    }

    #[tracing::instrument(level = "info", skip_all, fields(%destination))]
    fn restore(&mut self, destination: &DeviceInfo) -> Result<()> {
        let handle = self.connect(destination)?;
        let mut guard = handle.acquire();
        let session = guard.session();
        let present: HashSet<String> = session
            .catalog()
            .map_err(ErrorKind::device)?
            .into_iter()
            .map(|descriptor| descriptor.name)
            .collect();

        let path = self.job.archive_path.clone();
        let total = count_records(&path, Some(&present)).map_err(ErrorKind::archive)?;
        let mut archive = ArchiveReader::open(&path).map_err(ErrorKind::archive)?;
        let mut reader = archive.records(Some(present)).map_err(ErrorKind::archive)?;
        let mut writer = DeviceSink::new(session, self.job.write_mode);
        tracing::info!(%destination, mode = ?writer.mode(), records = total, "Restoring");
        if let Some(database) = reader.peek_database().map_err(ErrorKind::archive)? {
            self.status(format!("Restoring {destination}: {database}"), 0, total);
        }

        let mut processed = 0;
        while !reader.end_of_stream() {
            match pump(&mut reader, &mut writer) {
                Ok(true) => {
                    processed += 1;
                    if processed % self.job.block_size == 0 {
                        let database = reader.current_database().unwrap_or_default();
                        self.status(format!("Restoring {destination}: {database}"), processed, total);
                    }
                },
                Ok(false) => {},
                Err(PumpError::Read(err)) => return Err(ErrorKind::archive(err)),
                Err(PumpError::Write { database, error, .. }) if error.is_fatal() => {
                    tracing::error!(%database, error = %&*error, "Destination device failed");
                    return Err(ErrorKind::device(error));
                },
                Err(PumpError::Write { database, error, .. }) => {
                    tracing::error!(%database, error = %&*error, "Restore of database failed, skipping it");
                    self.post_error(format!("Could not restore {database}: {}. Skipping its remaining records.", &*error));
                    reader.skip_database();
                    self.report.skipped_databases.push(database);
                },
            }
            self.report.restored = writer.written();
            self.check_cancelled()?;
        }
        self.status(format!("Restored {destination}"), processed, total);
        Ok(())
    }
}

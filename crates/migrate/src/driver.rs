use crate::event::MigrationEvent;
use handheld_device::{DeviceBus, DeviceInfo};
use handheld_syncutils::ScopeSignaler;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, TryRecvError};

/// The user-facing half of a migration: dialogs and status lines.
///
/// Returning `None` from a question abandons the migration.
pub trait Prompter {
    /// Ask for the password of a locked device.
    fn password(&mut self, device: &DeviceInfo, remaining_tries: u32) -> Option<String>;

    /// Ask which of `candidates` to restore into. The list comes from a
    /// fresh probe and never contains `source`.
    fn choose_destination(&mut self, source: &DeviceInfo, candidates: &[DeviceInfo]) -> Option<DeviceInfo>;

    fn status(&mut self, _text: &str, _processed: u64, _total: u64) {}

    fn error(&mut self, _text: &str) {}
}

/// Services [`MigrationEvent`]s on the GUI thread.
///
/// Every request is answered through its [`ScopeSignaler`] before the
/// handler returns, on every path, so the worker is never left waiting on
/// a request the GUI has already dealt with.
pub struct EventDriver<P> {
    bus: Arc<dyn DeviceBus>,
    prompter: P,
}

impl<P: Prompter> EventDriver<P> {
    pub fn new(bus: Arc<dyn DeviceBus>, prompter: P) -> Self {
        Self { bus, prompter }
    }

    pub fn prompter(&self) -> &P {
        &self.prompter
    }

    pub fn into_prompter(self) -> P {
        self.prompter
    }

    /// Handle events until every sender is gone (the job has finished).
    pub fn run(&mut self, events: &Receiver<MigrationEvent>) {
        while let Ok(event) = events.recv() {
            self.handle(event);
        }
    }

    /// Handle whatever events are already queued, without blocking. Meant
    /// for a GUI idle callback. Returns `false` once the job has finished
    /// and the queue is drained.
    pub fn pump_pending(&mut self, events: &Receiver<MigrationEvent>) -> bool {
        loop {
            match events.try_recv() {
                Ok(event) => self.handle(event),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    pub fn handle(&mut self, event: MigrationEvent) {
        match event {
            MigrationEvent::Status { text, processed, total } => self.prompter.status(&text, processed, total),
            MigrationEvent::ErrorMessage { text } => self.prompter.error(&text),
            MigrationEvent::PasswordRequest {
                device,
                remaining_tries,
                reply,
            } => {
                // An empty answer tells the worker to give up.
                let password = self.prompter.password(&device, remaining_tries).unwrap_or_default();
                reply.signal(password);
            },
            MigrationEvent::DestinationPinRequest { source, reply } => self.choose_destination(&source, reply),
        }
    }

    fn choose_destination(&mut self, source: &DeviceInfo, reply: ScopeSignaler<DeviceInfo>) {
        loop {
            let candidates = match self.bus.probe() {
                Ok(devices) => devices.into_iter().filter(|device| device.pin != source.pin).collect::<Vec<_>>(),
                Err(err) => {
                    tracing::error!(error = %&*err, "Probing for destination failed");
                    self.prompter.error(&format!("Could not scan for devices: {}", &*err));
                    return;
                },
            };
            let Some(choice) = self.prompter.choose_destination(source, &candidates) else {
                return;
            };
            if choice.pin == source.pin {
                self.prompter.error("The destination must be a different device than the source.");
                continue;
            }
            reply.signal(choice);
            return;
        }
    }
}

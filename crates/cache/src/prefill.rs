use crate::CacheRegistry;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use handheld_syncutils::CancelToken;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Background thread loading a list of databases into a [`CacheRegistry`].
///
/// Cancellation is checked between databases; a database load in progress
/// always runs to completion. Dropping the job cancels and joins it.
pub struct PrefillJob {
    token: CancelToken,
    thread: Option<JoinHandle<Result<Vec<String>>>>,
}

impl PrefillJob {
    pub fn spawn(registry: Arc<CacheRegistry>, names: Vec<String>, token: CancelToken) -> Result<Self> {
        let worker_token = token.clone();
        let thread = thread::Builder::new()
            .name("cache-prefill".to_string())
            .spawn(move || prefill(&registry, names, &worker_token))
            .or_raise(|| ErrorKind::Spawn)?;
        Ok(Self {
            token,
            thread: Some(thread),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Ask the job to stop, and wait until it has. Returns the databases it
    /// managed to load.
    pub fn abort(mut self) -> Result<Vec<String>> {
        self.token.cancel();
        self.wait()
    }

    /// Wait for the job to finish. Returns the databases it loaded.
    pub fn join(mut self) -> Result<Vec<String>> {
        self.wait()
    }

    fn wait(&mut self) -> Result<Vec<String>> {
        match self.thread.take() {
            Some(thread) => match thread.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            },
            None => Ok(Vec::new()),
        }
    }
}

impl Drop for PrefillJob {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.token.cancel();
            let _ = thread.join();
        }
    }
}

fn prefill(registry: &CacheRegistry, names: Vec<String>, token: &CancelToken) -> Result<Vec<String>> {
    let mut loaded = Vec::with_capacity(names.len());
    for name in names {
        if token.is_cancelled() {
            tracing::info!(loaded = loaded.len(), "Prefill cancelled");
            break;
        }
        match registry.load(&name) {
            Ok(_) => loaded.push(name),
            Err(err) if matches!(&*err, ErrorKind::UnknownDatabase(_)) => {
                tracing::warn!(database = %name, "Not on device, skipping prefill");
            },
            Err(err) => {
                tracing::error!(database = %name, error = %&*err, "Prefill failed");
                return Err(err);
            },
        }
    }
    Ok(loaded)
}

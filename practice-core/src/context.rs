//! # Audio Context
//!
//! One [`AudioContextManager`] owns the single audio graph of a session and is
//! shared by reference (`Arc`) with the synthesizer, the beat scheduler and
//! the pitch detector. No component opens an output of its own.
//!
//! ## Lifecycle
//! ```text
//! Uninitialized --init--> Suspended <--resume/suspend--> Running
//!        \__________________ teardown __________________/--> Closed
//! ```
//! Transitions only move forward, except Suspended <-> Running. The context
//! clock advances only while Running.

use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::graph::{Destination, GraphPort};

/// Drives a [`GraphPort`] on some output: a sound card, or a manual clock.
pub trait AudioBackend: Send {
    /// Opens the output and takes ownership of the graph. Returns the sample
    /// rate the graph will be rendered at. Output must start paused.
    fn open(&mut self, port: GraphPort) -> anyhow::Result<u32>;

    fn play(&mut self) -> anyhow::Result<()>;

    fn pause(&mut self) -> anyhow::Result<()>;

    /// Releases the output. Called at most once.
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Uninitialized,
    Suspended,
    Running,
    Closed,
}

struct Inner {
    state: ContextState,
    backend: Box<dyn AudioBackend>,
    destination: Option<Destination>,
}

pub struct AudioContextManager {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for AudioContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioContextManager")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AudioContextManager {
    pub fn new(backend: impl AudioBackend + 'static) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ContextState::Uninitialized,
                backend: Box::new(backend),
                destination: None,
            }),
        }
    }

    /// Convenience for the common case of sharing the context.
    pub fn shared(backend: impl AudioBackend + 'static) -> Arc<Self> {
        Arc::new(Self::new(backend))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ContextState {
        self.lock().state
    }

    /// Builds the graph and opens the output, leaving the context suspended.
    /// Calling it again is a no-op; a closed context cannot be reopened.
    pub fn init(&self) -> Result<()> {
        let mut inner = self.lock();
        Self::init_locked(&mut inner)
    }

    fn init_locked(inner: &mut Inner) -> Result<()> {
        match inner.state {
            ContextState::Uninitialized => {}
            ContextState::Closed => return Err(Error::ContextClosed),
            ContextState::Suspended | ContextState::Running => return Ok(()),
        }

        let (commands_tx, commands_rx) = crossbeam_channel::unbounded();
        let clock = Arc::new(AtomicU64::new(0));
        let port = GraphPort::new(commands_rx, clock.clone());

        let sample_rate = inner.backend.open(port).map_err(|e| {
            log::error!("Audio output unavailable: {e:#}");
            Error::UnsupportedEnvironment(format!("{e:#}"))
        })?;

        inner.destination = Some(Destination::new(commands_tx, clock, sample_rate));
        inner.state = ContextState::Suspended;
        log::info!("Audio context initialized at {sample_rate} Hz (suspended)");
        Ok(())
    }

    /// Moves the context to Running, initializing it first if needed. A
    /// running context is left alone.
    pub fn resume(&self) -> Result<()> {
        let mut inner = self.lock();
        Self::init_locked(&mut inner)?;
        if inner.state == ContextState::Running {
            return Ok(());
        }
        inner.backend.play().map_err(|e| {
            log::error!("Audio context failed to resume: {e:#}");
            Error::UnsupportedEnvironment(format!("{e:#}"))
        })?;
        inner.state = ContextState::Running;
        log::info!("Audio context running");
        Ok(())
    }

    pub fn suspend(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            ContextState::Running => {
                inner.backend.pause().map_err(|e| {
                    log::error!("Audio context failed to suspend: {e:#}");
                    Error::UnsupportedEnvironment(format!("{e:#}"))
                })?;
                inner.state = ContextState::Suspended;
                log::info!("Audio context suspended");
                Ok(())
            }
            ContextState::Closed => Err(Error::ContextClosed),
            ContextState::Uninitialized | ContextState::Suspended => Ok(()),
        }
    }

    /// Releases the output and the graph. Idempotent.
    pub fn teardown(&self) {
        let mut inner = self.lock();
        if inner.state == ContextState::Closed {
            return;
        }
        if let Some(destination) = inner.destination.take() {
            destination.silence();
        }
        if inner.state != ContextState::Uninitialized {
            inner.backend.close();
        }
        inner.state = ContextState::Closed;
        log::info!("Audio context closed");
    }

    /// The terminal sink, available while the context is Suspended or Running.
    pub fn destination(&self) -> Option<Destination> {
        self.lock().destination.clone()
    }

    /// Context time in seconds, or 0 before initialization.
    pub fn current_time(&self) -> f64 {
        self.lock()
            .destination
            .as_ref()
            .map_or(0.0, Destination::current_time)
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.lock().destination.as_ref().map(Destination::sample_rate)
    }
}

impl Drop for AudioContextManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::OfflineBackend;
    use approx::assert_relative_eq;

    struct NoDevice;

    impl AudioBackend for NoDevice {
        fn open(&mut self, _port: GraphPort) -> anyhow::Result<u32> {
            Err(anyhow::anyhow!("No output device available"))
        }
        fn play(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn pause(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn close(&mut self) {}
    }

    #[test]
    fn starts_uninitialized_and_initializes_suspended() {
        let context = AudioContextManager::new(OfflineBackend::new(48000));
        assert_eq!(context.state(), ContextState::Uninitialized);
        assert!(context.destination().is_none());

        context.init().unwrap();
        assert_eq!(context.state(), ContextState::Suspended);
        assert_eq!(context.sample_rate(), Some(48000));
    }

    #[test]
    fn init_is_idempotent() {
        let backend = OfflineBackend::new(48000);
        let context = AudioContextManager::new(backend.clone());
        context.init().unwrap();
        context.init().unwrap();
        context.resume().unwrap();
        context.resume().unwrap();
        assert_eq!(backend.open_count(), 1);
    }

    #[test]
    fn resume_and_suspend_toggle_between_running_and_suspended() {
        let context = AudioContextManager::new(OfflineBackend::new(48000));
        context.resume().unwrap();
        assert_eq!(context.state(), ContextState::Running);
        context.suspend().unwrap();
        assert_eq!(context.state(), ContextState::Suspended);
        context.resume().unwrap();
        assert_eq!(context.state(), ContextState::Running);
    }

    #[test]
    fn clock_only_advances_while_running() {
        let backend = OfflineBackend::new(1000);
        let context = AudioContextManager::new(backend.clone());
        context.init().unwrap();
        backend.advance(1.0);
        assert_eq!(context.current_time(), 0.0);

        context.resume().unwrap();
        backend.advance(1.0);
        assert_relative_eq!(context.current_time(), 1.0);
    }

    #[test]
    fn teardown_is_idempotent_and_final() {
        let backend = OfflineBackend::new(48000);
        let context = AudioContextManager::new(backend.clone());
        context.resume().unwrap();
        context.teardown();
        context.teardown();
        assert_eq!(context.state(), ContextState::Closed);
        assert!(context.destination().is_none());
        assert!(backend.is_closed());
        assert!(matches!(context.resume(), Err(Error::ContextClosed)));
    }

    #[test]
    fn missing_output_is_reported_as_unsupported() {
        let context = AudioContextManager::new(NoDevice);
        assert!(matches!(context.resume(), Err(Error::UnsupportedEnvironment(_))));
        assert_eq!(context.state(), ContextState::Uninitialized);
        assert!(context.destination().is_none());
    }
}

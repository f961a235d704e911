//! Manually clocked backend.
//!
//! Nothing is sent to a sound card: the caller advances time explicitly and
//! can inspect both the rendered signal and every voice that was scheduled.
//! Used by the test suite and for rendering practice material to a buffer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::context::AudioBackend;
use crate::graph::{GraphPort, Renderer, Voice};

#[derive(Debug, Default)]
struct OfflineState {
    renderer: Option<Renderer>,
    playing: bool,
    closed: bool,
    opens: usize,
}

/// Cloneable handle; every clone controls the same backend.
#[derive(Debug, Clone)]
pub struct OfflineBackend {
    sample_rate: u32,
    state: Arc<Mutex<OfflineState>>,
}

impl OfflineBackend {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            state: Arc::new(Mutex::new(OfflineState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OfflineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Renders and returns `frames` mono samples. Returns silence without
    /// moving the clock while the output is paused or not open.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut buffer = vec![0.0; frames];
        let mut state = self.lock();
        if !state.playing {
            return buffer;
        }
        if let Some(renderer) = state.renderer.as_mut() {
            renderer.render(&mut buffer, 1);
        }
        buffer
    }

    /// Advances the clock by `seconds`, discarding the output.
    pub fn advance(&self, seconds: f64) {
        let frames = (seconds * self.sample_rate as f64).round() as usize;
        self.render(frames);
    }

    /// Every voice the graph has received so far, in scheduling order.
    pub fn scheduled(&self) -> Vec<Voice> {
        let mut state = self.lock();
        match state.renderer.as_mut() {
            Some(renderer) => {
                renderer.drain_commands();
                renderer.history().to_vec()
            }
            None => Vec::new(),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.lock().playing
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn open_count(&self) -> usize {
        self.lock().opens
    }
}

impl AudioBackend for OfflineBackend {
    fn open(&mut self, port: GraphPort) -> anyhow::Result<u32> {
        let mut state = self.lock();
        state.renderer = Some(Renderer::new(port, self.sample_rate).with_history());
        state.opens += 1;
        Ok(self.sample_rate)
    }

    fn play(&mut self) -> anyhow::Result<()> {
        self.lock().playing = true;
        Ok(())
    }

    fn pause(&mut self) -> anyhow::Result<()> {
        self.lock().playing = false;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.lock();
        state.playing = false;
        state.closed = true;
        state.renderer = None;
    }
}

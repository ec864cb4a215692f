//! Offscreen rendering backed by a shared [`ContextPool`].
//!
//! Each refresh leases a context for the duration of the render call only, so many
//! drivers running on their own threads can share a small number of contexts.

use crate::context_pool::{ContextFactory, ContextPool};
use crate::log::*;
use robosim_traits::{Graphics, SimError, SimResult, StateSnapshot};
use std::collections::VecDeque;

/// Frame steps kept while recording, older ones are dropped first.
pub const DEFAULT_RECORD_LIMIT: usize = 4096;

pub struct OffscreenGraphics<F, R>
where
    F: ContextFactory,
    R: FnMut(&mut F::Context, &StateSnapshot) -> SimResult<()>,
{
    pool: ContextPool<F>,
    render: R,
    frames: u64,
    recorded: VecDeque<u64>,
    record_limit: usize,
    recording: bool,
    max_frames: Option<u64>,
    closed: bool,
}

impl<F, R> OffscreenGraphics<F, R>
where
    F: ContextFactory,
    R: FnMut(&mut F::Context, &StateSnapshot) -> SimResult<()>,
{
    pub fn new(pool: ContextPool<F>, render: R) -> Self {
        OffscreenGraphics {
            pool,
            render,
            frames: 0,
            recorded: VecDeque::new(),
            record_limit: DEFAULT_RECORD_LIMIT,
            recording: false,
            max_frames: None,
            closed: false,
        }
    }

    /// Reports itself closed once `frames` frames were rendered.
    pub fn with_max_frames(mut self, frames: u64) -> Self {
        self.max_frames = Some(frames);
        self
    }

    /// Keeps at most the `limit` most recent recorded frame steps.
    pub fn with_record_limit(mut self, limit: usize) -> Self {
        self.record_limit = limit;
        self.recorded.truncate(limit);
        self
    }

    /// Keeps the step index of every rendered frame, as a video recorder would.
    pub fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Steps of the frames captured while recording.
    pub fn recorded_steps(&self) -> Vec<u64> {
        self.recorded.iter().copied().collect()
    }

    /// Hands over the recorded frame steps and starts a new recording buffer.
    pub fn take_recorded_steps(&mut self) -> Vec<u64> {
        self.recorded.drain(..).collect()
    }

    pub fn pool(&self) -> &ContextPool<F> {
        &self.pool
    }
}

impl<F, R> Graphics for OffscreenGraphics<F, R>
where
    F: ContextFactory,
    R: FnMut(&mut F::Context, &StateSnapshot) -> SimResult<()>,
{
    fn refresh(&mut self, state: &StateSnapshot) -> SimResult<()> {
        if self.closed {
            return Ok(());
        }
        let mut context = self.pool.acquire()?;
        let rendered = (self.render)(&mut context, state);
        self.pool.release(context)?;
        rendered.map_err(|e| {
            error!("offscreen render failed at step {}: {}", state.step, e);
            SimError::graphics(format!("render failed at step {}", state.step)).with_cause(e)
        })?;
        self.frames += 1;
        if self.max_frames.is_some_and(|max| self.frames >= max) {
            debug!("offscreen graphics closing after {} frames", self.frames);
            self.closed = true;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn record_frame(&mut self, state: &StateSnapshot) -> SimResult<()> {
        if self.recording && self.record_limit > 0 {
            if self.recorded.len() == self.record_limit {
                self.recorded.pop_front();
            }
            self.recorded.push_back(state.step);
        }
        Ok(())
    }
}

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{SessionStore, ViewerConfig, ViewerError, ViewerEvent};

/// One page render handed to the drawing side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderJob {
    /// 1-based page number.
    pub page: usize,
    pub scale: f32,
    /// Document generation the job was issued for.
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderState {
    Idle,
    Rendering(RenderJob),
}

/// Serializes page renders against a single drawing surface.
///
/// At most one job is in flight. Requests that arrive while busy overwrite a
/// single pending slot, so a burst of requests collapses to the latest one.
pub struct RenderCoordinator {
    page_count: usize,
    current_page: usize,
    scale: f32,
    zoom_step: f32,
    min_scale: f32,
    state: RenderState,
    pending: Option<usize>,
    generation: u64,
    store: SessionStore,
    events: Arc<Mutex<Vec<ViewerEvent>>>,
}

impl RenderCoordinator {
    pub fn new(
        page_count: usize,
        start_page: usize,
        config: &ViewerConfig,
        store: SessionStore,
        events: Arc<Mutex<Vec<ViewerEvent>>>,
    ) -> Self {
        Self {
            page_count,
            current_page: clamp_page(start_page, page_count),
            scale: config.initial_scale,
            zoom_step: config.zoom_step,
            min_scale: config.min_scale,
            state: RenderState::Idle,
            pending: None,
            generation: 0,
            store,
            events,
        }
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn pending_page(&self) -> Option<usize> {
        self.pending
    }

    pub fn is_rendering(&self) -> bool {
        matches!(self.state, RenderState::Rendering(_))
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Renders `page` now, or remembers it as the pending page when a render
    /// is already running. The caller keeps `page` inside `1..=page_count`.
    pub fn request_page(&mut self, page: usize) -> Option<RenderJob> {
        if self.is_rendering() {
            if let Some(previous) = self.pending.replace(page) {
                debug!(previous, page, "pending render superseded");
            }
            return None;
        }
        Some(self.start_render(page))
    }

    /// Called once the drawing side has finished `job`.
    pub fn on_render_complete(&mut self, job: RenderJob) -> Option<RenderJob> {
        if !self.finish(job) {
            return None;
        }
        if job.generation == self.generation {
            if let Err(err) = self.store.save_page(job.page) {
                warn!(?err, page = job.page, "failed to persist page number");
            }
        }
        self.start_pending()
    }

    /// Called when rendering `job` failed. The surface is released so later
    /// requests still go through. Failures of jobs issued for a previous
    /// document are only logged.
    pub fn on_render_failed(
        &mut self,
        job: RenderJob,
        error: anyhow::Error,
    ) -> Option<RenderJob> {
        if !self.finish(job) {
            return None;
        }
        let error = ViewerError::Render {
            page: job.page,
            source: error,
        };
        warn!(?error, page = job.page, "render failed");
        if job.generation == self.generation {
            self.events.lock().push(ViewerEvent::RenderFailed {
                page: job.page,
                message: error.user_message(),
            });
        }
        self.start_pending()
    }

    pub fn next_page(&mut self) -> Option<RenderJob> {
        if self.current_page >= self.page_count {
            return None;
        }
        self.current_page += 1;
        self.request_page(self.current_page)
    }

    pub fn previous_page(&mut self) -> Option<RenderJob> {
        if self.current_page <= 1 {
            return None;
        }
        self.current_page -= 1;
        self.request_page(self.current_page)
    }

    pub fn zoom_in(&mut self) -> Option<RenderJob> {
        self.scale += self.zoom_step;
        self.request_page(self.current_page)
    }

    pub fn zoom_out(&mut self) -> Option<RenderJob> {
        if self.scale <= self.min_scale {
            return None;
        }
        self.scale = (self.scale - self.zoom_step).max(self.min_scale);
        self.request_page(self.current_page)
    }

    /// Points the coordinator at a freshly opened document. A render that is
    /// still running for the old document is allowed to finish first.
    pub fn reset(&mut self, page_count: usize, start_page: usize) -> Option<RenderJob> {
        self.generation += 1;
        self.page_count = page_count;
        self.current_page = clamp_page(start_page, page_count);
        self.pending = None;
        self.request_page(self.current_page)
    }

    fn start_render(&mut self, page: usize) -> RenderJob {
        let job = RenderJob {
            page,
            scale: self.scale,
            generation: self.generation,
        };
        debug!(page, scale = job.scale, "render started");
        self.state = RenderState::Rendering(job);
        self.events.lock().push(ViewerEvent::PageNumberChanged(page));
        job
    }

    fn finish(&mut self, job: RenderJob) -> bool {
        match self.state {
            RenderState::Rendering(active) if active == job => {
                self.state = RenderState::Idle;
                true
            }
            _ => {
                warn!(
                    ?job,
                    state = ?self.state,
                    "ignoring completion for a job that is not in flight"
                );
                false
            }
        }
    }

    fn start_pending(&mut self) -> Option<RenderJob> {
        let page = self.pending.take()?;
        Some(self.start_render(page))
    }
}

pub(crate) fn clamp_page(page: usize, page_count: usize) -> usize {
    page.clamp(1, page_count.max(1))
}

use std::fs;
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use crate::{
    DocumentHandle, DocumentOpener, FileSelection, RenderCoordinator, RenderJob, SessionStore,
    ViewerConfig, ViewerError, ViewerEvent,
};

struct LoadedDocument {
    name: Option<String>,
    handle: Arc<dyn DocumentHandle>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewerStatus {
    pub file_name: Option<String>,
    pub page: usize,
    pub page_count: usize,
    pub scale: f32,
    pub rendering: bool,
}

/// Ties the session store, the open document and the render coordinator
/// together. All methods run on the UI loop.
pub struct Viewer {
    config: ViewerConfig,
    store: SessionStore,
    document: Option<LoadedDocument>,
    coordinator: Option<RenderCoordinator>,
    events: Arc<Mutex<Vec<ViewerEvent>>>,
}

impl Viewer {
    pub fn new(config: ViewerConfig, store: SessionStore) -> Self {
        Self {
            config,
            store,
            document: None,
            coordinator: None,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Reopens the document saved by a previous run, if any.
    #[instrument(skip_all)]
    pub async fn restore<O>(&mut self, opener: &O) -> Result<Option<RenderJob>, ViewerError>
    where
        O: DocumentOpener + ?Sized,
    {
        let Some(bytes) = self.store.document_bytes() else {
            return Ok(None);
        };
        info!(len = bytes.len(), "restoring saved document");
        self.open_bytes(opener, bytes, None, false).await
    }

    #[instrument(skip(self, opener), fields(path = %selection.path().display()))]
    pub async fn select_file<O>(
        &mut self,
        opener: &O,
        selection: FileSelection,
    ) -> Result<Option<RenderJob>, ViewerError>
    where
        O: DocumentOpener + ?Sized,
    {
        let bytes = fs::read(selection.path()).map_err(|source| ViewerError::Read {
            path: selection.path().to_path_buf(),
            source,
        })?;
        self.open_bytes(opener, bytes, Some(selection.file_name()), true)
            .await
    }

    pub async fn load_bytes<O>(
        &mut self,
        opener: &O,
        bytes: Vec<u8>,
        name: Option<String>,
    ) -> Result<Option<RenderJob>, ViewerError>
    where
        O: DocumentOpener + ?Sized,
    {
        self.open_bytes(opener, bytes, name, true).await
    }

    async fn open_bytes<O>(
        &mut self,
        opener: &O,
        bytes: Vec<u8>,
        name: Option<String>,
        persist: bool,
    ) -> Result<Option<RenderJob>, ViewerError>
    where
        O: DocumentOpener + ?Sized,
    {
        let to_persist = persist.then(|| bytes.clone());
        let handle = opener.open(bytes).await.map_err(ViewerError::Open)?;
        let page_count = handle.page_count();
        if page_count == 0 {
            return Err(ViewerError::Open(anyhow!("document has no pages")));
        }

        if let Some(bytes) = to_persist {
            if let Err(err) = self.store.save_document(&bytes) {
                warn!(?err, "failed to persist document bytes");
            }
        }

        let start_page = self.store.last_page();
        info!(page_count, start_page, "document opened");
        self.document = Some(LoadedDocument { name, handle });
        self.events
            .lock()
            .push(ViewerEvent::DocumentLoaded { page_count });

        let job = match self.coordinator.as_mut() {
            Some(coordinator) => coordinator.reset(page_count, start_page),
            None => {
                let mut coordinator = RenderCoordinator::new(
                    page_count,
                    start_page,
                    &self.config,
                    self.store.clone(),
                    Arc::clone(&self.events),
                );
                let job = coordinator.request_page(coordinator.current_page());
                self.coordinator = Some(coordinator);
                job
            }
        };
        Ok(job)
    }

    pub fn document(&self) -> Option<Arc<dyn DocumentHandle>> {
        self.document.as_ref().map(|doc| Arc::clone(&doc.handle))
    }

    pub fn coordinator(&self) -> Option<&RenderCoordinator> {
        self.coordinator.as_ref()
    }

    pub fn next_page(&mut self) -> Option<RenderJob> {
        self.coordinator.as_mut()?.next_page()
    }

    pub fn previous_page(&mut self) -> Option<RenderJob> {
        self.coordinator.as_mut()?.previous_page()
    }

    pub fn zoom_in(&mut self) -> Option<RenderJob> {
        self.coordinator.as_mut()?.zoom_in()
    }

    pub fn zoom_out(&mut self) -> Option<RenderJob> {
        self.coordinator.as_mut()?.zoom_out()
    }

    pub fn complete_render(&mut self, job: RenderJob) -> Option<RenderJob> {
        self.coordinator.as_mut()?.on_render_complete(job)
    }

    pub fn fail_render(&mut self, job: RenderJob, error: anyhow::Error) -> Option<RenderJob> {
        self.coordinator.as_mut()?.on_render_failed(job, error)
    }

    pub fn status(&self) -> Option<ViewerStatus> {
        let coordinator = self.coordinator.as_ref()?;
        Some(ViewerStatus {
            file_name: self.document.as_ref().and_then(|doc| doc.name.clone()),
            page: coordinator.current_page(),
            page_count: coordinator.page_count(),
            scale: coordinator.scale(),
            rendering: coordinator.is_rendering(),
        })
    }

    pub fn drain_events(&self) -> Vec<ViewerEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

use std::fs;
use std::io::{self, Stdout, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event;
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use pdfview_core::{
    DocumentOpener, FileKeyValueStore, FileSelection, KeyValueStore, RenderImage, RenderJob,
    SessionStore, Viewer, ViewerConfig, ViewerEvent,
};
use pdfview_render::PdfiumOpener;
use pdfview_tty::{write_status_line, DrawParams, EventMapper, KittyRenderer, UiEvent};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

mod layout;

use layout::{combine_status, crop_render_image, format_status, place_image, TerminalGeometry};

#[derive(Debug, Parser)]
#[command(
    name = "pdfview",
    version,
    about = "Terminal PDF viewer that remembers the last document and page"
)]
struct Args {
    /// PDF file to open; without it the previous session is restored
    file: Option<PathBuf>,

    /// Config file (defaults to config.toml in the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the persisted session
    #[arg(long = "state-dir")]
    state_dir: Option<PathBuf>,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

/// Result of one background rasterization.
struct RenderOutcome {
    job: RenderJob,
    result: Result<RenderImage>,
}

struct Screen<W: Write> {
    renderer: KittyRenderer<W>,
    mapper: EventMapper,
    notice: Option<String>,
    last_image: Option<RenderImage>,
    /// Page of the most recently started render; the status line shows it
    /// instead of the latest requested page.
    shown_page: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "pdfview", "pdfview")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("config.toml"));
    let config = ViewerConfig::load(&config_path)?;
    let state_dir = args
        .state_dir
        .clone()
        .unwrap_or_else(|| project_dirs.data_local_dir().join("state"));
    let kv: Arc<dyn KeyValueStore> = Arc::new(FileKeyValueStore::new(state_dir)?);
    let mut viewer = Viewer::new(config, SessionStore::new(kv));
    let opener = PdfiumOpener::new()?;

    let mut screen = Screen {
        renderer: KittyRenderer::new(io::stdout()),
        mapper: EventMapper::new(),
        notice: None,
        last_image: None,
        shown_page: None,
    };
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut initial = None;
    if let Some(path) = args.file {
        initial = open_path(&mut viewer, &opener, path, &mut screen).await;
    }
    if viewer.document().is_none() {
        match viewer.restore(&opener).await {
            Ok(job) => initial = job,
            Err(err) => {
                warn!(?err, "failed to restore previous session");
                screen.notice = Some(err.user_message());
            }
        }
    }

    let _raw = RawModeGuard::new()?;
    {
        let mut stdout = io::stdout();
        crossterm::execute!(stdout, cursor::Hide)?;
    }
    screen.renderer.clear_all()?;
    dispatch(&viewer, initial, &tx);
    sync_events(&viewer, &mut screen)?;
    screen.draw_status(&viewer)?;

    run(&mut viewer, &opener, &mut screen, &tx, &mut rx).await?;

    screen.renderer.delete_image()?;
    screen.renderer.clear_all()?;
    Ok(())
}

async fn run<O: DocumentOpener>(
    viewer: &mut Viewer,
    opener: &O,
    screen: &mut Screen<Stdout>,
    tx: &UnboundedSender<RenderOutcome>,
    rx: &mut UnboundedReceiver<RenderOutcome>,
) -> Result<()> {
    loop {
        while let Ok(outcome) = rx.try_recv() {
            let next = finish_render(viewer, outcome, |image| screen.show_page(image));
            dispatch(viewer, next, tx);
            sync_events(viewer, screen)?;
            screen.draw_status(viewer)?;
        }

        if !event::poll(Duration::from_millis(30))? {
            continue;
        }

        let job = match screen.mapper.map_event(event::read()?) {
            UiEvent::NextPage => viewer.next_page(),
            UiEvent::PreviousPage => viewer.previous_page(),
            UiEvent::ZoomIn => viewer.zoom_in(),
            UiEvent::ZoomOut => viewer.zoom_out(),
            UiEvent::OpenFile { path } => open_path(viewer, opener, path, screen).await,
            UiEvent::Resize => {
                screen.redraw_last()?;
                None
            }
            UiEvent::BeginOpen => {
                screen.notice = None;
                None
            }
            UiEvent::PromptChanged { .. } | UiEvent::PromptCancel | UiEvent::None => None,
            UiEvent::Quit => return Ok(()),
        };
        dispatch(viewer, job, tx);
        sync_events(viewer, screen)?;
        screen.draw_status(viewer)?;
    }
}

/// Gates, reads and opens a user-chosen file. Failures end up on the status
/// line and leave the current document in place.
async fn open_path<O, W>(
    viewer: &mut Viewer,
    opener: &O,
    path: PathBuf,
    screen: &mut Screen<W>,
) -> Option<RenderJob>
where
    O: DocumentOpener + ?Sized,
    W: Write,
{
    let result = match FileSelection::new(path) {
        Ok(selection) => viewer.select_file(opener, selection).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(job) => job,
        Err(err) => {
            warn!(?err, "file selection rejected");
            screen.notice = Some(err.user_message());
            None
        }
    }
}

/// Rasterizes `job` on the blocking pool. Every job reports back exactly
/// once, a panicking worker included, so the coordinator is always released.
fn dispatch(viewer: &Viewer, job: Option<RenderJob>, tx: &UnboundedSender<RenderOutcome>) {
    let Some(job) = job else {
        return;
    };
    let Some(document) = viewer.document() else {
        warn!(?job, "render requested without an open document");
        return;
    };
    let tx = tx.clone();
    let worker = tokio::task::spawn_blocking(move || document.render_page(job.page, job.scale));
    tokio::spawn(async move {
        let result = worker
            .await
            .unwrap_or_else(|err| Err(anyhow!("render worker stopped: {err}")));
        if tx.send(RenderOutcome { job, result }).is_err() {
            debug!(page = job.page, "render finished after shutdown");
        }
    });
}

/// Hands a finished render to `draw` and reports the result to the viewer.
/// Jobs issued for a previous document are not drawn.
fn finish_render<F>(viewer: &mut Viewer, outcome: RenderOutcome, draw: F) -> Option<RenderJob>
where
    F: FnOnce(RenderImage) -> Result<()>,
{
    let RenderOutcome { job, result } = outcome;
    let current = viewer.coordinator().map(|c| c.generation()) == Some(job.generation);
    let drawn = result.and_then(|image| {
        if current {
            draw(image)
        } else {
            debug!(?job, "skipping draw for a previous document");
            Ok(())
        }
    });
    match drawn {
        Ok(()) => viewer.complete_render(job),
        Err(err) => viewer.fail_render(job, err),
    }
}

fn sync_events<W: Write>(viewer: &Viewer, screen: &mut Screen<W>) -> Result<()> {
    for event in viewer.drain_events() {
        match event {
            ViewerEvent::DocumentLoaded { page_count } => {
                info!(page_count, "showing new document");
                screen.notice = None;
                screen.last_image = None;
                screen.shown_page = None;
                screen.renderer.delete_image()?;
                screen.renderer.clear_all()?;
            }
            ViewerEvent::PageNumberChanged(page) => screen.shown_page = Some(page),
            ViewerEvent::RenderFailed { message, .. } => screen.notice = Some(message),
        }
    }
    Ok(())
}

impl<W: Write> Screen<W> {
    fn geometry() -> Result<TerminalGeometry> {
        let window = terminal::window_size()?;
        Ok(TerminalGeometry {
            columns: u32::from(window.columns).max(1),
            rows: u32::from(window.rows).max(1),
            pixel_width: u32::from(window.width),
            pixel_height: u32::from(window.height),
        })
    }

    fn draw_page(&mut self, image: &RenderImage) -> Result<()> {
        let geometry = Self::geometry()?;
        let placement = place_image(image.width, image.height, &geometry);
        let cropped = placement.crop.map(|region| crop_render_image(image, region));
        let display = cropped.as_ref().unwrap_or(image);

        self.renderer.begin_sync_update()?;
        self.renderer.clear_all()?;
        {
            let writer = self.renderer.writer();
            crossterm::execute!(
                writer,
                cursor::MoveTo(placement.start_col as u16, placement.start_row as u16)
            )?;
        }
        self.renderer
            .draw(display, DrawParams::clamped(placement.columns, placement.rows))
            .context("failed to draw page")?;
        self.renderer.end_sync_update()?;
        Ok(())
    }

    fn show_page(&mut self, image: RenderImage) -> Result<()> {
        self.draw_page(&image)?;
        self.last_image = Some(image);
        Ok(())
    }

    fn redraw_last(&mut self) -> Result<()> {
        match self.last_image.take() {
            Some(image) => {
                let drawn = self.draw_page(&image);
                self.last_image = Some(image);
                drawn
            }
            None => self.renderer.clear_all(),
        }
    }

    fn status_text(&self, viewer: &Viewer) -> String {
        let mut status = viewer.status();
        if let (Some(status), Some(page)) = (status.as_mut(), self.shown_page) {
            status.page = page;
        }
        let extra = self.mapper.pending_input().or_else(|| self.notice.clone());
        combine_status(format_status(status.as_ref()), extra.as_deref())
    }

    fn draw_status(&mut self, viewer: &Viewer) -> Result<()> {
        let status = self.status_text(viewer);

        let geometry = Self::geometry()?;
        let status_row = geometry.rows.saturating_sub(1);
        let writer = self.renderer.writer();
        crossterm::execute!(
            writer,
            cursor::MoveTo(0, status_row as u16),
            Clear(ClearType::CurrentLine)
        )?;
        let width = geometry.columns as usize;
        let clipped: String = status.chars().take(width.saturating_sub(1)).collect();
        write_status_line(writer, &clipped)?;
        Ok(())
    }
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "pdfview.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // The terminal shows page images, so logs only go to the file.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    use pdfview_core::{DocumentHandle, MemoryKeyValueStore, Viewport};

    /// Renders 1x1 pages and panics on `panic_on`.
    struct FakeDocument {
        page_count: usize,
        panic_on: Option<usize>,
    }

    impl DocumentHandle for FakeDocument {
        fn page_count(&self) -> usize {
            self.page_count
        }

        fn viewport(&self, _page: usize, _scale: f32) -> Result<Viewport> {
            Ok(Viewport {
                width: 1,
                height: 1,
            })
        }

        fn render_page(&self, page: usize, _scale: f32) -> Result<RenderImage> {
            if self.panic_on == Some(page) {
                panic!("rasterizer crashed on page {page}");
            }
            Ok(page_image())
        }
    }

    /// First byte is the page count, an optional second byte the page whose
    /// render panics.
    struct FakeOpener;

    #[async_trait::async_trait]
    impl DocumentOpener for FakeOpener {
        async fn open(&self, bytes: Vec<u8>) -> Result<Arc<dyn DocumentHandle>> {
            let page_count = *bytes.first().ok_or_else(|| anyhow!("empty document"))? as usize;
            let panic_on = bytes.get(1).map(|page| *page as usize);
            Ok(Arc::new(FakeDocument {
                page_count,
                panic_on,
            }))
        }
    }

    fn page_image() -> RenderImage {
        RenderImage {
            width: 1,
            height: 1,
            pixels: vec![0, 0, 0, 255],
        }
    }

    fn new_viewer() -> Viewer {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        Viewer::new(ViewerConfig::default(), SessionStore::new(kv))
    }

    fn test_screen() -> Screen<Vec<u8>> {
        Screen {
            renderer: KittyRenderer::new(Vec::new()),
            mapper: EventMapper::new(),
            notice: None,
            last_image: None,
            shown_page: None,
        }
    }

    fn has_render_failure(events: &[ViewerEvent]) -> bool {
        events
            .iter()
            .any(|event| matches!(event, ViewerEvent::RenderFailed { .. }))
    }

    #[tokio::test]
    async fn panicking_worker_releases_coordinator() {
        let mut viewer = new_viewer();
        let job = viewer
            .load_bytes(&FakeOpener, vec![3, 1], None)
            .await
            .unwrap();
        viewer.drain_events();
        let (tx, mut rx) = mpsc::unbounded_channel();

        dispatch(&viewer, job, &tx);
        let outcome = rx.recv().await.unwrap();
        assert!(outcome.result.is_err());

        let next = finish_render(&mut viewer, outcome, |_| panic!("nothing to draw"));
        assert!(next.is_none());
        assert!(!viewer.coordinator().unwrap().is_rendering());
        assert!(has_render_failure(&viewer.drain_events()));

        let retry = viewer.next_page().unwrap();
        assert_eq!(retry.page, 2);
        dispatch(&viewer, Some(retry), &tx);
        let outcome = rx.recv().await.unwrap();
        assert!(outcome.result.is_ok());
        assert!(finish_render(&mut viewer, outcome, |_| Ok(())).is_none());
        assert_eq!(viewer.status().unwrap().page, 2);
    }

    #[tokio::test]
    async fn draw_error_is_reported_as_render_failure() {
        let mut viewer = new_viewer();
        let job = viewer
            .load_bytes(&FakeOpener, vec![4], None)
            .await
            .unwrap()
            .unwrap();
        viewer.drain_events();

        let outcome = RenderOutcome {
            job,
            result: Ok(page_image()),
        };
        let next = finish_render(&mut viewer, outcome, |_| Err(anyhow!("terminal closed")));
        assert!(next.is_none());
        assert!(!viewer.coordinator().unwrap().is_rendering());
        match viewer.drain_events().as_slice() {
            [ViewerEvent::RenderFailed { page: 1, message }] => {
                assert!(message.contains("terminal closed"));
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn render_for_previous_document_is_not_drawn() {
        let mut viewer = new_viewer();
        let old = viewer
            .load_bytes(&FakeOpener, vec![5], None)
            .await
            .unwrap()
            .unwrap();
        assert!(viewer
            .load_bytes(&FakeOpener, vec![2], None)
            .await
            .unwrap()
            .is_none());

        let outcome = RenderOutcome {
            job: old,
            result: Ok(page_image()),
        };
        let next = finish_render(&mut viewer, outcome, |_| panic!("drew a stale page"));
        let next = next.unwrap();
        assert_eq!(next.page, 1);
        assert_eq!(next.generation, viewer.coordinator().unwrap().generation());
    }

    #[tokio::test]
    async fn failure_for_previous_document_keeps_status_clean() {
        let mut viewer = new_viewer();
        let mut screen = test_screen();
        let old = viewer
            .load_bytes(&FakeOpener, vec![5], None)
            .await
            .unwrap()
            .unwrap();
        viewer
            .load_bytes(&FakeOpener, vec![2], Some("new.pdf".into()))
            .await
            .unwrap();
        sync_events(&viewer, &mut screen).unwrap();

        let outcome = RenderOutcome {
            job: old,
            result: Err(anyhow!("document closed")),
        };
        assert!(finish_render(&mut viewer, outcome, |_| Ok(())).is_some());
        sync_events(&viewer, &mut screen).unwrap();
        assert_eq!(screen.notice, None);
    }

    #[tokio::test]
    async fn status_shows_page_being_rendered() {
        let mut viewer = new_viewer();
        let mut screen = test_screen();
        let first = viewer
            .load_bytes(&FakeOpener, vec![5], Some("doc.pdf".into()))
            .await
            .unwrap()
            .unwrap();
        assert!(viewer.next_page().is_none());
        assert!(viewer.next_page().is_none());
        sync_events(&viewer, &mut screen).unwrap();
        assert!(screen.status_text(&viewer).contains("page 1/5"));

        let outcome = RenderOutcome {
            job: first,
            result: Ok(page_image()),
        };
        let next = finish_render(&mut viewer, outcome, |_| Ok(())).unwrap();
        assert_eq!(next.page, 3);
        sync_events(&viewer, &mut screen).unwrap();
        assert!(screen.status_text(&viewer).contains("page 3/5"));
    }
}

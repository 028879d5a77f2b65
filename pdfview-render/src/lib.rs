use std::convert::TryFrom;
use std::env;
use std::mem;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use pdfview_core::{DocumentHandle, DocumentOpener, RenderImage, Viewport};
use tracing::{debug, instrument, warn};

/// Environment variable naming an explicit Pdfium shared library.
pub const PDFIUM_LIBRARY_ENV: &str = "PDFVIEW_PDFIUM_LIBRARY_PATH";

pub struct PdfiumOpener {
    pdfium: Arc<Pdfium>,
}

impl PdfiumOpener {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentOpener for PdfiumOpener {
    #[instrument(skip_all, fields(len = bytes.len()))]
    async fn open(&self, bytes: Vec<u8>) -> Result<Arc<dyn DocumentHandle>> {
        let document = self
            .pdfium
            .load_pdf_from_byte_vec(bytes, None)
            .context("failed to parse PDF data")?;
        // SAFETY: the document borrows the bindings owned by `self.pdfium`. It is stored in
        // `PdfiumDocument::document`, which is declared before `pdfium` and therefore dropped
        // first, while the cloned Arc keeps the bindings alive.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        let page_count = usize::try_from(document.pages().len()).unwrap_or_default();
        debug!(page_count, "pdfium document loaded");
        Ok(Arc::new(PdfiumDocument {
            document: Mutex::new(document),
            cache: Mutex::new(None),
            page_count,
            pdfium: Arc::clone(&self.pdfium),
        }))
    }
}

struct PdfiumDocument {
    document: Mutex<PdfDocument<'static>>,
    cache: Mutex<Option<RenderCacheEntry>>,
    page_count: usize,
    #[allow(dead_code)]
    pdfium: Arc<Pdfium>,
}

struct RenderCacheEntry {
    page: usize,
    scale: f32,
    image: RenderImage,
}

impl PdfiumDocument {
    fn render_internal(&self, page: usize, viewport: Viewport) -> Result<RenderImage> {
        let document = self.document.lock();
        let pdf_page = document
            .pages()
            .get(page_index(page, self.page_count)?)
            .with_context(|| format!("page {} out of range", page))?;

        let config = PdfRenderConfig::new().set_target_size(
            Pixels::try_from(viewport.width).unwrap_or(Pixels::MAX),
            Pixels::try_from(viewport.height).unwrap_or(Pixels::MAX),
        );
        let bitmap = pdf_page
            .render_with_config(&config)
            .with_context(|| format!("failed to render page {}", page))?;
        let image = bitmap.as_image().to_rgba8();

        Ok(RenderImage {
            width: image.width(),
            height: image.height(),
            pixels: image.into_raw(),
        })
    }
}

impl DocumentHandle for PdfiumDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn viewport(&self, page: usize, scale: f32) -> Result<Viewport> {
        let document = self.document.lock();
        let pdf_page = document
            .pages()
            .get(page_index(page, self.page_count)?)
            .with_context(|| format!("page {} out of range", page))?;
        Ok(page_viewport(
            pdf_page.width().value,
            pdf_page.height().value,
            scale,
        ))
    }

    #[instrument(skip(self))]
    fn render_page(&self, page: usize, scale: f32) -> Result<RenderImage> {
        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.as_ref() {
                if entry.page == page && (entry.scale - scale).abs() < f32::EPSILON {
                    return Ok(entry.image.clone());
                }
            }
        }

        let viewport = self.viewport(page, scale)?;
        let image = self.render_internal(page, viewport)?;

        let mut cache = self.cache.lock();
        *cache = Some(RenderCacheEntry {
            page,
            scale,
            image: image.clone(),
        });

        Ok(image)
    }
}

/// Converts a 1-based page number into Pdfium's 0-based index.
fn page_index(page: usize, page_count: usize) -> Result<PdfPageIndex> {
    if page == 0 || page > page_count {
        return Err(anyhow!("page {} out of range 1..={}", page, page_count));
    }
    PdfPageIndex::try_from(page - 1)
        .map_err(|_| anyhow!("page {} is out of supported range", page))
}

/// Page size in points scaled to pixels, never smaller than one pixel.
fn page_viewport(width_points: f32, height_points: f32, scale: f32) -> Viewport {
    let to_pixels = |points: f32| {
        let pixels = (points * scale).round();
        if !pixels.is_finite() || pixels < 1.0 {
            1
        } else if pixels > u32::MAX as f32 {
            u32::MAX
        } else {
            pixels as u32
        }
    };
    Viewport {
        width: to_pixels(width_points),
        height: to_pixels(height_points),
    }
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    match env::var(PDFIUM_LIBRARY_ENV) {
        Ok(path) if !path.is_empty() => match Pdfium::bind_to_library(&path) {
            Ok(bindings) => Some(Pdfium::new(bindings)),
            Err(err) => {
                warn!(
                    "failed to load Pdfium from {}={}: {}",
                    PDFIUM_LIBRARY_ENV, path, err
                );
                None
            }
        },
        _ => None,
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");

    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("{}: {}", cwd_path.display(), err));
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; install it or set {} ({})",
                PDFIUM_LIBRARY_ENV,
                errors.join(", ")
            ))
        }
    }
}

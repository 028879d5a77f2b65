use pdfview_core::{RenderImage, ViewerStatus};

/// Terminal size in cells and, when the terminal reports it, in pixels.
#[derive(Debug, Clone, Copy)]
pub struct TerminalGeometry {
    pub columns: u32,
    pub rows: u32,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

impl TerminalGeometry {
    /// Rows left for the page once the status line is reserved.
    pub fn image_rows(&self) -> u32 {
        self.rows.saturating_sub(1).max(1)
    }

    fn cell_size(&self) -> Option<(f32, f32)> {
        if self.pixel_width == 0 || self.pixel_height == 0 || self.columns == 0 || self.rows == 0 {
            return None;
        }
        Some((
            self.pixel_width as f32 / self.columns as f32,
            self.pixel_height as f32 / self.rows as f32,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub crop: Option<CropRegion>,
    pub start_col: u32,
    pub start_row: u32,
    pub columns: u32,
    pub rows: u32,
}

/// Decides where a rendered page goes. With known cell pixel sizes the page
/// is shown at its rendered size, cropped to the visible area (top of the
/// page, horizontally centred) when it does not fit. Otherwise it is fitted
/// into the available cells keeping its aspect ratio.
pub fn place_image(width: u32, height: u32, geometry: &TerminalGeometry) -> Placement {
    let available_cols = geometry.columns.max(1);
    let available_rows = geometry.image_rows();

    let (crop, mut columns, mut rows) = match geometry.cell_size() {
        Some((cell_width, cell_height)) if width > 0 && height > 0 => {
            let visible_width = ((available_cols as f32 * cell_width).floor() as u32).max(1);
            let visible_height = ((available_rows as f32 * cell_height).floor() as u32).max(1);
            let shown_width = width.min(visible_width);
            let shown_height = height.min(visible_height);
            let crop = (shown_width < width || shown_height < height).then(|| CropRegion {
                x: (width - shown_width) / 2,
                y: 0,
                width: shown_width,
                height: shown_height,
            });
            let columns = (shown_width as f32 / cell_width).round().max(1.0) as u32;
            let rows = (shown_height as f32 / cell_height).round().max(1.0) as u32;
            (crop, columns, rows)
        }
        _ => {
            let (columns, rows) = fit_by_ratio(width, height, available_cols, available_rows);
            (None, columns, rows)
        }
    };

    columns = columns.clamp(1, available_cols);
    rows = rows.clamp(1, available_rows);

    Placement {
        crop,
        start_col: (available_cols - columns) / 2,
        start_row: (available_rows - rows) / 2,
        columns,
        rows,
    }
}

fn fit_by_ratio(width: u32, height: u32, available_cols: u32, available_rows: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (available_cols, available_rows);
    }
    // Terminal cells are roughly twice as tall as they are wide.
    let ratio = width as f32 / height as f32 * 2.0;
    let mut cols = available_cols as f32;
    let mut rows = (cols / ratio).round().max(1.0);
    if rows > available_rows as f32 {
        rows = available_rows as f32;
        cols = (rows * ratio).round().max(1.0);
    }
    (cols as u32, rows as u32)
}

pub fn crop_render_image(image: &RenderImage, region: CropRegion) -> RenderImage {
    if image.width == 0 || image.height == 0 {
        return RenderImage {
            width: 0,
            height: 0,
            pixels: Vec::new(),
        };
    }

    let width = region.width.min(image.width).max(1);
    let height = region.height.min(image.height).max(1);
    let origin_x = region.x.min(image.width - width);
    let origin_y = region.y.min(image.height - height);

    let stride = image.width as usize * 4;
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);

    for row in 0..height {
        let src_y = origin_y + row;
        let start = src_y as usize * stride + origin_x as usize * 4;
        let end = start + width as usize * 4;
        pixels.extend_from_slice(&image.pixels[start..end]);
    }

    RenderImage {
        width,
        height,
        pixels,
    }
}

pub fn format_status(status: Option<&ViewerStatus>) -> String {
    let Some(status) = status else {
        return "no document, press o to open a PDF".to_string();
    };

    let zoom_percent = status.scale * 100.0;
    let zoom_display = if zoom_percent.is_finite() {
        format!("{:.0}%", zoom_percent)
    } else {
        "?".to_string()
    };

    let mut text = format!(
        "{} - page {}/{} - {}",
        status.file_name.as_deref().unwrap_or("<restored>"),
        status.page,
        status.page_count,
        zoom_display
    );
    if status.rendering {
        text.push_str(" ...");
    }
    text
}

pub fn combine_status(base: String, extra: Option<&str>) -> String {
    match extra.filter(|s| !s.is_empty()) {
        Some(extra) => format!("{base} | {extra}"),
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(columns: u32, rows: u32, pixel_width: u32, pixel_height: u32) -> TerminalGeometry {
        TerminalGeometry {
            columns,
            rows,
            pixel_width,
            pixel_height,
        }
    }

    #[test]
    fn small_page_is_centred_without_crop() {
        // 10x20 pixel cells, 80x25 terminal: 800x480 pixels for the page.
        let placement = place_image(400, 200, &geometry(80, 25, 800, 500));
        assert_eq!(placement.crop, None);
        assert_eq!(placement.columns, 40);
        assert_eq!(placement.rows, 10);
        assert_eq!(placement.start_col, 20);
        assert_eq!(placement.start_row, 7);
    }

    #[test]
    fn oversized_page_is_cropped_to_visible_area() {
        let placement = place_image(1000, 1000, &geometry(80, 25, 800, 500));
        assert_eq!(
            placement.crop,
            Some(CropRegion {
                x: 100,
                y: 0,
                width: 800,
                height: 480,
            })
        );
        assert_eq!(placement.columns, 80);
        assert_eq!(placement.rows, 24);
        assert_eq!(placement.start_col, 0);
        assert_eq!(placement.start_row, 0);
    }

    #[test]
    fn unknown_pixel_size_fits_by_ratio() {
        let placement = place_image(100, 100, &geometry(80, 25, 0, 0));
        assert_eq!(placement.crop, None);
        assert_eq!(placement.rows, 24);
        assert_eq!(placement.columns, 48);
    }

    #[test]
    fn crop_copies_requested_rows() {
        let image = RenderImage {
            width: 3,
            height: 2,
            pixels: (0..24).collect(),
        };
        let cropped = crop_render_image(
            &image,
            CropRegion {
                x: 1,
                y: 1,
                width: 2,
                height: 1,
            },
        );
        assert_eq!(cropped.width, 2);
        assert_eq!(cropped.height, 1);
        assert_eq!(cropped.pixels, (16..24).collect::<Vec<u8>>());
    }

    #[test]
    fn status_shows_page_and_zoom() {
        let status = ViewerStatus {
            file_name: Some("report.pdf".into()),
            page: 3,
            page_count: 12,
            scale: 1.5,
            rendering: false,
        };
        assert_eq!(
            format_status(Some(&status)),
            "report.pdf - page 3/12 - 150%"
        );
        assert_eq!(
            combine_status(format_status(Some(&status)), Some("open: a")),
            "report.pdf - page 3/12 - 150% | open: a"
        );
        assert!(format_status(None).contains("press o"));
    }

    #[test]
    fn status_uses_plain_separators() {
        let status = ViewerStatus {
            file_name: None,
            page: 1,
            page_count: 2,
            scale: 0.25,
            rendering: true,
        };
        let text = format_status(Some(&status));
        assert_eq!(text, "<restored> - page 1/2 - 25% ...");
        assert!(text.is_ascii());
        assert!(format_status(None).is_ascii());
    }
}

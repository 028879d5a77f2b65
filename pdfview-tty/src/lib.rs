use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{Clear, ClearType},
};
use png::{BitDepth, ColorType, Encoder};
use pdfview_core::RenderImage;

/// Draws page images with the kitty graphics protocol. Every draw reuses the
/// same image and placement ids, so a new page replaces the previous one.
pub struct KittyRenderer<W: Write> {
    writer: W,
    image_id: u32,
    placement_id: u32,
}

pub struct DrawParams {
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn clamped(columns: u32, rows: u32) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

/// Base64 payload bytes per graphics command.
const CHUNK_SIZE: usize = 4096;

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            image_id: 1,
            placement_id: 1,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Transmits `image` as PNG and places it over `params` cells at the
    /// cursor. Payloads larger than one chunk are sent as a continuation
    /// sequence.
    pub fn draw(&mut self, image: &RenderImage, params: DrawParams) -> Result<()> {
        let encoded = BASE64.encode(encode_png(image)?);
        let chunks: Vec<&[u8]> = encoded.as_bytes().chunks(CHUNK_SIZE).collect();
        let last = chunks.len().saturating_sub(1);

        for (index, chunk) in chunks.iter().enumerate() {
            let more = u8::from(index < last);
            let control = if index == 0 {
                format!(
                    "a=T,f=100,C=1,q=2,i={},p={},c={},r={},s={},v={},z=-1,m={more}",
                    self.image_id,
                    self.placement_id,
                    params.columns,
                    params.rows,
                    image.width,
                    image.height,
                )
            } else {
                format!("m={more},q=2")
            };
            self.command(&control, chunk)?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Removes the page image, e.g. before showing a different document.
    pub fn delete_image(&mut self) -> Result<()> {
        let control = format!("a=d,d=I,i={},q=2", self.image_id);
        self.command(&control, &[])?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        self.sync_update('h')
    }

    /// The terminal shows everything written since `begin_sync_update`.
    pub fn end_sync_update(&mut self) -> Result<()> {
        self.sync_update('l')
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }

    fn command(&mut self, control: &str, payload: &[u8]) -> io::Result<()> {
        write!(self.writer, "\u{1b}_G{control}")?;
        if !payload.is_empty() {
            self.writer.write_all(b";")?;
            self.writer.write_all(payload)?;
        }
        self.writer.write_all(b"\x1b\\")
    }

    fn sync_update(&mut self, mode: char) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026{mode}")?;
        self.writer.flush()?;
        Ok(())
    }
}

fn encode_png(image: &RenderImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
    encoder.set_color(ColorType::Rgba);
    encoder.set_depth(BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&image.pixels)?;
    writer.finish()?;
    Ok(buffer)
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    NextPage,
    PreviousPage,
    ZoomIn,
    ZoomOut,
    BeginOpen,
    PromptChanged { input: String },
    OpenFile { path: PathBuf },
    PromptCancel,
    Resize,
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    /// Typing a file path to open.
    Prompt,
}

#[derive(Debug, Default)]
pub struct EventMapper {
    mode: InputMode,
    prompt_buffer: String,
}

impl EventMapper {
    pub const PROMPT_LABEL: &'static str = "open: ";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.prompt_buffer.clear();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Resize(..) => UiEvent::Resize,
            Event::Key(KeyEvent {
                kind: KeyEventKind::Release,
                ..
            }) => UiEvent::None,
            Event::Key(key) => match self.mode {
                InputMode::Normal => self.map_key_normal(key),
                InputMode::Prompt => self.map_key_prompt(key),
            },
            _ => UiEvent::None,
        }
    }

    fn map_key_normal(&mut self, key: KeyEvent) -> UiEvent {
        match (key.code, key.modifiers) {
            (KeyCode::Char('c'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                UiEvent::Quit
            }
            (KeyCode::Char('j'), KeyModifiers::NONE)
            | (KeyCode::Char(' '), KeyModifiers::NONE)
            | (KeyCode::Right, _)
            | (KeyCode::Down, _)
            | (KeyCode::PageDown, _) => UiEvent::NextPage,
            (KeyCode::Char('k'), KeyModifiers::NONE)
            | (KeyCode::Left, _)
            | (KeyCode::Up, _)
            | (KeyCode::PageUp, _) => UiEvent::PreviousPage,
            (KeyCode::Char('+'), _) | (KeyCode::Char('='), _) => UiEvent::ZoomIn,
            (KeyCode::Char('-'), _) => UiEvent::ZoomOut,
            (KeyCode::Char('o'), KeyModifiers::NONE) => {
                self.set_mode(InputMode::Prompt);
                UiEvent::BeginOpen
            }
            (KeyCode::Char('q'), _) => UiEvent::Quit,
            _ => UiEvent::None,
        }
    }

    fn map_key_prompt(&mut self, key: KeyEvent) -> UiEvent {
        match (key.code, key.modifiers) {
            (KeyCode::Esc, _) => {
                self.set_mode(InputMode::Normal);
                UiEvent::PromptCancel
            }
            (KeyCode::Enter, _) => {
                let input = self.prompt_buffer.trim().to_string();
                self.set_mode(InputMode::Normal);
                if input.is_empty() {
                    UiEvent::PromptCancel
                } else {
                    UiEvent::OpenFile {
                        path: expand_home(&input),
                    }
                }
            }
            (KeyCode::Backspace, _) => {
                self.prompt_buffer.pop();
                UiEvent::PromptChanged {
                    input: self.prompt_buffer.clone(),
                }
            }
            (KeyCode::Char(c), mods) if mods.is_empty() || mods == KeyModifiers::SHIFT => {
                self.prompt_buffer.push(c);
                UiEvent::PromptChanged {
                    input: self.prompt_buffer.clone(),
                }
            }
            _ => UiEvent::None,
        }
    }

    /// Text to show after the status line while a prompt is open.
    pub fn pending_input(&self) -> Option<String> {
        match self.mode {
            InputMode::Prompt => Some(format!("{}{}", Self::PROMPT_LABEL, self.prompt_buffer)),
            InputMode::Normal => None,
        }
    }
}

fn expand_home(input: &str) -> PathBuf {
    if let Some(rest) = input.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(input)
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}

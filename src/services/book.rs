//! Paginates a story into a printable picture book.
//!
//! Layout is computed in points with the origin at the top-left corner of the
//! page and is independent of the PDF writer, so pagination can be checked
//! without rendering anything.

use anyhow::Result;
use futures_util::stream::{self, StreamExt};
use image::RgbImage;
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;

use crate::core::io::Storage;
use crate::core::models::Illustration;
use crate::services::images::{decode, ImageLoader};
use crate::utils::pdf::{Font, PageCanvas, PdfBuilder};

pub const PAGE_WIDTH: f32 = 595.0;
pub const PAGE_HEIGHT: f32 = 842.0;
pub const MARGIN: f32 = 57.0;
pub const PARAGRAPHS_PER_PAGE: usize = 2;

const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;
const CONTENT_BOTTOM: f32 = PAGE_HEIGHT - MARGIN;
const IMAGE_WIDTH: f32 = CONTENT_WIDTH * 0.8;
const IMAGE_HEIGHT: f32 = IMAGE_WIDTH * 0.75;

const TITLE_SIZE: f32 = 24.0;
const TITLE_LEADING: f32 = 30.0;
const MAX_TITLE_LINES: usize = 4;
const SUBTITLE: &str = "Created with StoryBook Magic";
const SUBTITLE_SIZE: f32 = 14.0;
const EXCERPT_SIZE: f32 = 11.0;
const EXCERPT_LEADING: f32 = 15.0;
const EXCERPT_CHARS: usize = 160;
const CAPTION_SIZE: f32 = 10.0;
const CAPTION_LEADING: f32 = 14.0;
const BODY_SIZE: f32 = 12.0;
const BODY_LEADING: f32 = 17.0;
const IMAGE_GAP: f32 = 12.0;
const CAPTION_GAP: f32 = 16.0;
const PARAGRAPH_GAP: f32 = 11.0;

const DEFAULT_FILENAME: &str = "my-story";

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// `top` is the distance from the top edge to the top of the line box.
    Text {
        font: Font,
        size: f32,
        x: f32,
        top: f32,
        text: String,
    },
    /// `slot` indexes the illustrations handed to the layout.
    Image {
        slot: usize,
        x: f32,
        top: f32,
        width: f32,
        height: f32,
    },
}

/// What the layout needs to know about one illustration.
#[derive(Debug, Clone)]
pub struct ArtSlot {
    pub caption: String,
    pub available: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BookLayout {
    pub pages: Vec<Vec<Element>>,
}

struct PageCursor {
    elements: Vec<Element>,
    y: f32,
}

impl PageCursor {
    fn new() -> Self {
        Self {
            elements: Vec::new(),
            y: MARGIN,
        }
    }

    fn fits(&self, height: f32) -> bool {
        self.y + height <= CONTENT_BOTTOM
    }
}

impl BookLayout {
    /// Title page, then one page per group of paragraphs. Group `g` is headed by
    /// `art[g]` when present; groups that outgrow a page continue on extra pages.
    pub fn build(title: &str, prompt_excerpt: Option<&str>, story_text: &str, art: &[ArtSlot]) -> Self {
        let mut pages = vec![title_page(title, prompt_excerpt)];
        let paragraphs = split_paragraphs(story_text);

        for (group, chunk) in paragraphs.chunks(PARAGRAPHS_PER_PAGE).enumerate() {
            let mut cursor = PageCursor::new();

            if let Some(slot) = art.get(group) {
                if slot.available {
                    cursor.elements.push(Element::Image {
                        slot: group,
                        x: (PAGE_WIDTH - IMAGE_WIDTH) / 2.0,
                        top: cursor.y,
                        width: IMAGE_WIDTH,
                        height: IMAGE_HEIGHT,
                    });
                    cursor.y += IMAGE_HEIGHT + IMAGE_GAP;
                }
                let caption = slot.caption.trim();
                if !caption.is_empty() {
                    for line in wrap_text(caption, Font::Italic, CAPTION_SIZE, CONTENT_WIDTH) {
                        cursor.elements.push(centered(Font::Italic, CAPTION_SIZE, cursor.y, line));
                        cursor.y += CAPTION_LEADING;
                    }
                }
                cursor.y += CAPTION_GAP;
            }

            for paragraph in chunk {
                let lines = wrap_text(paragraph, Font::Regular, BODY_SIZE, CONTENT_WIDTH);
                let height = lines.len() as f32 * BODY_LEADING;
                if !cursor.fits(height) && !cursor.elements.is_empty() {
                    pages.push(std::mem::take(&mut cursor.elements));
                    cursor = PageCursor::new();
                }

                for line in lines {
                    if !cursor.fits(BODY_LEADING) {
                        pages.push(std::mem::take(&mut cursor.elements));
                        cursor = PageCursor::new();
                    }
                    cursor.elements.push(Element::Text {
                        font: Font::Regular,
                        size: BODY_SIZE,
                        x: MARGIN,
                        top: cursor.y,
                        text: line,
                    });
                    cursor.y += BODY_LEADING;
                }
                cursor.y += PARAGRAPH_GAP;
            }

            pages.push(cursor.elements);
        }

        Self { pages }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

fn title_page(title: &str, prompt_excerpt: Option<&str>) -> Vec<Element> {
    let mut elements = Vec::new();
    let lines = title_lines(title);
    let block = lines.len() as f32 * TITLE_LEADING;
    let mut y = ((PAGE_HEIGHT - block) / 2.0 - TITLE_LEADING).max(MARGIN);

    for line in lines {
        elements.push(centered(Font::Bold, TITLE_SIZE, y, line));
        y += TITLE_LEADING;
    }

    y += SUBTITLE_SIZE;
    elements.push(centered(Font::Regular, SUBTITLE_SIZE, y, SUBTITLE.to_string()));
    y += SUBTITLE_SIZE * 3.0;

    if let Some(prompt) = prompt_excerpt.map(str::trim).filter(|e| !e.is_empty()) {
        let mut excerpt: String = prompt.chars().take(EXCERPT_CHARS).collect();
        if prompt.chars().count() > EXCERPT_CHARS {
            excerpt.push_str("...");
        }
        for line in wrap_text(&format!("\"{}\"", excerpt), Font::Italic, EXCERPT_SIZE, CONTENT_WIDTH) {
            elements.push(centered(Font::Italic, EXCERPT_SIZE, y, line));
            y += EXCERPT_LEADING;
        }
    }

    elements
}

/// Wrapped title, cut to `MAX_TITLE_LINES` with a trailing ellipsis.
fn title_lines(title: &str) -> Vec<String> {
    let mut lines = wrap_text(title, Font::Bold, TITLE_SIZE, CONTENT_WIDTH);
    if lines.len() <= MAX_TITLE_LINES {
        return lines;
    }
    lines.truncate(MAX_TITLE_LINES);
    if let Some(last) = lines.last_mut() {
        while !last.is_empty()
            && text_width(&format!("{}...", last), Font::Bold, TITLE_SIZE) > CONTENT_WIDTH
        {
            last.pop();
        }
        last.push_str("...");
    }
    lines
}

fn centered(font: Font, size: f32, top: f32, text: String) -> Element {
    let width = text_width(&text, font, size);
    Element::Text {
        font,
        size,
        x: ((PAGE_WIDTH - width) / 2.0).max(MARGIN),
        top,
        text,
    }
}

/// Paragraphs separated by blank lines, trimmed, empties dropped.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line.trim());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }
    paragraphs
}

/// Approximate Helvetica advance widths, in ems.
fn glyph_width(c: char) -> f32 {
    match c {
        'i' | 'j' | 'l' | '.' | ',' | '\'' | '!' | '|' | ':' | ';' => 0.28,
        ' ' | 'f' | 't' | 'r' | 'I' | '(' | ')' | '-' | '"' => 0.33,
        'm' | 'w' | 'M' | 'W' => 0.83,
        'A'..='Z' => 0.67,
        _ => 0.55,
    }
}

pub fn text_width(text: &str, font: Font, size: f32) -> f32 {
    let ems: f32 = text.chars().map(glyph_width).sum();
    let weight = if font == Font::Bold { 1.05 } else { 1.0 };
    ems * size * weight
}

/// Greedy word wrap. Words wider than a whole line are split by character.
pub fn wrap_text(text: &str, font: Font, size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();

    for word in text.split_whitespace() {
        let candidate = if line.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", line, word)
        };
        if text_width(&candidate, font, size) <= max_width {
            line = candidate;
            continue;
        }

        if !line.is_empty() {
            lines.push(std::mem::take(&mut line));
        }
        for c in word.chars() {
            line.push(c);
            if text_width(&line, font, size) > max_width && line.chars().count() > 1 {
                line.pop();
                lines.push(std::mem::take(&mut line));
                line.push(c);
            }
        }
    }

    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// A rendered book ready to be written out.
#[derive(Debug, Clone)]
pub struct StoryDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub page_count: usize,
}

impl StoryDocument {
    /// Writes the PDF under `folder` and returns its path.
    pub async fn save(&self, storage: &dyn Storage, folder: &str) -> Result<String> {
        let path = Path::new(folder).join(&self.filename).to_string_lossy().to_string();
        storage.write(&path, &self.bytes).await?;
        info!("Saved {} ({} pages)", path, self.page_count);
        Ok(path)
    }
}

/// Lowercased, hyphen-separated, ASCII alphanumerics only.
pub fn sanitize_filename(title: &str) -> String {
    let mut name = String::new();
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_lowercase());
        } else if !name.is_empty() && !name.ends_with('-') {
            name.push('-');
        }
    }
    let name = name.trim_end_matches('-');
    if name.is_empty() {
        DEFAULT_FILENAME.to_string()
    } else {
        name.to_string()
    }
}

pub fn document_filename(title: &str) -> String {
    format!("{}.pdf", sanitize_filename(title))
}

pub struct BookRenderer {
    loader: Arc<dyn ImageLoader>,
    concurrency: usize,
}

impl BookRenderer {
    pub fn new(loader: Arc<dyn ImageLoader>, concurrency: usize) -> Self {
        Self {
            loader,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn render(
        &self,
        title: &str,
        prompt_excerpt: Option<&str>,
        story_text: &str,
        illustrations: &[Illustration],
    ) -> Result<StoryDocument> {
        let groups = split_paragraphs(story_text).len().div_ceil(PARAGRAPHS_PER_PAGE);
        let used = &illustrations[..illustrations.len().min(groups)];
        let images = self.load_images(used).await;

        let art: Vec<ArtSlot> = used
            .iter()
            .zip(&images)
            .map(|(illustration, image)| ArtSlot {
                caption: illustration.caption.clone(),
                available: image.is_some(),
            })
            .collect();

        let layout = BookLayout::build(title, prompt_excerpt, story_text, &art);
        let bytes = write_pdf(&layout, &images)?;

        Ok(StoryDocument {
            filename: document_filename(title),
            bytes,
            page_count: layout.page_count(),
        })
    }

    /// Fetches in parallel but keeps illustration order. Failures become `None`.
    async fn load_images(&self, illustrations: &[Illustration]) -> Vec<Option<RgbImage>> {
        let loader = &self.loader;
        stream::iter(illustrations)
            .map(|illustration| async move {
                let reference = illustration.image_url.trim();
                if reference.is_empty() {
                    return None;
                }
                match loader.load(reference).await.and_then(|bytes| decode(&bytes)) {
                    Ok(image) => Some(image),
                    Err(e) => {
                        warn!(
                            "Skipping illustration {} ({}): {:#}",
                            illustration.scene_number, reference, e
                        );
                        None
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }
}

fn write_pdf(layout: &BookLayout, images: &[Option<RgbImage>]) -> Result<Vec<u8>> {
    let mut builder = PdfBuilder::new(PAGE_WIDTH, PAGE_HEIGHT);
    let handles: Vec<_> = images
        .iter()
        .map(|image| image.as_ref().map(|image| builder.add_image(image)))
        .collect();

    for page in &layout.pages {
        let mut canvas = PageCanvas::new();
        for element in page {
            match element {
                Element::Text { font, size, x, top, text } => {
                    canvas.text(*font, *size, *x, PAGE_HEIGHT - top - size, text);
                }
                Element::Image { slot, x, top, width, height } => {
                    if let Some(Some(handle)) = handles.get(*slot) {
                        canvas.image(*handle, *x, PAGE_HEIGHT - top - height, *width, *height);
                    }
                }
            }
        }
        builder.add_page(canvas)?;
    }

    builder.finish()
}

use anyhow::{Context, Result};
use image::RgbImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

/// The three standard Type1 faces the book uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Regular,
    Bold,
    Italic,
}

impl Font {
    fn resource_name(&self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
            Font::Italic => "F3",
        }
    }

    fn base_font(&self) -> &'static str {
        match self {
            Font::Regular => "Helvetica",
            Font::Bold => "Helvetica-Bold",
            Font::Italic => "Helvetica-Oblique",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHandle(ObjectId);

/// Drawing operations for one page, in PDF user space (origin bottom-left).
#[derive(Default)]
pub struct PageCanvas {
    operations: Vec<Operation>,
    images: Vec<(String, ObjectId)>,
}

impl PageCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&mut self, font: Font, size: f32, x: f32, baseline: f32, text: &str) {
        self.operations.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![font.resource_name().into(), Object::Real(size)]),
            Operation::new("Td", vec![Object::Real(x), Object::Real(baseline)]),
            Operation::new("Tj", vec![Object::string_literal(encode_win_ansi(text))]),
            Operation::new("ET", vec![]),
        ]);
    }

    /// Places an image with its lower-left corner at (x, y).
    pub fn image(&mut self, handle: ImageHandle, x: f32, y: f32, width: f32, height: f32) {
        let name = format!("Im{}", self.images.len());
        self.operations.extend([
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Real(width),
                    Object::Real(0.0),
                    Object::Real(0.0),
                    Object::Real(height),
                    Object::Real(x),
                    Object::Real(y),
                ],
            ),
            Operation::new("Do", vec![name.as_str().into()]),
            Operation::new("Q", vec![]),
        ]);
        self.images.push((name, handle.0));
    }
}

pub struct PdfBuilder {
    doc: Document,
    pages_id: ObjectId,
    fonts: Dictionary,
    page_ids: Vec<ObjectId>,
    width: f32,
    height: f32,
}

impl PdfBuilder {
    pub fn new(width: f32, height: f32) -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut fonts = Dictionary::new();
        for font in [Font::Regular, Font::Bold, Font::Italic] {
            let font_id = doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => font.base_font(),
                "Encoding" => "WinAnsiEncoding",
            });
            fonts.set(font.resource_name(), font_id);
        }

        Self {
            doc,
            pages_id,
            fonts,
            page_ids: Vec::new(),
            width,
            height,
        }
    }

    pub fn add_image(&mut self, image: &RgbImage) -> ImageHandle {
        let dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => image.width() as i64,
            "Height" => image.height() as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        };
        let id = self.doc.add_object(Stream::new(dict, image.as_raw().clone()));
        ImageHandle(id)
    }

    pub fn add_page(&mut self, canvas: PageCanvas) -> Result<()> {
        let content = Content {
            operations: canvas.operations,
        };
        let content_id = self
            .doc
            .add_object(Stream::new(dictionary! {}, content.encode().context("Failed to encode page content")?));

        let mut xobjects = Dictionary::new();
        for (name, id) in canvas.images {
            xobjects.set(name, id);
        }

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![0.into(), 0.into(), Object::Real(self.width), Object::Real(self.height)],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => self.fonts.clone(),
                "XObject" => xobjects,
            },
        });
        self.page_ids.push(page_id);
        Ok(())
    }


    pub fn finish(mut self) -> Result<Vec<u8>> {
        let kids: Vec<Object> = self.page_ids.iter().map(|id| (*id).into()).collect();
        let count = kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc.compress();

        let mut bytes = Vec::new();
        self.doc.save_to(&mut bytes).context("Failed to serialize PDF")?;
        Ok(bytes)
    }
}

/// Standard fonts only cover WinAnsi. C1 controls and anything outside Latin-1 become '?'.
fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' => b'\'',
            '\u{201C}' | '\u{201D}' => b'"',
            '\u{2013}' | '\u{2014}' => b'-',
            '\u{80}'..='\u{9F}' => b'?',
            c if (c as u32) < 0x100 => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

//! Single-page A4 layout on top of `pdf-writer`.
//!
//! Text uses the two standard Helvetica faces with WinAnsi encoding, so no
//! fonts need embedding. Positions are in millimetres from the bottom-left
//! corner of the page.

use std::path::Path;

use miniz_oxide::deflate::{CompressionLevel, compress_to_vec_zlib};
use pdf_writer::{Content, Filter, Finish, Name, Pdf, Rect, Ref, Str};

use crate::error::SetupError;

const PT_PER_MM: f32 = 72.0 / 25.4;
const A4_WIDTH_PT: f32 = 595.28;
const A4_HEIGHT_PT: f32 = 841.89;
const LEADING: f32 = 1.2;

/// Ids 1 to 6 are the fixed page objects; images follow.
const FIRST_IMAGE_ID: i32 = 7;

/// The two faces registered on every page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource(self) -> Name<'static> {
        match self {
            Self::Regular => Name(b"F1"),
            Self::Bold => Name(b"F2"),
        }
    }
}

/// A raster image decoded once and kept compressed for embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Logo {
    width: u32,
    height: u32,
    /// zlib-compressed 8-bit RGB samples.
    rgb: Vec<u8>,
    /// zlib-compressed alpha channel, when the source has one.
    alpha: Option<Vec<u8>>,
}

impl Logo {
    /// Decode a PNG or JPEG.
    pub fn decode(bytes: &[u8]) -> Result<Self, image::ImageError> {
        let decoded = image::load_from_memory(bytes)?;
        let level = CompressionLevel::DefaultLevel as u8;

        let rgb = compress_to_vec_zlib(decoded.to_rgb8().as_raw(), level);
        let alpha = decoded.color().has_alpha().then(|| {
            let alphas: Vec<u8> = decoded.to_rgba8().pixels().map(|p| p.0[3]).collect();
            compress_to_vec_zlib(&alphas, level)
        });

        Ok(Self {
            width: decoded.width(),
            height: decoded.height(),
            rgb,
            alpha,
        })
    }

    pub fn load(path: &Path) -> Result<Self, SetupError> {
        let to_setup = |reason: String| SetupError::Logo {
            path: path.display().to_string(),
            reason,
        };
        let bytes = std::fs::read(path).map_err(|e| to_setup(e.to_string()))?;
        Self::decode(&bytes).map_err(|e| to_setup(e.to_string()))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn has_alpha(&self) -> bool {
        self.alpha.is_some()
    }
}

fn image_name(index: usize) -> Vec<u8> {
    format!("Im{}", index + 1).into_bytes()
}

/// One A4 page of positioned text and images.
pub struct PdfPage<'a> {
    content: Content,
    images: Vec<&'a Logo>,
}

impl Default for PdfPage<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> PdfPage<'a> {
    pub fn new() -> Self {
        Self {
            content: Content::new(),
            images: Vec::new(),
        }
    }

    /// Draw `lines` top-down starting with the first baseline at
    /// (`x_mm`, `y_mm`). Line spacing is 1.2 × `size`.
    pub fn text_block<S: AsRef<str>>(
        &mut self,
        x_mm: f32,
        y_mm: f32,
        font: Font,
        size: f32,
        lines: &[S],
    ) {
        if lines.is_empty() {
            return;
        }
        self.content.begin_text();
        self.content.set_font(font.resource(), size);
        self.content.set_leading(size * LEADING);
        self.content.next_line(x_mm * PT_PER_MM, y_mm * PT_PER_MM);
        for line in lines {
            self.content.show(Str(&winansi(line.as_ref())));
            self.content.next_line_using_leading();
        }
        self.content.end_text();
    }

    /// Draw `logo` scaled into the box whose bottom-left corner is at
    /// (`x_mm`, `y_mm`).
    pub fn image(&mut self, logo: &'a Logo, x_mm: f32, y_mm: f32, width_mm: f32, height_mm: f32) {
        let name = image_name(self.images.len());
        self.content.save_state();
        self.content.transform([
            width_mm * PT_PER_MM,
            0.0,
            0.0,
            height_mm * PT_PER_MM,
            x_mm * PT_PER_MM,
            y_mm * PT_PER_MM,
        ]);
        self.content.x_object(Name(&name));
        self.content.restore_state();
        self.images.push(logo);
    }

    /// Serialise the page as a complete PDF file.
    pub fn finish(self) -> Vec<u8> {
        let catalog_id = Ref::new(1);
        let page_tree_id = Ref::new(2);
        let page_id = Ref::new(3);
        let content_id = Ref::new(4);
        let regular_id = Ref::new(5);
        let bold_id = Ref::new(6);

        // Each image takes an id, plus one for its soft mask.
        let mut next_id = FIRST_IMAGE_ID;
        let image_ids: Vec<(Ref, Option<Ref>)> = self
            .images
            .iter()
            .map(|logo| {
                let id = Ref::new(next_id);
                next_id += 1;
                let mask = logo.alpha.as_ref().map(|_| {
                    let mask = Ref::new(next_id);
                    next_id += 1;
                    mask
                });
                (id, mask)
            })
            .collect();

        let mut pdf = Pdf::new();
        pdf.catalog(catalog_id).pages(page_tree_id);
        pdf.pages(page_tree_id).kids([page_id]).count(1);

        {
            let mut page = pdf.page(page_id);
            page.media_box(Rect::new(0.0, 0.0, A4_WIDTH_PT, A4_HEIGHT_PT));
            page.parent(page_tree_id);
            page.contents(content_id);
            let mut resources = page.resources();
            resources
                .fonts()
                .pair(Font::Regular.resource(), regular_id)
                .pair(Font::Bold.resource(), bold_id);
            if !image_ids.is_empty() {
                let mut x_objects = resources.x_objects();
                for (index, (id, _)) in image_ids.iter().enumerate() {
                    x_objects.pair(Name(&image_name(index)), *id);
                }
            }
        }

        pdf.stream(content_id, &self.content.finish());
        pdf.type1_font(regular_id)
            .base_font(Name(b"Helvetica"))
            .encoding_predefined(Name(b"WinAnsiEncoding"));
        pdf.type1_font(bold_id)
            .base_font(Name(b"Helvetica-Bold"))
            .encoding_predefined(Name(b"WinAnsiEncoding"));

        for (logo, (id, mask_id)) in self.images.iter().zip(&image_ids) {
            let mut image = pdf.image_xobject(*id, &logo.rgb);
            image.filter(Filter::FlateDecode);
            image.width(logo.width as i32);
            image.height(logo.height as i32);
            image.color_space().device_rgb();
            image.bits_per_component(8);
            if let Some(mask_id) = mask_id {
                image.s_mask(*mask_id);
            }
            image.finish();

            if let (Some(mask_id), Some(alpha)) = (mask_id, &logo.alpha) {
                let mut mask = pdf.image_xobject(*mask_id, alpha);
                mask.filter(Filter::FlateDecode);
                mask.width(logo.width as i32);
                mask.height(logo.height as i32);
                mask.color_space().device_gray();
                mask.bits_per_component(8);
            }
        }

        pdf.finish()
    }
}

/// `text` as WinAnsi bytes for a Helvetica string.
///
/// Characters WinAnsi cannot represent become `?`; control characters are
/// dropped.
fn winansi(text: &str) -> Vec<u8> {
    text.chars()
        .filter_map(|ch| match ch {
            '\t' => Some(b' '),
            '€' => Some(0x80),
            '‘' => Some(0x91),
            '’' => Some(0x92),
            '“' => Some(0x93),
            '”' => Some(0x94),
            '–' => Some(0x96),
            '—' => Some(0x97),
            c if (c as u32) < 0x20 => None,
            c if (0x20..0x7F).contains(&(c as u32)) || (0xA0..=0xFF).contains(&(c as u32)) => {
                Some(c as u8)
            }
            _ => Some(b'?'),
        })
        .collect()
}

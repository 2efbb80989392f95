//! PDF assembly - one full-page raster per page

use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use lopdf::content::{Content, Operation};
use lopdf::xref::XrefType;
use lopdf::{Document, Object, ObjectId, Stream, dictionary};

use super::PAGE_SIZE_MM;
use super::request::RenderError;
use super::types::PageImage;

const POINTS_PER_MM: f32 = 72.0 / 25.4;
const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";
const IMAGE_NAME: &str = "Im0";

/// Page size in PDF points
#[must_use]
pub fn page_size_pt() -> (f32, f32) {
    (
        PAGE_SIZE_MM.0 * POINTS_PER_MM,
        PAGE_SIZE_MM.1 * POINTS_PER_MM,
    )
}

/// Multi-page document under construction.
///
/// Pages are kept in insertion order. `serialize` consumes the document.
pub struct SheetDocument {
    doc: Document,
    pages_id: ObjectId,
    pages: Vec<Object>,
}

impl Default for SheetDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl SheetDocument {
    #[must_use]
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.4");
        doc.reference_table.cross_reference_type = XrefType::CrossReferenceTable;
        let pages_id = doc.new_object_id();

        Self {
            doc,
            pages_id,
            pages: Vec::new(),
        }
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Add a page showing `image` stretched over the whole A4 media box.
    pub fn append_page(&mut self, image: &PageImage) -> Result<(), RenderError> {
        let (width_pt, height_pt) = page_size_pt();
        let image_id = self.doc.add_object(image_xobject(image)?);

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        width_pt.into(),
                        0.into(),
                        0.into(),
                        height_pt.into(),
                        0.into(),
                        0.into(),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(IMAGE_NAME.as_bytes().to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = self
            .doc
            .add_object(Stream::new(dictionary! {}, content.encode()?));

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => media_box(),
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    IMAGE_NAME => image_id,
                },
            },
        });
        self.pages.push(page_id.into());
        Ok(())
    }

    /// Finish the page tree and write the PDF bytes.
    pub fn serialize(mut self) -> Result<Vec<u8>, RenderError> {
        let count = self.pages.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Count" => count,
                "Kids" => self.pages,
                "MediaBox" => media_box(),
            }),
        );

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let stamp = chrono::Local::now().format("D:%Y%m%d%H%M%S").to_string();
        let info_id = self.doc.add_object(dictionary! {
            "Title" => Object::string_literal("Rifas"),
            "Producer" => Object::string_literal(concat!("rifagen ", env!("CARGO_PKG_VERSION"))),
            "CreationDate" => Object::string_literal(stamp),
        });
        self.doc.trailer.set("Info", info_id);
        self.doc.compress();

        let mut buffer = Vec::new();
        self.doc
            .save_to(&mut buffer)
            .map_err(|e| RenderError::generic(format!("PDF write: {e}")))?;
        Ok(buffer)
    }
}

fn media_box() -> Vec<Object> {
    let (width_pt, height_pt) = page_size_pt();
    vec![0.into(), 0.into(), width_pt.into(), height_pt.into()]
}

fn image_xobject(image: &PageImage) -> Result<Stream, RenderError> {
    match PngLayout::parse(&image.png) {
        Some(layout) => Ok(layout.into_stream()),
        None => reencode(image),
    }
}

/// The parts of an 8-bit, non-interlaced gray or RGB PNG that a PDF reader can
/// consume directly.
struct PngLayout {
    width: u32,
    height: u32,
    colors: i64,
    idat: Vec<u8>,
}

impl PngLayout {
    fn parse(png: &[u8]) -> Option<Self> {
        let mut rest = png.strip_prefix(PNG_SIGNATURE)?;
        let mut header = None;
        let mut idat = Vec::new();

        while rest.len() >= 12 {
            let len = u32::from_be_bytes(rest[0..4].try_into().ok()?) as usize;
            let kind = &rest[4..8];
            let data = rest.get(8..8 + len)?;

            match kind {
                b"IHDR" if data.len() == 13 => {
                    let width = u32::from_be_bytes(data[0..4].try_into().ok()?);
                    let height = u32::from_be_bytes(data[4..8].try_into().ok()?);
                    let (depth, color, interlace) = (data[8], data[9], data[12]);
                    let colors = match color {
                        0 => 1,
                        2 => 3,
                        _ => return None,
                    };
                    if depth != 8 || interlace != 0 {
                        return None;
                    }
                    header = Some((width, height, colors));
                }
                b"PLTE" | b"tRNS" => return None,
                b"IDAT" => idat.extend_from_slice(data),
                b"IEND" => break,
                _ => {}
            }

            rest = rest.get(12 + len..)?;
        }

        let (width, height, colors) = header?;
        if idat.is_empty() {
            return None;
        }
        Some(Self {
            width,
            height,
            colors,
            idat,
        })
    }

    fn into_stream(self) -> Stream {
        let dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(self.width),
            "Height" => i64::from(self.height),
            "ColorSpace" => color_space(self.colors),
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
            "DecodeParms" => dictionary! {
                "Predictor" => 15,
                "Colors" => self.colors,
                "BitsPerComponent" => 8,
                "Columns" => i64::from(self.width),
            },
        };
        Stream::new(dict, self.idat).with_compression(false)
    }
}

fn color_space(colors: i64) -> &'static str {
    if colors == 1 { "DeviceGray" } else { "DeviceRGB" }
}

/// Decode any other PNG shape to RGB and deflate the raw samples.
fn reencode(image: &PageImage) -> Result<Stream, RenderError> {
    let decoded = image::load_from_memory_with_format(&image.png, image::ImageFormat::Png)
        .map_err(|e| RenderError::generic(format!("page image is not a PNG: {e}")))?
        .to_rgb8();

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
    encoder
        .write_all(decoded.as_raw())
        .and_then(|()| encoder.flush())
        .map_err(|e| RenderError::generic(format!("page deflate: {e}")))?;
    let data = encoder
        .finish()
        .map_err(|e| RenderError::generic(format!("page deflate: {e}")))?;

    let dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => i64::from(decoded.width()),
        "Height" => i64::from(decoded.height()),
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
        "Filter" => "FlateDecode",
    };
    Ok(Stream::new(dict, data).with_compression(false))
}

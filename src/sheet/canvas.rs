//! Raster surface backed by resvg
//!
//! Vector shapes and text are collected as an SVG scene in logical units and
//! rasterized onto a tiny-skia pixmap with the DPI scale applied. Bitmaps are
//! blitted straight onto the pixmap, so the pending scene is flushed first to
//! keep painter's order.

use std::fmt::Write as _;
use std::io::Cursor;

use image::imageops::FilterType;
use image::{ImageFormat, ImageReader};
use log::{debug, warn};
use rayon::prelude::*;
use resvg::tiny_skia::{Color, FilterQuality, IntSize, Pixmap, PixmapPaint, Transform};
use resvg::usvg;

use super::metrics::TextMetricsCache;
use super::request::RenderError;
use super::surface::{Point, Rect, Surface, TextAlign, TextStyle};
use super::types::PageImage;
use super::{DEFAULT_METRICS_CACHE_SIZE, PAGE_HEIGHT, PAGE_WIDTH, dpi_scale, page_pixel_size};

/// Fonts available to one rendering unit.
///
/// Each unit builds its own; nothing here is shared across threads.
pub struct Typeface {
    options: usvg::Options<'static>,
    family: String,
}

impl Typeface {
    /// Load `font_data` (if any) ahead of the system fonts and pick the
    /// family used for every text run.
    #[must_use]
    pub fn load(font_data: Option<&[u8]>, fallback_family: &str) -> Self {
        let mut options = usvg::Options::default();
        let mut family = fallback_family.to_owned();

        if let Some(data) = font_data {
            let db = options.fontdb_mut();
            db.load_font_data(data.to_vec());
            match db
                .faces()
                .next()
                .and_then(|face| face.families.first())
                .map(|(name, _)| name.clone())
            {
                Some(name) => {
                    debug!("Using embedded font family {name:?}");
                    family = format!("'{name}', {fallback_family}");
                }
                None => warn!("Font data did not contain a usable face, using {fallback_family}"),
            }
        }

        options.fontdb_mut().load_system_fonts();
        options.font_family = fallback_family.to_owned();

        Self { options, family }
    }

    /// Value written into `font-family` attributes
    #[must_use]
    pub fn family(&self) -> &str {
        &self.family
    }

    fn parse(&self, svg: &str) -> Result<usvg::Tree, usvg::Error> {
        usvg::Tree::from_str(svg, &self.options)
    }
}

/// Organizer logo, decoded and pre-scaled for one rendering unit.
pub struct Logo {
    pixmap: Pixmap,
}

impl Logo {
    /// Check that `png` is a PNG with sane dimensions without decoding pixels.
    pub fn validate(png: &[u8]) -> Result<(u32, u32), RenderError> {
        ImageReader::with_format(Cursor::new(png), ImageFormat::Png)
            .into_dimensions()
            .map_err(RenderError::LogoDecode)
    }

    /// Decode `png` and scale it to exactly `width`×`height` pixels.
    pub fn decode(png: &[u8], width: u32, height: u32) -> Result<Self, RenderError> {
        let decoded = image::load_from_memory_with_format(png, ImageFormat::Png)
            .map_err(RenderError::LogoDecode)?;
        let width = width.max(1);
        let height = height.max(1);

        let mut rgba = decoded
            .resize_exact(width, height, FilterType::Lanczos3)
            .to_rgba8()
            .into_raw();
        premultiply_rgba(&mut rgba);

        let size = IntSize::from_wh(width, height).ok_or(RenderError::Surface { width, height })?;
        let pixmap = Pixmap::from_vec(rgba, size).ok_or(RenderError::Surface { width, height })?;
        Ok(Self { pixmap })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }
}

/// Page-sized raster surface at a fixed DPI
pub struct PageCanvas {
    pixmap: Pixmap,
    scale: f32,
    scene: String,
    /// First scene failure seen by a mid-page flush
    deferred: Option<RenderError>,
    typeface: Typeface,
    metrics: TextMetricsCache,
}

impl PageCanvas {
    /// Allocate a blank page at `dpi`.
    pub fn new(dpi: f32, typeface: Typeface) -> Result<Self, RenderError> {
        let (width, height) = page_pixel_size(dpi);
        let mut pixmap = Pixmap::new(width, height).ok_or(RenderError::Surface { width, height })?;
        pixmap.fill(Color::WHITE);

        Ok(Self {
            pixmap,
            scale: dpi_scale(dpi),
            scene: String::new(),
            deferred: None,
            typeface,
            metrics: TextMetricsCache::new(DEFAULT_METRICS_CACHE_SIZE),
        })
    }

    #[must_use]
    pub fn width_px(&self) -> u32 {
        self.pixmap.width()
    }

    #[must_use]
    pub fn height_px(&self) -> u32 {
        self.pixmap.height()
    }

    /// Pixel size a logical length maps to
    #[must_use]
    pub fn to_px(&self, logical: f32) -> u32 {
        (logical * self.scale).round().max(1.0) as u32
    }

    /// Rasterize everything drawn so far and encode it as an RGB PNG.
    ///
    /// Fails if any part of the page scene could not be rasterized, so a
    /// blank or partial page is never returned as a success.
    pub fn finish_page(&mut self) -> Result<PageImage, RenderError> {
        if let Some(err) = self.deferred.take() {
            self.scene.clear();
            return Err(err);
        }
        self.flush()?;
        let width_px = self.pixmap.width();
        let height_px = self.pixmap.height();
        let rgb = pixmap_to_rgb(&self.pixmap);
        let png = encode_png(&rgb, width_px, height_px)?;

        Ok(PageImage {
            png,
            width_px,
            height_px,
        })
    }

    fn flush(&mut self) -> Result<(), RenderError> {
        if self.scene.is_empty() {
            return Ok(());
        }

        let svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{PAGE_WIDTH}" height="{PAGE_HEIGHT}" viewBox="0 0 {PAGE_WIDTH} {PAGE_HEIGHT}">{}</svg>"#,
            self.scene
        );
        self.scene.clear();

        let tree = self.typeface.parse(&svg).map_err(|e| RenderError::Scene {
            detail: e.to_string(),
        })?;
        let transform = Transform::from_scale(self.scale, self.scale);
        resvg::render(&tree, transform, &mut self.pixmap.as_mut());
        Ok(())
    }

    /// Advance width of `text`, trailing and leading spaces included.
    ///
    /// Ink bounds alone drop whitespace and side bearings, so the run is
    /// measured between two bar glyphs and the bars' own extent subtracted.
    fn measure_uncached(typeface: &Typeface, text: &str, size: f32) -> f32 {
        let bracketed = Self::ink_width(typeface, &format!("|{text}|"), size);
        let bars = Self::ink_width(typeface, "||", size);
        match (bracketed, bars) {
            (Some(outer), Some(bars)) => (outer - bars).max(0.0),
            _ => 0.0,
        }
    }

    fn ink_width(typeface: &Typeface, text: &str, size: f32) -> Option<f32> {
        let svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="1000" height="1000"><text x="0" y="{size}" font-family="{}" font-size="{size}" xml:space="preserve">{}</text></svg>"#,
            xml_escape(typeface.family()),
            xml_escape(text)
        );

        match typeface.parse(&svg) {
            Ok(tree) => tree.root().children().iter().find_map(text_bounds_width),
            Err(e) => {
                warn!("Cannot measure {text:?}: {e}");
                None
            }
        }
    }
}

fn text_bounds_width(node: &usvg::Node) -> Option<f32> {
    match node {
        usvg::Node::Text(text) => Some(text.bounding_box().width()),
        usvg::Node::Group(group) => group.children().iter().find_map(text_bounds_width),
        _ => None,
    }
}

impl Surface for PageCanvas {
    fn clear(&mut self) {
        self.scene.clear();
        self.deferred = None;
        self.pixmap.fill(Color::WHITE);
    }

    fn stroke_rect(&mut self, rect: Rect) {
        let _ = write!(
            self.scene,
            r##"<rect x="{}" y="{}" width="{}" height="{}" fill="none" stroke="#000" stroke-width="1"/>"##,
            rect.x, rect.y, rect.width, rect.height
        );
    }

    fn stroke_circle(&mut self, center: Point, radius: f32) {
        let _ = write!(
            self.scene,
            r##"<circle cx="{}" cy="{}" r="{}" fill="none" stroke="#000" stroke-width="1"/>"##,
            center.x, center.y, radius
        );
    }

    fn fill_text(&mut self, text: &str, at: Point, style: &TextStyle) {
        let anchor = match style.align {
            TextAlign::Left => "start",
            TextAlign::Center => "middle",
        };
        let transform = style
            .rotated_about
            .map(|pivot| format!(r#" transform="translate({} {}) rotate(-90)""#, pivot.x, pivot.y))
            .unwrap_or_default();

        let _ = write!(
            self.scene,
            r##"<text x="{}" y="{}" font-family="{}" font-size="{}" text-anchor="{anchor}" fill="#000" fill-opacity="{}"{transform} xml:space="preserve">{}</text>"##,
            at.x,
            at.y,
            xml_escape(self.typeface.family()),
            style.size,
            style.opacity,
            xml_escape(text)
        );
    }

    fn measure_text(&mut self, text: &str, style: &TextStyle) -> f32 {
        let typeface = &self.typeface;
        self.metrics.width_or_insert_with(text, style.size, || {
            Self::measure_uncached(typeface, text, style.size)
        })
    }

    fn draw_image(&mut self, image: &Logo, dest: Rect) {
        if let Err(err) = self.flush() {
            self.deferred.get_or_insert(err);
            return;
        }

        let x = (dest.x * self.scale).round() as i32;
        let y = (dest.y * self.scale).round() as i32;
        let width = self.to_px(dest.width);
        let height = self.to_px(dest.height);
        let paint = PixmapPaint {
            quality: FilterQuality::Bicubic,
            ..PixmapPaint::default()
        };

        if image.width() == width && image.height() == height {
            self.pixmap
                .draw_pixmap(x, y, image.pixmap.as_ref(), &paint, Transform::identity(), None);
        } else {
            let sx = width as f32 / image.width() as f32;
            let sy = height as f32 / image.height() as f32;
            let transform = Transform::from_row(sx, 0.0, 0.0, sy, x as f32, y as f32);
            self.pixmap
                .draw_pixmap(0, 0, image.pixmap.as_ref(), &paint, transform, None);
        }
    }
}

/// Escape text for use inside SVG content and attribute values.
///
/// Characters XML 1.0 cannot carry at all (C0 controls other than tab and
/// newlines, U+FFFE, U+FFFF) are dropped.
fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(c),
            c if c < '\u{20}' || c == '\u{FFFE}' || c == '\u{FFFF}' => {}
            c => out.push(c),
        }
    }
    out
}

fn premultiply_rgba(data: &mut [u8]) {
    for pixel in data.chunks_exact_mut(4) {
        let alpha = u16::from(pixel[3]);
        if alpha == 255 {
            continue;
        }
        for channel in &mut pixel[..3] {
            *channel = ((u16::from(*channel) * alpha + 127) / 255) as u8;
        }
    }
}

/// Flatten a premultiplied RGBA pixmap onto white paper.
fn pixmap_to_rgb(pixmap: &Pixmap) -> Vec<u8> {
    let data = pixmap.data();
    let mut out = vec![0u8; data.len() / 4 * 3];

    out.par_chunks_exact_mut(3)
        .zip(data.par_chunks_exact(4))
        .for_each(|(dst, px)| {
            let paper = 255 - px[3];
            dst[0] = px[0].saturating_add(paper);
            dst[1] = px[1].saturating_add(paper);
            dst[2] = px[2].saturating_add(paper);
        });

    out
}

fn encode_png(rgb: &[u8], width: u32, height: u32) -> Result<Vec<u8>, png::EncodingError> {
    let mut buf = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut buf, width, height);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_compression(png::Compression::Fast);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(rgb)?;
        writer.finish()?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logo_png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 30, 30, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn canvas(dpi: f32) -> PageCanvas {
        PageCanvas::new(dpi, Typeface::load(None, "serif")).unwrap()
    }

    fn rgb(canvas: &mut PageCanvas) -> Vec<u8> {
        canvas.flush().unwrap();
        pixmap_to_rgb(&canvas.pixmap)
    }

    fn pixel(rgb: &[u8], width: u32, x: u32, y: u32) -> [u8; 3] {
        let i = ((y * width + x) * 3) as usize;
        [rgb[i], rgb[i + 1], rgb[i + 2]]
    }

    #[test]
    fn canvas_size_follows_dpi() {
        let canvas = canvas(48.0);
        assert_eq!((canvas.width_px(), canvas.height_px()), (298, 421));
        assert_eq!(canvas.to_px(70.0), 35);
        assert_eq!(canvas.to_px(0.1), 1);
    }

    #[test]
    fn cleared_canvas_is_white() {
        let mut canvas = canvas(24.0);
        let rgb = rgb(&mut canvas);
        assert!(rgb.iter().all(|&b| b == 255));
    }

    #[test]
    fn stroked_rect_darkens_its_edge() {
        let mut canvas = canvas(96.0);
        canvas.stroke_rect(Rect::new(10.0, 10.0, 100.0, 100.0));
        let width = canvas.width_px();
        let rgb = rgb(&mut canvas);

        let edge = pixel(&rgb, width, 10, 50)[0].min(pixel(&rgb, width, 9, 50)[0]);
        assert!(edge < 200, "edge pixel too light: {edge}");
        assert_eq!(pixel(&rgb, width, 60, 60), [255, 255, 255]);
    }

    #[test]
    fn clear_discards_pending_scene() {
        let mut canvas = canvas(48.0);
        canvas.stroke_rect(Rect::new(0.0, 0.0, 200.0, 200.0));
        canvas.clear();
        assert!(rgb(&mut canvas).iter().all(|&b| b == 255));
    }

    #[test]
    fn logo_is_blitted_into_destination() {
        let mut canvas = canvas(96.0);
        let logo = Logo::decode(&logo_png(4, 4), 70, 70).unwrap();
        assert_eq!((logo.width(), logo.height()), (70, 70));

        canvas.draw_image(&logo, Rect::new(525.0, 1.0, 70.0, 70.0));
        let width = canvas.width_px();
        let rgb = rgb(&mut canvas);

        let inside = pixel(&rgb, width, 560, 36);
        assert!(inside[0].abs_diff(200) <= 2, "logo red channel {inside:?}");
        assert!(inside[1].abs_diff(30) <= 2, "logo green channel {inside:?}");
        assert_eq!(pixel(&rgb, width, 500, 36), [255, 255, 255]);
    }

    #[test]
    fn invalid_logo_is_rejected() {
        let err = Logo::decode(b"definitely not a png", 10, 10)
            .err()
            .expect("decode should fail");
        assert!(matches!(err, RenderError::LogoDecode(_)));
        assert!(matches!(
            Logo::validate(b"nope"),
            Err(RenderError::LogoDecode(_))
        ));
    }

    #[test]
    fn validate_reads_dimensions() {
        assert_eq!(Logo::validate(&logo_png(12, 7)).unwrap(), (12, 7));
    }

    #[test]
    fn finished_page_is_a_png_of_canvas_size() {
        let mut canvas = canvas(24.0);
        canvas.stroke_circle(Point::new(100.0, 100.0), 33.0);
        let page = canvas.finish_page().unwrap();

        let decoded = image::load_from_memory_with_format(&page.png, ImageFormat::Png).unwrap();
        assert_eq!(decoded.width(), page.width_px);
        assert_eq!(decoded.height(), page.height_px);
        assert_eq!((page.width_px, page.height_px), (149, 211));
    }

    #[test]
    fn escapes_markup_in_text() {
        assert_eq!(xml_escape(r#"<Club & "Co">"#), "&lt;Club &amp; &quot;Co&quot;&gt;");
    }

    #[test]
    fn escape_drops_characters_xml_cannot_carry() {
        assert_eq!(xml_escape("Club\u{1}X\u{1b}"), "ClubX");
        assert_eq!(xml_escape("a\tb\nc"), "a\tb\nc");
        assert_eq!(xml_escape("x\u{FFFE}y\u{FFFF}"), "xy");
        assert_eq!(xml_escape("Año ñ"), "Año ñ");
    }

    #[test]
    fn control_character_in_text_keeps_the_rest_of_the_page() {
        let mut canvas = canvas(96.0);
        canvas.stroke_rect(Rect::new(10.0, 10.0, 100.0, 100.0));
        canvas.fill_text("Club\u{1}X", Point::new(20.0, 40.0), &TextStyle::new(18.0));
        let page = canvas.finish_page().unwrap();

        let decoded = image::load_from_memory_with_format(&page.png, ImageFormat::Png)
            .unwrap()
            .to_rgb8();
        let edge = decoded.get_pixel(10, 50).0[0].min(decoded.get_pixel(9, 50).0[0]);
        assert!(edge < 200, "frame missing from page: {edge}");
    }

    #[test]
    fn unparseable_scene_fails_the_page() {
        let mut canvas = canvas(24.0);
        canvas.stroke_rect(Rect::new(0.0, 0.0, 50.0, 50.0));
        canvas.scene.push_str("<rect");

        assert!(matches!(
            canvas.finish_page(),
            Err(RenderError::Scene { .. })
        ));
    }

    #[test]
    fn scene_error_before_a_blit_is_reported_by_finish_page() {
        let mut canvas = canvas(24.0);
        canvas.scene.push_str("<circle");
        let logo = Logo::decode(&logo_png(4, 4), 10, 10).unwrap();
        canvas.draw_image(&logo, Rect::new(0.0, 0.0, 40.0, 40.0));
        canvas.stroke_rect(Rect::new(0.0, 0.0, 50.0, 50.0));

        assert!(matches!(
            canvas.finish_page(),
            Err(RenderError::Scene { .. })
        ));

        // the next page starts clean
        canvas.clear();
        canvas.stroke_rect(Rect::new(0.0, 0.0, 50.0, 50.0));
        assert!(canvas.finish_page().is_ok());
    }

    #[test]
    fn measured_advance_includes_spaces() {
        let typeface = Typeface::load(None, "serif");
        let bare = PageCanvas::measure_uncached(&typeface, "a", 18.0);
        assert_eq!(PageCanvas::measure_uncached(&typeface, "", 18.0), 0.0);
        if bare == 0.0 {
            // no system fonts to shape with
            return;
        }

        let trailing = PageCanvas::measure_uncached(&typeface, "a ", 18.0);
        let leading = PageCanvas::measure_uncached(&typeface, " a", 18.0);
        assert!(trailing > bare, "trailing space ignored: {trailing} <= {bare}");
        assert!(leading > bare, "leading space ignored: {leading} <= {bare}");
        assert!(PageCanvas::measure_uncached(&typeface, " ", 18.0) > 0.0);
    }

    #[test]
    fn premultiply_scales_by_alpha() {
        let mut px = [200, 100, 0, 128];
        premultiply_rgba(&mut px);
        assert_eq!(px, [100, 50, 0, 128]);
    }
}

pub mod test_helpers {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

    use crate::sheet::{
        CardOptions, Logo, PageImage, Point, RaffleDetails, Rect, RenderConfig, Surface, TextStyle,
    };

    /// One call made against a [`RecordingSurface`]
    #[derive(Clone, Debug, PartialEq)]
    pub enum DrawOp {
        Clear,
        Rect(Rect),
        Circle { center: Point, radius: f32 },
        Text {
            text: String,
            at: Point,
            style: TextStyle,
        },
        Image { dest: Rect },
    }

    /// Surface that records drawing calls instead of rasterizing them.
    ///
    /// Text measures `CHAR_WIDTH` per character so layout math is predictable.
    #[derive(Debug, Default)]
    pub struct RecordingSurface {
        pub ops: Vec<DrawOp>,
    }

    impl RecordingSurface {
        pub const CHAR_WIDTH: f32 = 10.0;

        pub fn new() -> Self {
            Self::default()
        }

        pub fn rects(&self) -> Vec<Rect> {
            self.ops
                .iter()
                .filter_map(|op| match op {
                    DrawOp::Rect(rect) => Some(*rect),
                    _ => None,
                })
                .collect()
        }

        pub fn circles(&self) -> Vec<(Point, f32)> {
            self.ops
                .iter()
                .filter_map(|op| match op {
                    DrawOp::Circle { center, radius } => Some((*center, *radius)),
                    _ => None,
                })
                .collect()
        }

        /// Text runs in drawing order
        pub fn texts(&self) -> Vec<String> {
            self.text_ops().into_iter().map(|(text, _, _)| text).collect()
        }

        pub fn text_ops(&self) -> Vec<(String, Point, TextStyle)> {
            self.ops
                .iter()
                .filter_map(|op| match op {
                    DrawOp::Text { text, at, style } => Some((text.clone(), *at, *style)),
                    _ => None,
                })
                .collect()
        }
    }

    impl Surface for RecordingSurface {
        fn clear(&mut self) {
            self.ops.push(DrawOp::Clear);
        }

        fn stroke_rect(&mut self, rect: Rect) {
            self.ops.push(DrawOp::Rect(rect));
        }

        fn stroke_circle(&mut self, center: Point, radius: f32) {
            self.ops.push(DrawOp::Circle { center, radius });
        }

        fn fill_text(&mut self, text: &str, at: Point, style: &TextStyle) {
            self.ops.push(DrawOp::Text {
                text: text.to_string(),
                at,
                style: *style,
            });
        }

        fn measure_text(&mut self, text: &str, _style: &TextStyle) -> f32 {
            text.chars().count() as f32 * Self::CHAR_WIDTH
        }

        fn draw_image(&mut self, _image: &Logo, dest: Rect) {
            self.ops.push(DrawOp::Image { dest });
        }
    }

    fn encode(image: DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("in-memory PNG encoding");
        bytes
    }

    /// Small two-tone RGBA logo
    pub fn sample_logo_png() -> Vec<u8> {
        let img = RgbaImage::from_fn(16, 16, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([20, 60, 160, 255])
            } else {
                Rgba([240, 200, 40, 255])
            }
        });
        encode(DynamicImage::ImageRgba8(img))
    }

    pub fn sample_logo() -> Logo {
        Logo::decode(&sample_logo_png(), 70, 70).expect("sample logo decodes")
    }

    /// RGBA PNG of the given size
    pub fn rgba_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 128]));
        encode(DynamicImage::ImageRgba8(img))
    }

    /// A tiny 8-bit RGB page raster
    pub fn sample_page_image() -> PageImage {
        let (width, height) = (6, 8);
        let img = RgbImage::from_fn(width, height, |x, _| Rgb([255, (x * 40) as u8, 0]));
        PageImage {
            png: encode(DynamicImage::ImageRgb8(img)),
            width_px: width,
            height_px: height,
        }
    }

    /// "Club X" raffle with prizes A/B/C at "$10"
    pub fn sample_details(quantity: u32) -> RaffleDetails {
        RaffleDetails {
            quantity,
            organization_name: "Club X".to_string(),
            raffle_name: "Rifa Anual".to_string(),
            first_prize: "A".to_string(),
            second_prize: "B".to_string(),
            third_prize: "C".to_string(),
            price: "$10".to_string(),
            logo: sample_logo_png(),
        }
    }

    /// Render settings that keep page rasters at 149×211 pixels
    pub fn low_dpi_config() -> RenderConfig {
        RenderConfig {
            dpi: 24.0,
            card: CardOptions::default(),
            ..RenderConfig::default()
        }
    }
}

//! Collage composition from sampled frames.
//!
//! All surviving frames of a scan are laid out side by side in one JPEG
//! strip, so a single inference request can see the whole walkthrough. Tile
//! geometry and encoding quality are fixed: the inference instruction
//! describes this exact layout, so they are constants rather than config.

use crate::config::MediaConfig;
use futures::stream::{self, StreamExt};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Width every frame is scaled to before placement.
pub const TILE_WIDTH: u32 = 320;

/// Canvas height floor; guards against degenerate strips from tiny frames.
pub const MIN_CANVAS_HEIGHT: u32 = 200;

/// JPEG quality for the encoded collage.
pub const JPEG_QUALITY: u8 = 85;

/// Errors from collage composition.
#[derive(Debug, Error)]
pub enum CollageError {
    #[error("No frames could be decoded for the collage")]
    NoDecodableFrames,

    #[error("Failed to encode collage: {0}")]
    Encode(String),
}

/// An encoded collage ready for inference or preview.
#[derive(Debug, Clone)]
pub struct Collage {
    /// Encoded JPEG bytes
    pub data: Vec<u8>,
    /// MIME type of the encoded bytes
    pub mime_type: &'static str,
    /// Canvas width in pixels
    pub width: u32,
    /// Canvas height in pixels
    pub height: u32,
    /// Number of frames that made it onto the canvas
    pub frame_count: usize,
}

/// Builds a horizontal collage strip from frame files.
///
/// Decodes run on the blocking thread pool with bounded parallelism; a frame
/// that fails to decode is dropped from the strip rather than failing the
/// scan, as long as at least one frame survives.
pub struct CollageBuilder {
    decode_concurrency: usize,
}

impl CollageBuilder {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            decode_concurrency: config.decode_concurrency.max(1),
        }
    }

    /// Compose the frames into one encoded JPEG strip.
    #[instrument(skip(self, frames), fields(frame_count = frames.len()))]
    pub async fn compose(&self, frames: &[PathBuf]) -> Result<Collage, CollageError> {
        let tiles = self.decode_tiles(frames).await;

        if tiles.is_empty() {
            return Err(CollageError::NoDecodableFrames);
        }

        let canvas = assemble_canvas(&tiles);
        let (width, height) = canvas.dimensions();
        let frame_count = tiles.len();

        let data = encode_jpeg(canvas)?;

        debug!(
            width,
            height,
            frame_count,
            bytes = data.len(),
            "Composed collage"
        );

        Ok(Collage {
            data,
            mime_type: "image/jpeg",
            width,
            height,
            frame_count,
        })
    }

    /// Decode and scale frames with bounded parallelism, preserving order.
    /// Undecodable frames are logged and dropped.
    async fn decode_tiles(&self, frames: &[PathBuf]) -> Vec<RgbaImage> {
        let decoded: Vec<Option<RgbaImage>> = stream::iter(frames.to_vec())
            .map(|path| async move {
                let display_path = path.clone();

                match tokio::task::spawn_blocking(move || decode_tile(&path)).await {
                    Ok(Ok(tile)) => Some(tile),
                    Ok(Err(e)) => {
                        warn!(
                            path = %display_path.display(),
                            error = %e,
                            "Skipping undecodable frame"
                        );
                        None
                    }
                    Err(e) => {
                        warn!(
                            path = %display_path.display(),
                            error = %e,
                            "Frame decode task panicked"
                        );
                        None
                    }
                }
            })
            .buffered(self.decode_concurrency)
            .collect()
            .await;

        decoded.into_iter().flatten().collect()
    }
}

/// Decode one frame file and scale it to tile width.
fn decode_tile(path: &Path) -> image::ImageResult<RgbaImage> {
    let frame = image::io::Reader::open(path)?
        .with_guessed_format()?
        .decode()?;

    Ok(scale_to_tile(&frame))
}

/// Scale a frame to [`TILE_WIDTH`], preserving its aspect ratio.
fn scale_to_tile(frame: &DynamicImage) -> RgbaImage {
    let width = frame.width().max(1);
    let height = frame.height().max(1);

    let scaled_height = ((height as u64 * TILE_WIDTH as u64) / width as u64).max(1) as u32;

    imageops::resize(&frame.to_rgba8(), TILE_WIDTH, scaled_height, FilterType::Triangle)
}

/// Lay the tiles out side by side, vertically centered on a white canvas.
fn assemble_canvas(tiles: &[RgbaImage]) -> RgbaImage {
    let width = TILE_WIDTH * tiles.len() as u32;
    let height = tiles
        .iter()
        .map(|tile| tile.height())
        .max()
        .unwrap_or(MIN_CANVAS_HEIGHT)
        .max(MIN_CANVAS_HEIGHT);

    // White background so frames with transparency composite cleanly
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

    for (index, tile) in tiles.iter().enumerate() {
        let x = index as u32 * TILE_WIDTH;
        let y = (height - tile.height()) / 2;
        imageops::overlay(&mut canvas, tile, x as i64, y as i64);
    }

    canvas
}

/// Encode the canvas as JPEG at [`JPEG_QUALITY`].
fn encode_jpeg(canvas: RgbaImage) -> Result<Vec<u8>, CollageError> {
    let rgb = DynamicImage::ImageRgba8(canvas).to_rgb8();
    let mut buffer = Cursor::new(Vec::new());

    JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| CollageError::Encode(e.to_string()))?;

    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::TempWorkspace;

    fn test_builder() -> CollageBuilder {
        CollageBuilder::new(&MediaConfig::default())
    }

    fn write_frame(dir: &Path, name: &str, width: u32, height: u32, color: [u8; 4]) -> PathBuf {
        let path = dir.join(name);
        let frame = RgbaImage::from_pixel(width, height, Rgba(color));
        frame.save(&path).unwrap();
        path
    }

    fn decode_collage(collage: &Collage) -> RgbaImage {
        image::load_from_memory(&collage.data).unwrap().to_rgba8()
    }

    #[tokio::test]
    async fn test_two_frames_make_two_tile_strip() {
        let workspace = TempWorkspace::create("collage-test").unwrap();
        let dir = workspace.subdir("frames").unwrap();
        let frames = vec![
            write_frame(&dir, "frame_0001.png", 640, 480, [220, 30, 30, 255]),
            write_frame(&dir, "frame_0002.png", 640, 480, [30, 30, 220, 255]),
        ];

        let collage = test_builder().compose(&frames).await.unwrap();

        assert_eq!(collage.width, 640);
        assert_eq!(collage.height, 240);
        assert_eq!(collage.frame_count, 2);
        assert_eq!(collage.mime_type, "image/jpeg");
    }

    #[tokio::test]
    async fn test_tile_order_matches_frame_order() {
        let workspace = TempWorkspace::create("collage-test").unwrap();
        let dir = workspace.subdir("frames").unwrap();
        let frames = vec![
            write_frame(&dir, "frame_0001.png", 320, 200, [220, 30, 30, 255]),
            write_frame(&dir, "frame_0002.png", 320, 200, [30, 30, 220, 255]),
        ];

        let collage = test_builder().compose(&frames).await.unwrap();
        let pixels = decode_collage(&collage);

        // Sample tile centers; JPEG compression shifts values slightly
        let left = pixels.get_pixel(160, 100);
        let right = pixels.get_pixel(480, 100);
        assert!(left[0] > 150 && left[2] < 100, "left tile should be red");
        assert!(right[2] > 150 && right[0] < 100, "right tile should be blue");
    }

    #[tokio::test]
    async fn test_short_frames_get_height_floor() {
        let workspace = TempWorkspace::create("collage-test").unwrap();
        let dir = workspace.subdir("frames").unwrap();
        // 320x50 stays 320x50 after scaling, well under the floor
        let frames = vec![write_frame(&dir, "frame_0001.png", 320, 50, [0, 180, 0, 255])];

        let collage = test_builder().compose(&frames).await.unwrap();

        assert_eq!(collage.height, MIN_CANVAS_HEIGHT);
        assert_eq!(collage.width, TILE_WIDTH);

        // The short tile sits centered with white bands above and below
        let pixels = decode_collage(&collage);
        let top_band = pixels.get_pixel(160, 10);
        let center = pixels.get_pixel(160, 100);
        assert!(top_band[0] > 200 && top_band[1] > 200 && top_band[2] > 200);
        assert!(center[1] > 120 && center[0] < 100);
    }

    #[tokio::test]
    async fn test_tall_frames_stretch_canvas() {
        let workspace = TempWorkspace::create("collage-test").unwrap();
        let dir = workspace.subdir("frames").unwrap();
        // 100x400 scales to 320x1280
        let frames = vec![write_frame(&dir, "frame_0001.png", 100, 400, [50, 50, 50, 255])];

        let collage = test_builder().compose(&frames).await.unwrap();

        assert_eq!(collage.width, 320);
        assert_eq!(collage.height, 1280);
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_dropped() {
        let workspace = TempWorkspace::create("collage-test").unwrap();
        let dir = workspace.subdir("frames").unwrap();
        let good = write_frame(&dir, "frame_0001.png", 640, 480, [220, 30, 30, 255]);
        let bad = dir.join("frame_0002.png");
        std::fs::write(&bad, b"definitely not a png").unwrap();

        let collage = test_builder().compose(&[good, bad]).await.unwrap();

        assert_eq!(collage.frame_count, 1);
        assert_eq!(collage.width, TILE_WIDTH);
    }

    #[tokio::test]
    async fn test_all_frames_undecodable_is_an_error() {
        let workspace = TempWorkspace::create("collage-test").unwrap();
        let dir = workspace.subdir("frames").unwrap();
        let a = dir.join("frame_0001.png");
        let b = dir.join("frame_0002.png");
        std::fs::write(&a, b"garbage").unwrap();
        std::fs::write(&b, b"more garbage").unwrap();

        let result = test_builder().compose(&[a, b]).await;

        assert!(matches!(result, Err(CollageError::NoDecodableFrames)));
    }

    #[tokio::test]
    async fn test_empty_frame_list_is_an_error() {
        let result = test_builder().compose(&[]).await;

        assert!(matches!(result, Err(CollageError::NoDecodableFrames)));
    }

    #[test]
    fn test_scale_to_tile_preserves_aspect_ratio() {
        let square = DynamicImage::ImageRgba8(RgbaImage::new(10, 10));
        let scaled = scale_to_tile(&square);
        assert_eq!(scaled.dimensions(), (320, 320));

        let landscape = DynamicImage::ImageRgba8(RgbaImage::new(640, 480));
        let scaled = scale_to_tile(&landscape);
        assert_eq!(scaled.dimensions(), (320, 240));
    }
}

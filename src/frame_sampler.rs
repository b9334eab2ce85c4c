//! Frame sampling from uploaded media.
//!
//! Videos are sampled at a fixed rate through an external ffmpeg process so
//! long walkthroughs produce a bounded, evenly spread set of stills. Photo
//! uploads skip extraction entirely and become a single-frame set.

use crate::cleanup::{remove_paths, TempWorkspace};
use crate::config::MediaConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info, instrument};

/// Sampling rate for video extraction, in frames per second.
pub const SAMPLE_FPS: u32 = 1;

/// Errors from frame sampling.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("Frame extraction failed: {0}")]
    Extraction(String),

    #[error("Frame extraction produced no frames")]
    NoFrames,

    #[error("Failed to copy source image: {0}")]
    Copy(String),

    #[error("Workspace IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an upload by MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify a MIME type, tolerating case and surrounding whitespace.
    /// Returns `None` for anything that is not an image or a video.
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let normalized = mime_type.trim().to_ascii_lowercase();

        if normalized.starts_with("image/") {
            Some(MediaKind::Image)
        } else if normalized.starts_with("video/") {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

/// One uploaded media file, held in memory until it is spooled into a
/// scan workspace.
#[derive(Debug, Clone)]
pub struct MediaInput {
    /// Raw upload bytes
    pub bytes: Vec<u8>,
    /// MIME type reported by the client
    pub mime_type: String,
    /// Original file name, for logging only
    pub file_name: String,
}

/// Frames produced by one sampling run, in chronological order.
#[derive(Debug)]
pub struct FrameSet {
    /// Paths of the sampled frames
    pub frames: Vec<PathBuf>,
    /// Directory holding the frames
    pub frames_dir: PathBuf,
}

/// Samples frames from uploads into a scan workspace.
///
/// Extraction runs are throttled by a shared semaphore so a burst of video
/// uploads cannot fork an unbounded number of ffmpeg processes.
pub struct FrameSampler {
    config: MediaConfig,
    extract_permits: Arc<Semaphore>,
}

impl FrameSampler {
    pub fn new(config: MediaConfig) -> Self {
        let permits = config.extract_concurrency.max(1);

        Self {
            extract_permits: Arc::new(Semaphore::new(permits)),
            config,
        }
    }

    /// Sample frames from one upload into the workspace.
    ///
    /// Image uploads become a single frame; video uploads are extracted at
    /// [`SAMPLE_FPS`]. Frames are returned in chronological order.
    #[instrument(skip(self, input, workspace), fields(file_name = %input.file_name, mime_type = %input.mime_type))]
    pub async fn sample(
        &self,
        input: &MediaInput,
        kind: MediaKind,
        workspace: &TempWorkspace,
    ) -> Result<FrameSet, SampleError> {
        let frames_dir = workspace.subdir("frames")?;

        let frames = match kind {
            MediaKind::Image => self.copy_image(input, &frames_dir).await?,
            MediaKind::Video => self.extract_video_frames(input, workspace, &frames_dir).await?,
        };

        info!(frame_count = frames.len(), "Sampled frames from upload");

        Ok(FrameSet { frames, frames_dir })
    }

    /// A photo is already the single frame we want; copy it into the
    /// workspace under the canonical frame name.
    async fn copy_image(
        &self,
        input: &MediaInput,
        frames_dir: &Path,
    ) -> Result<Vec<PathBuf>, SampleError> {
        let frame_path =
            frames_dir.join(format!("frame_0001.{}", extension_for_mime(&input.mime_type)));

        tokio::fs::write(&frame_path, &input.bytes)
            .await
            .map_err(|e| SampleError::Copy(e.to_string()))?;

        Ok(vec![frame_path])
    }

    async fn extract_video_frames(
        &self,
        input: &MediaInput,
        workspace: &TempWorkspace,
        frames_dir: &Path,
    ) -> Result<Vec<PathBuf>, SampleError> {
        let source_path = workspace
            .path()
            .join(format!("source.{}", extension_for_mime(&input.mime_type)));
        tokio::fs::write(&source_path, &input.bytes).await?;

        let output_pattern = frames_dir.join("frame_%04d.png");
        let args = build_extract_args(&source_path, &output_pattern);

        // One permit per ffmpeg process, shared across concurrent scans
        let _permit = self
            .extract_permits
            .acquire()
            .await
            .map_err(|_| SampleError::Extraction("Extraction queue is closed".to_string()))?;

        debug!(
            ffmpeg = %self.config.ffmpeg_path,
            source = %source_path.display(),
            "Running frame extraction"
        );

        let mut command = Command::new(&self.config.ffmpeg_path);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout(self.config.extract_timeout(), command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(SampleError::Extraction(format!(
                    "Failed to spawn {}: {}",
                    self.config.ffmpeg_path, e
                )));
            }
            Err(_) => {
                return Err(SampleError::Extraction(format!(
                    "Frame extraction timed out after {}s",
                    self.config.extract_timeout_secs
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SampleError::Extraction(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let frames = collect_frames(frames_dir).await?;
        if frames.is_empty() {
            return Err(SampleError::NoFrames);
        }

        // The source copy served its purpose once frames exist; reclaim the
        // space before the heavier decode work starts.
        remove_paths(std::slice::from_ref(&source_path), &[]);

        Ok(frames)
    }
}

/// Build the ffmpeg argument list for one extraction run.
fn build_extract_args(source: &Path, output_pattern: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        source.to_string_lossy().into_owned(),
        "-vf".to_string(),
        format!("fps={}", SAMPLE_FPS),
        "-f".to_string(),
        "image2".to_string(),
        output_pattern.to_string_lossy().into_owned(),
    ]
}

/// Collect extracted frame paths in chronological order.
async fn collect_frames(frames_dir: &Path) -> Result<Vec<PathBuf>, SampleError> {
    let mut entries = tokio::fs::read_dir(frames_dir).await?;
    let mut frames = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let is_frame = entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with("frame_"))
            .unwrap_or(false);

        if is_frame {
            frames.push(entry.path());
        }
    }

    // Zero-padded frame names sort chronologically
    frames.sort();

    Ok(frames)
}

/// Map a MIME type to a file extension for workspace file naming.
fn extension_for_mime(mime_type: &str) -> &'static str {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        "video/x-matroska" => "mkv",
        "video/x-msvideo" => "avi",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_input(mime_type: &str) -> MediaInput {
        MediaInput {
            bytes: b"test media bytes".to_vec(),
            mime_type: mime_type.to_string(),
            file_name: "shelf.bin".to_string(),
        }
    }

    #[test]
    fn test_media_kind_classification() {
        assert_eq!(MediaKind::from_mime("image/jpeg"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_mime("image/png"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_mime("video/mp4"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_mime("video/quicktime"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_mime("application/pdf"), None);
        assert_eq!(MediaKind::from_mime("text/plain"), None);
        assert_eq!(MediaKind::from_mime(""), None);
    }

    #[test]
    fn test_media_kind_tolerates_case_and_whitespace() {
        assert_eq!(MediaKind::from_mime(" IMAGE/JPEG "), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_mime("Video/MP4"), Some(MediaKind::Video));
    }

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("image/png"), "png");
        assert_eq!(extension_for_mime("video/mp4"), "mp4");
        assert_eq!(extension_for_mime("video/quicktime"), "mov");
        assert_eq!(extension_for_mime("video/x-matroska"), "mkv");
        assert_eq!(extension_for_mime("application/octet-stream"), "bin");
    }

    #[test]
    fn test_extension_for_mime_ignores_parameters() {
        assert_eq!(extension_for_mime("video/mp4; codecs=avc1"), "mp4");
        assert_eq!(extension_for_mime("IMAGE/PNG"), "png");
    }

    #[test]
    fn test_build_extract_args() {
        let args = build_extract_args(
            Path::new("/tmp/scan/source.mp4"),
            Path::new("/tmp/scan/frames/frame_%04d.png"),
        );

        assert!(args.contains(&"fps=1".to_string()));
        assert!(args.contains(&"/tmp/scan/source.mp4".to_string()));
        assert!(args.contains(&"/tmp/scan/frames/frame_%04d.png".to_string()));

        // Input flag must precede the source path
        let i_pos = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i_pos + 1], "/tmp/scan/source.mp4");
    }

    #[tokio::test]
    async fn test_image_upload_becomes_single_frame() {
        let workspace = TempWorkspace::create("sampler-test").unwrap();
        let sampler = FrameSampler::new(MediaConfig::default());
        let input = create_test_input("image/png");

        let frame_set = sampler
            .sample(&input, MediaKind::Image, &workspace)
            .await
            .unwrap();

        assert_eq!(frame_set.frames.len(), 1);
        assert!(frame_set.frames[0].ends_with("frame_0001.png"));

        let written = std::fs::read(&frame_set.frames[0]).unwrap();
        assert_eq!(written, input.bytes);
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_reports_extraction_error() {
        let workspace = TempWorkspace::create("sampler-test").unwrap();
        let config = MediaConfig {
            ffmpeg_path: "/nonexistent/ffmpeg-for-tests".to_string(),
            ..MediaConfig::default()
        };
        let sampler = FrameSampler::new(config);
        let input = create_test_input("video/mp4");

        let result = sampler.sample(&input, MediaKind::Video, &workspace).await;

        match result {
            Err(SampleError::Extraction(message)) => {
                assert!(message.contains("Failed to spawn"));
            }
            other => panic!("Expected extraction error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_collect_frames_sorts_and_filters() {
        let workspace = TempWorkspace::create("sampler-test").unwrap();
        let frames_dir = workspace.subdir("frames").unwrap();

        std::fs::write(frames_dir.join("frame_0003.png"), b"c").unwrap();
        std::fs::write(frames_dir.join("frame_0001.png"), b"a").unwrap();
        std::fs::write(frames_dir.join("frame_0002.png"), b"b").unwrap();
        std::fs::write(frames_dir.join("source.mp4"), b"not a frame").unwrap();

        let frames = collect_frames(&frames_dir).await.unwrap();

        assert_eq!(frames.len(), 3);
        assert!(frames[0].ends_with("frame_0001.png"));
        assert!(frames[1].ends_with("frame_0002.png"));
        assert!(frames[2].ends_with("frame_0003.png"));
    }
}

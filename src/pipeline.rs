//! End-to-end scan pipeline: media in, product candidates out.
//!
//! One `run` call owns one scan: classify the upload, spool it into a fresh
//! workspace, sample and thin frames, composite, infer, parse. The workspace
//! is removed on every exit path; a scan never leaves scratch files behind.

use crate::cleanup::TempWorkspace;
use crate::collage::{Collage, CollageBuilder, CollageError};
use crate::config::Config;
use crate::frame_sampler::{FrameSampler, MediaInput, MediaKind, SampleError};
use crate::frame_selector::FrameSelector;
use crate::product_parser::{parse_product_listing, ProductCandidate};
use crate::vision_client::{ImagePayload, ProviderRoute, VisionClient, VisionError};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Errors that can end a scan.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Frame sampling failed: {0}")]
    Sample(#[from] SampleError),

    #[error("Collage composition failed: {0}")]
    Collage(#[from] CollageError),

    #[error("Vision inference failed: {0}")]
    Vision(#[from] VisionError),

    #[error("Workspace setup failed: {0}")]
    Workspace(String),
}

/// Result of a completed scan.
#[derive(Debug)]
pub struct ScanOutcome {
    /// Products extracted from the inference text, in response order
    pub products: Vec<ProductCandidate>,
    /// Display name of the provider that answered
    pub provider: String,
    /// Whether the primary or the fallback provider answered
    pub route: ProviderRoute,
    /// Composite strip sent to inference; present only for video scans
    pub collage: Option<Collage>,
}

/// Orchestrates sampling, selection, compositing, inference and parsing.
pub struct ScanPipeline {
    sampler: FrameSampler,
    selector: FrameSelector,
    collage_builder: CollageBuilder,
    vision: VisionClient,
    work_dir: Option<PathBuf>,
}

impl ScanPipeline {
    pub fn new(config: &Config, vision: VisionClient) -> Self {
        Self {
            sampler: FrameSampler::new(config.media.clone()),
            selector: FrameSelector::new(config.media.max_frames),
            collage_builder: CollageBuilder::new(&config.media),
            vision,
            work_dir: config.media.work_dir.as_ref().map(PathBuf::from),
        }
    }

    /// Run a full scan over one uploaded file.
    #[instrument(skip(self, input), fields(file_name = %input.file_name, mime_type = %input.mime_type, size_bytes = input.bytes.len()))]
    pub async fn run(&self, input: MediaInput) -> Result<ScanOutcome, ScanError> {
        let started = Instant::now();
        metrics::counter!("shelfscan.scans.started").increment(1);

        let kind = match MediaKind::from_mime(&input.mime_type) {
            Some(kind) => kind,
            None => {
                metrics::counter!("shelfscan.scans.rejected").increment(1);
                return Err(ScanError::UnsupportedMediaType(input.mime_type.clone()));
            }
        };

        let mut workspace = self
            .create_workspace()
            .map_err(|e| ScanError::Workspace(e.to_string()))?;

        let result = self.run_in_workspace(&input, kind, &workspace).await;

        // Explicit teardown on success and failure alike; the workspace Drop
        // impl covers panics and cancellation.
        workspace.remove_all();

        let elapsed = started.elapsed();
        match &result {
            Ok(outcome) => {
                metrics::counter!("shelfscan.scans.completed").increment(1);
                metrics::counter!("shelfscan.products.extracted")
                    .increment(outcome.products.len() as u64);
                metrics::histogram!("shelfscan.scan.duration_seconds").record(elapsed.as_secs_f64());
                info!(
                    products = outcome.products.len(),
                    provider = %outcome.provider,
                    duration_ms = elapsed.as_millis() as u64,
                    "Scan completed"
                );
            }
            Err(e) => {
                metrics::counter!("shelfscan.scans.failed").increment(1);
                warn!(
                    error = %e,
                    duration_ms = elapsed.as_millis() as u64,
                    "Scan failed"
                );
            }
        }

        result
    }

    fn create_workspace(&self) -> std::io::Result<TempWorkspace> {
        match &self.work_dir {
            Some(dir) => TempWorkspace::create_in(dir, "scan"),
            None => TempWorkspace::create("scan"),
        }
    }

    async fn run_in_workspace(
        &self,
        input: &MediaInput,
        kind: MediaKind,
        workspace: &TempWorkspace,
    ) -> Result<ScanOutcome, ScanError> {
        let frame_set = self.sampler.sample(input, kind, workspace).await?;
        let selected = self.selector.select(frame_set.frames);

        let (payload, collage) = match kind {
            MediaKind::Video => {
                let collage = self.collage_builder.compose(&selected).await?;
                let payload = ImagePayload {
                    data: collage.data.clone(),
                    mime_type: collage.mime_type.to_string(),
                };
                (payload, Some(collage))
            }
            // A photo goes to inference exactly as uploaded; compositing a
            // single tile would only recompress it
            MediaKind::Image => {
                let payload = ImagePayload {
                    data: input.bytes.clone(),
                    mime_type: input.mime_type.clone(),
                };
                (payload, None)
            }
        };

        let inference = self.vision.extract_product_listing(&payload).await?;
        let products = parse_product_listing(&inference.text);

        Ok(ScanOutcome {
            products,
            provider: inference.provider,
            route: inference.route,
            collage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ApiConfig, DatabaseConfig, MediaConfig, ProviderConfig, ProviderKind, ServiceConfig,
        VisionConfig,
    };
    use crate::vision_client::{MockVisionProvider, ProviderError};
    use image::{Rgba, RgbaImage};
    use std::io::Cursor;
    use std::sync::Arc;

    fn create_test_config(work_dir: &std::path::Path) -> Config {
        Config {
            service: ServiceConfig::default(),
            media: MediaConfig {
                work_dir: Some(work_dir.to_string_lossy().into_owned()),
                ..MediaConfig::default()
            },
            vision: VisionConfig {
                primary: ProviderConfig {
                    kind: ProviderKind::Openai,
                    api_key: "unused".to_string(),
                    model: String::new(),
                    base_url: None,
                },
                fallback: None,
                request_timeout_secs: 5,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/unused".to_string(),
                max_connections: 2,
                min_connections: 1,
                connect_timeout_secs: 5,
                idle_timeout_secs: 60,
                run_migrations: false,
            },
            api: ApiConfig::default(),
        }
    }

    fn png_upload() -> MediaInput {
        let frame = RgbaImage::from_pixel(64, 48, Rgba([200, 40, 40, 255]));
        let mut buffer = Cursor::new(Vec::new());
        frame
            .write_to(&mut buffer, image::ImageOutputFormat::Png)
            .unwrap();

        MediaInput {
            bytes: buffer.into_inner(),
            mime_type: "image/png".to_string(),
            file_name: "shelf.png".to_string(),
        }
    }

    fn scratch_entries(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    fn pipeline_with_provider(
        config: &Config,
        provider: MockVisionProvider,
    ) -> ScanPipeline {
        let vision = VisionClient::new(Arc::new(provider), None);
        ScanPipeline::new(config, vision)
    }

    #[tokio::test]
    async fn test_image_scan_extracts_products_and_cleans_up() {
        let scratch = TempWorkspace::create("pipeline-test").unwrap();
        let config = create_test_config(scratch.path());

        let mut provider = MockVisionProvider::new();
        provider
            .expect_describe()
            .times(1)
            .returning(|_, _| Ok("- Coca-Cola 330ml\n\n* iPhone 15 Pro\nNike Air Max".to_string()));
        provider.expect_name().return_const("primary".to_string());

        let pipeline = pipeline_with_provider(&config, provider);
        let outcome = pipeline.run(png_upload()).await.unwrap();

        assert_eq!(outcome.products.len(), 3);
        assert_eq!(outcome.products[0].name, "Coca-Cola 330ml");
        assert_eq!(outcome.route, ProviderRoute::Primary);
        assert!(outcome.collage.is_none(), "photo scans skip the collage");

        assert_eq!(scratch_entries(scratch.path()), 0, "workspace must be removed");
    }

    #[tokio::test]
    async fn test_image_payload_is_the_original_upload() {
        let scratch = TempWorkspace::create("pipeline-test").unwrap();
        let config = create_test_config(scratch.path());
        let upload = png_upload();
        let expected = upload.bytes.clone();

        let mut provider = MockVisionProvider::new();
        provider
            .expect_describe()
            .times(1)
            .withf(move |_, image| image.data == expected && image.mime_type == "image/png")
            .returning(|_, _| Ok("Oreo Original".to_string()));
        provider.expect_name().return_const("primary".to_string());

        let pipeline = pipeline_with_provider(&config, provider);
        let outcome = pipeline.run(upload).await.unwrap();

        assert_eq!(outcome.products.len(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_media_type_is_rejected() {
        let scratch = TempWorkspace::create("pipeline-test").unwrap();
        let config = create_test_config(scratch.path());

        let mut provider = MockVisionProvider::new();
        provider.expect_describe().times(0);
        provider.expect_name().return_const("primary".to_string());

        let pipeline = pipeline_with_provider(&config, provider);
        let input = MediaInput {
            bytes: b"%PDF-1.4".to_vec(),
            mime_type: "application/pdf".to_string(),
            file_name: "catalog.pdf".to_string(),
        };

        let error = pipeline.run(input).await.unwrap_err();

        assert!(matches!(error, ScanError::UnsupportedMediaType(_)));
        assert_eq!(scratch_entries(scratch.path()), 0);
    }

    #[tokio::test]
    async fn test_inference_failure_still_cleans_workspace() {
        let scratch = TempWorkspace::create("pipeline-test").unwrap();
        let config = create_test_config(scratch.path());

        let mut provider = MockVisionProvider::new();
        provider
            .expect_describe()
            .times(1)
            .returning(|_, _| Err(ProviderError::Request("boom".to_string())));
        provider.expect_name().return_const("primary".to_string());

        let pipeline = pipeline_with_provider(&config, provider);
        let error = pipeline.run(png_upload()).await.unwrap_err();

        assert!(matches!(
            error,
            ScanError::Vision(VisionError::NoFallbackConfigured { .. })
        ));
        assert_eq!(scratch_entries(scratch.path()), 0, "workspace must be removed on failure");
    }

    #[tokio::test]
    async fn test_extraction_failure_still_cleans_workspace() {
        let scratch = TempWorkspace::create("pipeline-test").unwrap();
        let mut config = create_test_config(scratch.path());
        config.media.ffmpeg_path = "/nonexistent/ffmpeg-for-tests".to_string();

        let mut provider = MockVisionProvider::new();
        provider.expect_describe().times(0);
        provider.expect_name().return_const("primary".to_string());

        let pipeline = pipeline_with_provider(&config, provider);
        let input = MediaInput {
            bytes: b"fake video".to_vec(),
            mime_type: "video/mp4".to_string(),
            file_name: "walkthrough.mp4".to_string(),
        };

        let error = pipeline.run(input).await.unwrap_err();

        assert!(matches!(error, ScanError::Sample(SampleError::Extraction(_))));
        assert_eq!(scratch_entries(scratch.path()), 0, "workspace must be removed on failure");
    }

    #[tokio::test]
    async fn test_duplicate_products_are_preserved() {
        let scratch = TempWorkspace::create("pipeline-test").unwrap();
        let config = create_test_config(scratch.path());

        let mut provider = MockVisionProvider::new();
        provider
            .expect_describe()
            .times(1)
            .returning(|_, _| Ok("Pepsi 500ml\nPepsi 500ml".to_string()));
        provider.expect_name().return_const("primary".to_string());

        let pipeline = pipeline_with_provider(&config, provider);
        let outcome = pipeline.run(png_upload()).await.unwrap();

        assert_eq!(outcome.products.len(), 2);
        assert_eq!(outcome.products[0].name, outcome.products[1].name);
    }
}

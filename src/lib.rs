//! Shelfscan
//!
//! Media-to-inventory extraction service for shop shelves. A shop owner
//! uploads a short walkthrough video or a photo of their shelves; the service
//! samples frames, composes them into a single collage, asks a vision model
//! which products are in view, and merges the parsed product list into the
//! shop's inventory in PostgreSQL.
//!
//! ## Features
//!
//! - **Bounded Frame Sampling**: ffmpeg extraction at one frame per second
//!   with an evenly spread cap, so an hour-long walkthrough costs the same
//!   downstream as a short clip
//! - **Collage Compositing**: all surviving frames in one fixed-width JPEG
//!   strip, keeping inference to a single request per scan
//! - **Provider Failover**: primary vision provider with a one-shot fallback
//!   and errors that name both causes when everything fails
//! - **Inventory Merging**: append or replace semantics per upload, with
//!   duplicate products preserved as separate rows
//!
//! ## Architecture
//!
//! ```text
//! Upload (video/photo)
//!        │
//!        ▼
//! ┌──────────────┐           ┌──────────────┐          ┌──────────────┐
//! │ Frame        │──────────▶│ Frame        │─────────▶│ Collage      │
//! │ Sampler      │           │ Selector     │          │ Compositor   │
//! └──────────────┘           └──────────────┘          └──────────────┘
//!                                                             │
//!                                                             ▼
//! ┌──────────────┐           ┌──────────────┐          ┌──────────────┐
//! │ Inventory    │◀──────────│ Product      │◀─────────│ Vision       │
//! │ Store        │           │ Parser       │          │ Client       │
//! └──────────────┘           └──────────────┘          └──────────────┘
//! ```

pub mod cleanup;
pub mod collage;
pub mod config;
pub mod frame_sampler;
pub mod frame_selector;
pub mod inventory_store;
pub mod pipeline;
pub mod product_parser;
pub mod scan_api;
pub mod vision_client;

pub use cleanup::TempWorkspace;
pub use collage::{Collage, CollageBuilder, CollageError};
pub use config::Config;
pub use frame_sampler::{FrameSampler, FrameSet, MediaInput, MediaKind, SampleError};
pub use frame_selector::FrameSelector;
pub use inventory_store::{InventoryItem, InventoryStore, MergeMode};
pub use pipeline::{ScanError, ScanOutcome, ScanPipeline};
pub use product_parser::{parse_product_listing, ProductCandidate};
pub use scan_api::{create_router, AppState, ScanResponse};
pub use vision_client::{
    GeminiVision, ImagePayload, InferenceResult, OpenAiVision, ProviderRoute, VisionClient,
    VisionError, VisionProvider,
};

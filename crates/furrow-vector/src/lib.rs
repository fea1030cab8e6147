//! Furrow vector crate - embedding providers, CLIP encoder, vector indexes
//! and the retrieval engine.
//!
//! Text and image embeddings live in separate spaces and separate indexes.
//! The text side uses the configured [`EmbeddingProvider`] (remote API or a
//! local ONNX model, with fallback under `auto`); the image side uses a
//! [`ClipEncoder`], whose text tower also embeds queries for cross-modal
//! search.

pub mod clip;
pub mod digest;
pub mod embedding;
pub mod engine;
pub mod image_meta;
pub mod index;
pub mod provider;
pub mod remote;

pub use clip::{
    ClipEncoder, ClipStatus, DisabledClipEncoder, DynClipEncoder, ImageInput, MockClipEncoder,
    OnnxClipEncoder, CLIP_DIMENSIONS,
};
pub use digest::{embedding_text, text_metadata};
pub use embedding::{EmbeddingService, MockEmbedding, OnnxEmbeddingService};
pub use engine::{
    EmbeddingOutcome, EngineHealth, ImageSearchResults, ImageUpload, PhotoIngest, PhotoListing,
    ReconcileReport, RetrievalEngine, SyncOutcome, VisitView,
};
pub use image_meta::{extract_image_metadata, ImageMetadata};
pub use index::{IndexMatch, MetadataFilter, VectorIndex};
pub use provider::{EmbeddingProvider, LazyLocalEmbedding, ProviderStatus};
pub use remote::{OpenAiEmbeddingService, RemoteEmbeddingConfig};

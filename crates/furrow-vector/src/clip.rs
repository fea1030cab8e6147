//! CLIP image and cross-modal text encoder.
//!
//! Image vectors and query-text vectors share one 512-dimensional space,
//! separate from the text provider's space. Only vectors from this module
//! may be compared against the image index.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use image::imageops::FilterType;
use image::DynamicImage;
use ort::session::Session;
use ort::value::TensorRef;
use serde::Serialize;
use tokenizers::Tokenizer;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use furrow_core::config::ClipConfig;
use furrow_core::error::FurrowError;

use crate::embedding::l2_normalize;

/// Dimensionality of the joint image/text space.
pub const CLIP_DIMENSIONS: usize = 512;
/// Input resolution of the vision tower.
pub const CLIP_IMAGE_SIZE: u32 = 224;
/// Context length of the text tower.
pub const CLIP_MAX_TOKENS: usize = 77;

const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// An image to embed, in whichever form the caller has it.
#[derive(Debug, Clone)]
pub enum ImageInput {
    /// A file on disk.
    Path(PathBuf),
    /// Encoded image bytes (JPEG, PNG, ...).
    Bytes(Vec<u8>),
    /// An already decoded image.
    Decoded(DynamicImage),
    /// Base64 of encoded image bytes, without any `data:` prefix.
    Base64(String),
}

impl ImageInput {
    /// Decode to an in-memory image.
    pub fn decode(&self) -> Result<DynamicImage, FurrowError> {
        match self {
            ImageInput::Decoded(img) => Ok(img.clone()),
            ImageInput::Path(path) => image::open(path)
                .map_err(|e| FurrowError::Image(format!("{}: {}", path.display(), e))),
            ImageInput::Bytes(bytes) => decode_bytes(bytes),
            ImageInput::Base64(_) => decode_bytes(&self.clone().into_bytes()?),
        }
    }

    /// Encoded bytes of the image. Decoded images are re-encoded as PNG.
    pub fn into_bytes(self) -> Result<Vec<u8>, FurrowError> {
        match self {
            ImageInput::Bytes(bytes) => Ok(bytes),
            ImageInput::Path(path) => Ok(std::fs::read(path)?),
            ImageInput::Base64(data) => {
                let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
                base64::engine::general_purpose::STANDARD
                    .decode(compact.as_bytes())
                    .map_err(|e| FurrowError::Image(format!("invalid base64: {}", e)))
            }
            ImageInput::Decoded(img) => {
                let mut out = std::io::Cursor::new(Vec::new());
                img.write_to(&mut out, image::ImageFormat::Png)
                    .map_err(|e| FurrowError::Image(format!("encode png: {}", e)))?;
                Ok(out.into_inner())
            }
        }
    }
}

fn decode_bytes(bytes: &[u8]) -> Result<DynamicImage, FurrowError> {
    image::load_from_memory(bytes).map_err(|e| FurrowError::Image(format!("decode: {}", e)))
}

// ---------------------------------------------------------------------------
// Encoder trait
// ---------------------------------------------------------------------------

/// Availability of the CLIP encoder, for health checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClipStatus {
    pub available: bool,
    pub device: Option<String>,
    pub model_name: Option<String>,
    pub error: Option<String>,
}

/// Produces image vectors and query-text vectors in the same space.
///
/// A failure affects only the call that hit it.
pub trait ClipEncoder: Send + Sync {
    /// Unit-length image embedding.
    fn embed_image(
        &self,
        input: &ImageInput,
    ) -> impl std::future::Future<Output = Result<Vec<f32>, FurrowError>> + Send;

    /// Unit-length embedding of `text` in the image space.
    fn embed_query_text(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Vec<f32>, FurrowError>> + Send;

    fn status(&self) -> impl std::future::Future<Output = ClipStatus> + Send;

    /// Model name recorded alongside generated embeddings.
    fn model_name(&self) -> &str;
}

/// Boxed CLIP future.
pub type ClipFuture<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`ClipEncoder`], so the engine can hold an
/// `Arc<dyn DynClipEncoder>`. Every `ClipEncoder` implements it.
pub trait DynClipEncoder: Send + Sync {
    fn embed_image_boxed<'a>(
        &'a self,
        input: &'a ImageInput,
    ) -> ClipFuture<'a, Result<Vec<f32>, FurrowError>>;

    fn embed_query_text_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> ClipFuture<'a, Result<Vec<f32>, FurrowError>>;

    fn status_boxed(&self) -> ClipFuture<'_, ClipStatus>;

    fn model_name(&self) -> &str;
}

impl<T: ClipEncoder> DynClipEncoder for T {
    fn embed_image_boxed<'a>(
        &'a self,
        input: &'a ImageInput,
    ) -> ClipFuture<'a, Result<Vec<f32>, FurrowError>> {
        Box::pin(self.embed_image(input))
    }

    fn embed_query_text_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> ClipFuture<'a, Result<Vec<f32>, FurrowError>> {
        Box::pin(self.embed_query_text(text))
    }

    fn status_boxed(&self) -> ClipFuture<'_, ClipStatus> {
        Box::pin(self.status())
    }

    fn model_name(&self) -> &str {
        ClipEncoder::model_name(self)
    }
}

// ---------------------------------------------------------------------------
// OnnxClipEncoder
// ---------------------------------------------------------------------------

/// Device preference from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreference {
    Auto,
    Cpu,
    Cuda,
}

impl DevicePreference {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "cpu" => DevicePreference::Cpu,
            "cuda" | "gpu" => DevicePreference::Cuda,
            _ => DevicePreference::Auto,
        }
    }
}

struct ClipModels {
    vision: Mutex<Session>,
    text: Mutex<Session>,
    tokenizer: Tokenizer,
    device: &'static str,
}

/// CLIP ViT-B/32 exported to ONNX as separate vision and text towers.
///
/// Expects a model directory containing `vision_model.onnx`,
/// `text_model.onnx` and `tokenizer.json`. Models load on first use.
pub struct OnnxClipEncoder {
    model_dir: PathBuf,
    model_name: String,
    device: DevicePreference,
    models: OnceCell<Arc<ClipModels>>,
}

impl OnnxClipEncoder {
    pub fn new(model_dir: PathBuf, model_name: impl Into<String>, device: DevicePreference) -> Self {
        Self {
            model_dir,
            model_name: model_name.into(),
            device,
            models: OnceCell::new(),
        }
    }

    pub fn from_config(config: &ClipConfig, model_dir: PathBuf) -> Self {
        Self::new(
            model_dir,
            config.model_name.clone(),
            DevicePreference::parse(&config.device),
        )
    }

    async fn models(&self) -> Result<Arc<ClipModels>, FurrowError> {
        self.models
            .get_or_try_init(|| async {
                let dir = self.model_dir.clone();
                let device = self.device;
                let loaded = tokio::task::spawn_blocking(move || load_models(&dir, device))
                    .await
                    .map_err(|e| {
                        FurrowError::ProviderUnavailable(format!("CLIP load task failed: {}", e))
                    })?;
                match &loaded {
                    Ok(m) => info!(model = %self.model_name, device = m.device, "CLIP model ready"),
                    Err(e) => warn!(model = %self.model_name, error = %e, "CLIP model unavailable"),
                }
                loaded.map(Arc::new)
            })
            .await
            .cloned()
    }
}

fn load_models(dir: &Path, preference: DevicePreference) -> Result<ClipModels, FurrowError> {
    let vision_path = dir.join("vision_model.onnx");
    let text_path = dir.join("text_model.onnx");
    let tokenizer_path = dir.join("tokenizer.json");
    for p in [&vision_path, &text_path, &tokenizer_path] {
        if !p.exists() {
            return Err(FurrowError::ProviderUnavailable(format!(
                "CLIP model file not found at {}",
                p.display()
            )));
        }
    }

    let device = select_device(preference);
    let vision = build_session(&vision_path, device)?;
    let text = build_session(&text_path, device)?;
    let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
        FurrowError::ProviderUnavailable(format!("Failed to load CLIP tokenizer: {}", e))
    })?;

    Ok(ClipModels {
        vision: Mutex::new(vision),
        text: Mutex::new(text),
        tokenizer,
        device,
    })
}

fn select_device(preference: DevicePreference) -> &'static str {
    use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};

    if preference == DevicePreference::Cpu {
        return "cpu";
    }
    match CUDAExecutionProvider::default().is_available() {
        Ok(true) => "cuda",
        _ => {
            if preference == DevicePreference::Cuda {
                warn!("CUDA requested for CLIP but not available, using CPU");
            }
            "cpu"
        }
    }
}

fn build_session(path: &Path, device: &str) -> Result<Session, FurrowError> {
    use ort::execution_providers::CUDAExecutionProvider;

    let unavailable = |e: ort::Error| {
        FurrowError::ProviderUnavailable(format!("CLIP session {}: {}", path.display(), e))
    };
    let mut builder = Session::builder().map_err(unavailable)?;
    if device == "cuda" {
        builder = builder
            .with_execution_providers([CUDAExecutionProvider::default().build()])
            .map_err(unavailable)?;
    }
    builder.commit_from_file(path).map_err(unavailable)
}

/// RGB, shortest side to 224 (bicubic), centre crop, CLIP mean/std.
/// Returns a `[1, 3, 224, 224]` tensor.
pub fn preprocess(img: &DynamicImage) -> Result<ndarray::Array4<f32>, FurrowError> {
    let rgb = img.to_rgb8();
    let (w, h) = rgb.dimensions();
    if w == 0 || h == 0 {
        return Err(FurrowError::Image("image has zero size".to_string()));
    }

    let size = CLIP_IMAGE_SIZE;
    let scale = size as f32 / w.min(h) as f32;
    let new_w = ((w as f32 * scale).round() as u32).max(size);
    let new_h = ((h as f32 * scale).round() as u32).max(size);
    let resized = image::imageops::resize(&rgb, new_w, new_h, FilterType::CatmullRom);

    let left = (new_w - size) / 2;
    let top = (new_h - size) / 2;
    let cropped = image::imageops::crop_imm(&resized, left, top, size, size).to_image();

    let s = size as usize;
    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, s, s));
    for (x, y, pixel) in cropped.enumerate_pixels() {
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (v - CLIP_MEAN[c]) / CLIP_STD[c];
        }
    }
    Ok(tensor)
}

/// Token ids and mask for the text tower, capped at the context length.
fn tokenize(tokenizer: &Tokenizer, text: &str) -> Result<(Vec<i64>, Vec<i64>), FurrowError> {
    let encoding = tokenizer
        .encode(text, true)
        .map_err(|e| FurrowError::ProviderUnavailable(format!("CLIP tokenization: {}", e)))?;

    let mut ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
    if ids.len() > CLIP_MAX_TOKENS {
        // keep the end-of-text token, which the text tower pools on
        let eot = ids[ids.len() - 1];
        ids.truncate(CLIP_MAX_TOKENS);
        ids[CLIP_MAX_TOKENS - 1] = eot;
    }
    let mask = vec![1i64; ids.len()];
    Ok((ids, mask))
}

fn extract_embedding(
    outputs: &ort::session::SessionOutputs<'_>,
    name: &str,
) -> Result<Vec<f32>, FurrowError> {
    let value = outputs.get(name).ok_or_else(|| {
        FurrowError::ProviderUnavailable(format!("CLIP output '{}' missing", name))
    })?;
    let (_shape, data) = value
        .try_extract_tensor::<f32>()
        .map_err(|e| FurrowError::ProviderUnavailable(format!("CLIP extract {}: {}", name, e)))?;

    let mut v = data.to_vec();
    if v.len() != CLIP_DIMENSIONS {
        return Err(FurrowError::ProviderUnavailable(format!(
            "CLIP {} has {} dims, expected {}",
            name,
            v.len(),
            CLIP_DIMENSIONS
        )));
    }
    l2_normalize(&mut v);
    Ok(v)
}

impl ClipModels {
    fn embed_pixels(&self, pixels: ndarray::Array4<f32>) -> Result<Vec<f32>, FurrowError> {
        let input = TensorRef::from_array_view(&pixels)
            .map_err(|e| FurrowError::ProviderUnavailable(format!("pixel tensor: {}", e)))?;
        let mut session = self
            .vision
            .lock()
            .map_err(|e| FurrowError::ProviderUnavailable(format!("Session lock poisoned: {}", e)))?;
        let outputs = session
            .run(ort::inputs!["pixel_values" => input])
            .map_err(|e| FurrowError::ProviderUnavailable(format!("CLIP vision inference: {}", e)))?;
        extract_embedding(&outputs, "image_embeds")
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>, FurrowError> {
        let (ids, mask) = tokenize(&self.tokenizer, text)?;
        let len = ids.len();
        let ids_array = ndarray::Array2::from_shape_vec((1, len), ids)
            .map_err(|e| FurrowError::ProviderUnavailable(format!("input_ids array: {}", e)))?;
        let mask_array = ndarray::Array2::from_shape_vec((1, len), mask)
            .map_err(|e| FurrowError::ProviderUnavailable(format!("attention_mask array: {}", e)))?;

        let ids_ref = TensorRef::from_array_view(&ids_array)
            .map_err(|e| FurrowError::ProviderUnavailable(format!("TensorRef input_ids: {}", e)))?;
        let mask_ref = TensorRef::from_array_view(&mask_array).map_err(|e| {
            FurrowError::ProviderUnavailable(format!("TensorRef attention_mask: {}", e))
        })?;

        let mut session = self
            .text
            .lock()
            .map_err(|e| FurrowError::ProviderUnavailable(format!("Session lock poisoned: {}", e)))?;
        let outputs = session
            .run(ort::inputs![
                "input_ids" => ids_ref,
                "attention_mask" => mask_ref,
            ])
            .map_err(|e| FurrowError::ProviderUnavailable(format!("CLIP text inference: {}", e)))?;
        extract_embedding(&outputs, "text_embeds")
    }
}

impl ClipEncoder for OnnxClipEncoder {
    async fn embed_image(&self, input: &ImageInput) -> Result<Vec<f32>, FurrowError> {
        let models = self.models().await?;
        let input = input.clone();
        tokio::task::spawn_blocking(move || {
            let pixels = preprocess(&input.decode()?)?;
            models.embed_pixels(pixels)
        })
        .await
        .map_err(|e| FurrowError::ProviderUnavailable(format!("CLIP task panicked: {}", e)))?
    }

    async fn embed_query_text(&self, text: &str) -> Result<Vec<f32>, FurrowError> {
        if text.trim().is_empty() {
            return Err(FurrowError::EmptyInput);
        }
        let models = self.models().await?;
        let text = text.to_string();
        tokio::task::spawn_blocking(move || models.embed_text(&text))
            .await
            .map_err(|e| FurrowError::ProviderUnavailable(format!("CLIP task panicked: {}", e)))?
    }

    async fn status(&self) -> ClipStatus {
        match self.models().await {
            Ok(models) => ClipStatus {
                available: true,
                device: Some(models.device.to_string()),
                model_name: Some(self.model_name.clone()),
                error: None,
            },
            Err(e) => ClipStatus {
                available: false,
                device: None,
                model_name: Some(self.model_name.clone()),
                error: Some(e.to_string()),
            },
        }
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

// ---------------------------------------------------------------------------
// DisabledClipEncoder
// ---------------------------------------------------------------------------

/// Stand-in used when image embeddings are turned off in configuration.
#[derive(Debug, Clone)]
pub struct DisabledClipEncoder {
    model_name: String,
}

impl DisabledClipEncoder {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
        }
    }
}

impl ClipEncoder for DisabledClipEncoder {
    async fn embed_image(&self, _input: &ImageInput) -> Result<Vec<f32>, FurrowError> {
        Err(FurrowError::ProviderUnavailable(
            "image embeddings are disabled".to_string(),
        ))
    }

    async fn embed_query_text(&self, _text: &str) -> Result<Vec<f32>, FurrowError> {
        Err(FurrowError::ProviderUnavailable(
            "image embeddings are disabled".to_string(),
        ))
    }

    async fn status(&self) -> ClipStatus {
        ClipStatus {
            available: false,
            device: None,
            model_name: Some(self.model_name.clone()),
            error: Some("disabled in configuration".to_string()),
        }
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

// ---------------------------------------------------------------------------
// MockClipEncoder - deterministic vectors for testing
// ---------------------------------------------------------------------------

/// Mock encoder producing deterministic 512-d unit vectors.
///
/// Images must still decode. `failing()` builds an encoder whose every call
/// fails, for partial-failure tests.
#[derive(Debug, Clone, Default)]
pub struct MockClipEncoder {
    fail: bool,
}

impl MockClipEncoder {
    pub fn new() -> Self {
        Self { fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }

    fn vector_for<H: Hash + ?Sized>(value: &H) -> Vec<f32> {
        let mut v = Vec::with_capacity(CLIP_DIMENSIONS);
        for i in 0..CLIP_DIMENSIONS {
            let mut hasher = DefaultHasher::new();
            value.hash(&mut hasher);
            i.hash(&mut hasher);
            v.push(((hasher.finish() as f64 / u64::MAX as f64) * 2.0 - 1.0) as f32);
        }
        l2_normalize(&mut v);
        v
    }
}

impl ClipEncoder for MockClipEncoder {
    async fn embed_image(&self, input: &ImageInput) -> Result<Vec<f32>, FurrowError> {
        if self.fail {
            return Err(FurrowError::ProviderUnavailable("mock CLIP failure".into()));
        }
        let img = input.decode()?;
        Ok(Self::vector_for(img.to_rgb8().as_raw().as_slice()))
    }

    async fn embed_query_text(&self, text: &str) -> Result<Vec<f32>, FurrowError> {
        if self.fail {
            return Err(FurrowError::ProviderUnavailable("mock CLIP failure".into()));
        }
        if text.trim().is_empty() {
            return Err(FurrowError::EmptyInput);
        }
        Ok(Self::vector_for(text))
    }

    async fn status(&self) -> ClipStatus {
        ClipStatus {
            available: !self.fail,
            device: Some("cpu".to_string()),
            model_name: Some(ClipEncoder::model_name(self).to_string()),
            error: self.fail.then(|| "mock CLIP failure".to_string()),
        }
    }

    fn model_name(&self) -> &str {
        "mock-clip"
    }
}

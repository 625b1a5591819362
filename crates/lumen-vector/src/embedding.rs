//! Embedding service trait and implementations.
//!
//! - `OnnxClipEmbedding` runs the CLIP ViT-B/32 vision and text encoders via
//!   ort, decodes images with the `image` crate and tokenizes with the
//!   HuggingFace tokenizers crate. This is the production embedding backend.
//! - `MockEmbedding` provides deterministic hash-based vectors for testing.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex};

use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use lumen_core::error::LumenError;
use ort::session::Session;
use ort::value::TensorRef;
use tokenizers::{
    PaddingDirection, PaddingParams, PaddingStrategy, Tokenizer, TruncationDirection,
    TruncationParams, TruncationStrategy,
};
use tracing::info;

/// Service for generating image and text embeddings in a shared space.
///
/// Image and text vectors are comparable, so a text query can retrieve photos.
/// Outputs are unit length by convention.
pub trait EmbeddingService: Send + Sync {
    /// Embed raw (encoded) image bytes.
    fn embed_image(
        &self,
        bytes: &[u8],
    ) -> impl std::future::Future<Output = Result<Vec<f32>, LumenError>> + Send;

    /// Embed a text query.
    fn embed_text(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Vec<f32>, LumenError>> + Send;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

type BoxedEmbedding<'a> =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, LumenError>> + Send + 'a>>;

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// `EmbeddingService` returns `impl Future` and is therefore not object-safe.
/// This trait boxes the futures so the worker and the search engine can share
/// one `Arc<dyn DynEmbeddingService>` chosen at start-up.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_image_boxed<'a>(&'a self, bytes: &'a [u8]) -> BoxedEmbedding<'a>;

    fn embed_text_boxed<'a>(&'a self, text: &'a str) -> BoxedEmbedding<'a>;

    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_image_boxed<'a>(&'a self, bytes: &'a [u8]) -> BoxedEmbedding<'a> {
        Box::pin(self.embed_image(bytes))
    }

    fn embed_text_boxed<'a>(&'a self, text: &'a str) -> BoxedEmbedding<'a> {
        Box::pin(self.embed_text(text))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

/// L2-normalize in place; a zero vector is left unchanged.
pub fn l2_normalize(values: &mut [f32]) {
    let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in values.iter_mut() {
            *val /= norm;
        }
    }
}

// ---------------------------------------------------------------------------
// OnnxClipEmbedding - real ONNX Runtime inference
// ---------------------------------------------------------------------------

const CLIP_INPUT_SIZE: usize = 224;
const CLIP_CONTEXT_LENGTH: usize = 77;
const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// CLIP embedding service backed by ONNX Runtime.
///
/// Expects a model directory containing:
/// - `vision.onnx` - the image encoder, input `[1, 3, 224, 224]`
/// - `text.onnx` - the text encoder, inputs `input_ids` and optionally
///   `attention_mask`, both `[1, 77]`
/// - `tokenizer.json` - the matching HuggingFace fast-tokenizer file
///
/// The first output of each encoder is taken as the embedding.
pub struct OnnxClipEmbedding {
    vision: Arc<Mutex<Session>>,
    text: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    dimensions: usize,
}

impl std::fmt::Debug for OnnxClipEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxClipEmbedding")
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl Clone for OnnxClipEmbedding {
    fn clone(&self) -> Self {
        Self {
            vision: Arc::clone(&self.vision),
            text: Arc::clone(&self.text),
            tokenizer: Arc::clone(&self.tokenizer),
            dimensions: self.dimensions,
        }
    }
}

impl OnnxClipEmbedding {
    /// Load both encoders and the tokenizer from `model_dir`.
    pub fn from_directory(model_dir: &Path, dimensions: usize) -> Result<Self, LumenError> {
        let vision_path = model_dir.join("vision.onnx");
        let text_path = model_dir.join("text.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        for path in [&vision_path, &text_path, &tokenizer_path] {
            if !path.exists() {
                return Err(LumenError::Embedding(format!(
                    "Model file not found at {}",
                    path.display()
                )));
            }
        }

        let vision = load_session(&vision_path)?;
        let text = load_session(&text_path)?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| LumenError::Embedding(format!("Failed to load tokenizer: {}", e)))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(CLIP_CONTEXT_LENGTH),
            direction: PaddingDirection::Right,
            pad_to_multiple_of: None,
            pad_id: 0,
            pad_type_id: 0,
            pad_token: "[PAD]".to_string(),
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: CLIP_CONTEXT_LENGTH,
                strategy: TruncationStrategy::LongestFirst,
                stride: 0,
                direction: TruncationDirection::Right,
            }))
            .map_err(|e| LumenError::Embedding(format!("Tokenizer truncation: {}", e)))?;

        info!(
            model_dir = %model_dir.display(),
            dimensions,
            "Loaded CLIP embedding model"
        );

        Ok(Self {
            vision: Arc::new(Mutex::new(vision)),
            text: Arc::new(Mutex::new(text)),
            tokenizer: Arc::new(tokenizer),
            dimensions,
        })
    }

    /// Decode, resize the shortest side to 224, center-crop to 224x224 and
    /// normalize into an NCHW tensor buffer.
    fn preprocess(bytes: &[u8]) -> Result<ndarray::Array4<f32>, LumenError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| LumenError::Embedding(format!("Failed to decode image: {}", e)))?;
        let rgb = resize_and_center_crop(&img, CLIP_INPUT_SIZE as u32);

        let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, CLIP_INPUT_SIZE, CLIP_INPUT_SIZE));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for channel in 0..3 {
                let value = pixel[channel] as f32 / 255.0;
                tensor[[0, channel, y as usize, x as usize]] =
                    (value - CLIP_MEAN[channel]) / CLIP_STD[channel];
            }
        }
        Ok(tensor)
    }

    fn embed_image_sync(&self, bytes: &[u8]) -> Result<Vec<f32>, LumenError> {
        let pixels = Self::preprocess(bytes)?;
        let pixel_ref = TensorRef::from_array_view(&pixels)
            .map_err(|e| LumenError::Embedding(format!("TensorRef pixel_values: {}", e)))?;

        let mut session = self
            .vision
            .lock()
            .map_err(|e| LumenError::Embedding(format!("Session lock poisoned: {}", e)))?;
        let outputs = session
            .run(ort::inputs![pixel_ref])
            .map_err(|e| LumenError::Embedding(format!("Vision inference failed: {}", e)))?;

        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LumenError::Embedding(format!("Extract image embedding: {}", e)))?;

        self.finish(data.to_vec())
    }

    fn embed_text_sync(&self, text: &str) -> Result<Vec<f32>, LumenError> {
        if text.trim().is_empty() {
            return Err(LumenError::Embedding("Cannot embed empty text".to_string()));
        }

        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| LumenError::Embedding(format!("Tokenization failed: {}", e)))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let seq_len = input_ids.len();

        let ids_array = ndarray::Array2::from_shape_vec((1, seq_len), input_ids)
            .map_err(|e| LumenError::Embedding(format!("input_ids array: {}", e)))?;
        let mask_array = ndarray::Array2::from_shape_vec((1, seq_len), attention_mask)
            .map_err(|e| LumenError::Embedding(format!("attention_mask array: {}", e)))?;

        let ids_ref = TensorRef::from_array_view(&ids_array)
            .map_err(|e| LumenError::Embedding(format!("TensorRef input_ids: {}", e)))?;
        let mask_ref = TensorRef::from_array_view(&mask_array)
            .map_err(|e| LumenError::Embedding(format!("TensorRef attention_mask: {}", e)))?;

        let mut session = self
            .text
            .lock()
            .map_err(|e| LumenError::Embedding(format!("Session lock poisoned: {}", e)))?;

        // Some text exports take only input_ids.
        let outputs = if session.inputs().len() >= 2 {
            session.run(ort::inputs![ids_ref, mask_ref])
        } else {
            session.run(ort::inputs![ids_ref])
        }
        .map_err(|e| LumenError::Embedding(format!("Text inference failed: {}", e)))?;

        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LumenError::Embedding(format!("Extract text embedding: {}", e)))?;

        self.finish(data.to_vec())
    }

    fn finish(&self, mut embedding: Vec<f32>) -> Result<Vec<f32>, LumenError> {
        if embedding.len() != self.dimensions {
            return Err(LumenError::Embedding(format!(
                "Model produced {} values, expected {}",
                embedding.len(),
                self.dimensions
            )));
        }
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

fn load_session(path: &Path) -> Result<Session, LumenError> {
    Session::builder()
        .map_err(|e| LumenError::Embedding(format!("ONNX session builder: {}", e)))?
        .with_intra_threads(1)
        .map_err(|e| LumenError::Embedding(format!("ONNX set threads: {}", e)))?
        .commit_from_file(path)
        .map_err(|e| LumenError::Embedding(format!("ONNX load {}: {}", path.display(), e)))
}

/// Scale so the shortest side equals `size` (aspect preserved, bicubic),
/// then take the central `size` x `size` square.
fn resize_and_center_crop(img: &DynamicImage, size: u32) -> RgbImage {
    let (w, h) = (img.width().max(1), img.height().max(1));
    let scale = size as f64 / w.min(h) as f64;
    let new_w = ((w as f64 * scale).round() as u32).max(size);
    let new_h = ((h as f64 * scale).round() as u32).max(size);
    let resized = img.resize_exact(new_w, new_h, FilterType::CatmullRom);

    let x = (new_w - size) / 2;
    let y = (new_h - size) / 2;
    resized.crop_imm(x, y, size, size).to_rgb8()
}

impl EmbeddingService for OnnxClipEmbedding {
    async fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, LumenError> {
        // ONNX Runtime inference is CPU-bound; run on a blocking thread.
        let svc = self.clone();
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || svc.embed_image_sync(&bytes))
            .await
            .map_err(|e| LumenError::Embedding(format!("Embedding task panicked: {}", e)))?
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, LumenError> {
        let svc = self.clone();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || svc.embed_text_sync(&text))
            .await
            .map_err(|e| LumenError::Embedding(format!("Embedding task panicked: {}", e)))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors for testing
// ---------------------------------------------------------------------------

/// Mock embedding service that returns deterministic unit vectors.
///
/// The output is derived from a hash of the input bytes. Text is hashed as
/// its UTF-8 bytes, so `embed_text("x")` equals `embed_image(b"x")`, which
/// lets tests retrieve an image by "describing" it.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimensions: usize,
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self { dimensions: 512 }
    }
}

impl MockEmbedding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Deterministic unit vector for `bytes`.
    pub fn vector_for(&self, bytes: &[u8]) -> Vec<f32> {
        let mut result = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            let mut hasher = DefaultHasher::new();
            bytes.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }
        l2_normalize(&mut result);
        result
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, LumenError> {
        if bytes.is_empty() {
            return Err(LumenError::Embedding("Cannot embed empty image".to_string()));
        }
        Ok(self.vector_for(bytes))
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, LumenError> {
        if text.is_empty() {
            return Err(LumenError::Embedding("Cannot embed empty text".to_string()));
        }
        Ok(self.vector_for(text.as_bytes()))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

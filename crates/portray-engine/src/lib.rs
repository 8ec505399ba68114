use std::env;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use portray_contracts::errors::GenerationError;
use portray_contracts::events::{EventPayload, EventWriter};
use portray_contracts::history::{HistoryAdapter, HistoryStore, KeyValueStore, ProcessedImageRecord};
use portray_contracts::options::ProcessingOptions;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Hard ceiling on the picked file before anything else happens.
pub const UPLOAD_LIMIT_BYTES: usize = 10 * 1024 * 1024;

/// Budget for the re-encoded upload payload sent to the provider.
pub const COMPRESSION_CEILING_BYTES: usize = 4 * 1024 * 1024;

/// Model used with the shared/default key.
pub const STANDARD_MODEL: &str = "gemini-2.5-flash-image";
/// Model used when the user supplies their own key.
pub const PREMIUM_MODEL: &str = "gemini-2.5-pro-image";

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);
const REFUSAL_MAX_CHARS: usize = 200;

/// Cosmetic status line per progress step. Advancement is timer-driven and
/// uncorrelated with actual remote progress.
pub const PROCESSING_STEPS: [&str; 6] = [
    "Analyzing facial features...",
    "Adjusting studio lighting...",
    "Removing original background...",
    "Applying white balance...",
    "Refining professional detail...",
    "Finalizing portrait...",
];

pub const PROGRESS_STEP_PERIOD: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Encoded images and data URIs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl EncodedImage {
    pub fn data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            BASE64.encode(&self.bytes)
        )
    }
}

/// Splits `data:<mime>;base64,<payload>` into bytes and MIME type. Raw bytes
/// without the prefix are passed through with a sniffed MIME type.
pub fn parse_data_uri(input: &str) -> Result<EncodedImage, GenerationError> {
    let Some(rest) = input.strip_prefix("data:") else {
        let bytes = input.as_bytes().to_vec();
        let mime_type = sniff_mime(&bytes)?;
        return Ok(EncodedImage { bytes, mime_type });
    };
    let Some((header, payload)) = rest.split_once(',') else {
        return Err(GenerationError::UnsupportedFormat);
    };
    let mime_type = header
        .trim_end_matches(";base64")
        .trim()
        .to_string();
    if mime_type.is_empty() || !header.ends_with(";base64") {
        return Err(GenerationError::UnsupportedFormat);
    }
    let bytes = BASE64
        .decode(payload.as_bytes())
        .map_err(|_| GenerationError::UnsupportedFormat)?;
    Ok(EncodedImage { bytes, mime_type })
}

fn sniff_mime(bytes: &[u8]) -> Result<String, GenerationError> {
    let format = image::guess_format(bytes).map_err(|_| GenerationError::UnsupportedFormat)?;
    Ok(format.to_mime_type().to_string())
}

// ---------------------------------------------------------------------------
// Image preprocessor
// ---------------------------------------------------------------------------

const COMPRESSION_LADDER: [(u32, u8); 5] = [(1536, 85), (1280, 75), (1024, 65), (768, 50), (512, 40)];

/// Re-encodes an arbitrary input image as JPEG no larger than `ceiling`
/// bytes, stepping down dimension and quality until the ceiling is met or
/// the quality floor is reached. Aspect ratio is preserved. Deterministic
/// for identical input and ceiling.
pub fn compress_image(input: &[u8], ceiling: usize) -> Result<EncodedImage, GenerationError> {
    let decoded =
        image::load_from_memory(input).map_err(|_| GenerationError::UnsupportedFormat)?;
    // JPEG has no alpha channel.
    let flat = DynamicImage::ImageRgb8(decoded.to_rgb8());

    let mut last = None;
    for (max_dim, quality) in COMPRESSION_LADDER {
        let bytes = encode_jpeg(&scale_to_fit(&flat, max_dim), quality)?;
        if bytes.len() <= ceiling {
            return Ok(EncodedImage {
                bytes,
                mime_type: "image/jpeg".to_string(),
            });
        }
        last = Some(bytes);
    }

    // Quality floor reached; ship the smallest rendition we have.
    let bytes = last.unwrap_or_default();
    Ok(EncodedImage {
        bytes,
        mime_type: "image/jpeg".to_string(),
    })
}

fn scale_to_fit(image: &DynamicImage, max_dim: u32) -> DynamicImage {
    if image.width() <= max_dim && image.height() <= max_dim {
        return image.clone();
    }
    image.resize(max_dim, max_dim, FilterType::Lanczos3)
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, GenerationError> {
    let mut out = Vec::new();
    let mut cursor = Cursor::new(&mut out);
    let encoder = JpegEncoder::new_with_quality(&mut cursor, quality);
    image
        .write_with_encoder(encoder)
        .map_err(|_| GenerationError::UnsupportedFormat)?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Prompt builder
// ---------------------------------------------------------------------------

pub const IDENTITY_DIRECTIVE: &str = "Keep the person's face and identity completely unchanged.";
pub const EXPRESSION_DIRECTIVE: &str =
    "Keep the person's expression exactly as in the original photo.";
pub const POSE_DIRECTIVE: &str =
    "Keep the person's pose and body position exactly as in the original photo.";
pub const NO_BEAUTIFY_DIRECTIVE: &str = "Do not beautify, smooth, or filter the face.";

/// Pure text composition; never looks at the image. Each option axis maps to
/// a fixed fragment through an exhaustive match, so a new variant fails to
/// compile rather than silently producing an empty fragment.
pub fn build_prompt(options: &ProcessingOptions) -> String {
    use portray_contracts::options::{Effect, Intensity, Style};

    let intensity = match options.intensity {
        Intensity::Light => {
            "Subtle professional touch-ups. Keep the original lighting mostly intact but clean \
             up the background and clothing slightly."
        }
        Intensity::Medium => {
            "Standard high-end studio quality. Apply balanced softbox lighting and replace the \
             outfit with a sharp professional look."
        }
        Intensity::Premium => {
            "Elite executive portrait quality. Apply dramatic rim lighting, perfect skin texture \
             preservation, and premium tailored attire for a magazine-cover look."
        }
    };

    let style = match options.style {
        Style::Corporate => {
            "Formal executive style. Dark suits, white or light blue shirts, and a high-end \
             office or neutral grey studio background."
        }
        Style::Linkedin => {
            "Modern professional networking style. Business casual or smart casual attire with a \
             clean, bright, and approachable studio background."
        }
        Style::Profile => {
            "Creative professional style. Modern textures, clean lines, and a minimalist, \
             high-contrast studio background."
        }
        Style::Fragmentation => {
            "Viral fragmentation art. The environment shatters into floating digital particles \
             and glass-like shards around the untouched subject."
        }
        Style::HalfFragmentation => {
            "Half fragmentation art. One half of the scene stays photographic while the other \
             half disintegrates into fine drifting particles."
        }
        Style::DualConcept => {
            "Dual concept split. An artistic divide between a realistic half and a stylized \
             digital half, blended along a clean seam."
        }
        Style::CinematicAura => {
            "Cinematic aura. Volumetric smoke, dramatic film lighting, and a moody color grade \
             straight out of a movie poster."
        }
        Style::Futuristic => {
            "Futuristic scene. Neon accents, holographic interfaces, and sleek future \
             technology surrounding the subject."
        }
        Style::Minimalist => {
            "Minimalist composition. A plain sculpted background with full focus on the face \
             and silhouette."
        }
        Style::CyberGlitch => {
            "Cyber glitch art. Digital distortion, scanlines, and cyberpunk color bleeding \
             applied to the environment only."
        }
        Style::OilPainting => {
            "Classic oil painting. Renaissance brushwork, canvas texture, and painterly \
             lighting while the likeness stays exact."
        }
        Style::SketchArt => {
            "Realistic hand-drawn sketch. Pencil strokes and paper grain rendering of the \
             scene with faithful facial proportions."
        }
    };

    let effect = options.effect.map(|effect| match effect {
        Effect::GoldenHour => "Finish with a warm golden-hour color wash over the whole frame.",
        Effect::Noir => "Finish with a high-contrast black-and-white noir grade.",
        Effect::Vivid => "Finish with saturated, punchy color grading.",
        Effect::Pastel => "Finish with soft pastel tones and lifted shadows.",
        Effect::Sepia => "Finish with a vintage sepia tone.",
    });

    let mut prompt = format!(
        "This is a photo of a person. Upgrade only the environment, lighting, and clothing.\n\
         \n\
         CRITICAL RULES:\n\
         1. {IDENTITY_DIRECTIVE}\n\
         2. {EXPRESSION_DIRECTIVE}\n\
         3. {POSE_DIRECTIVE}\n\
         4. {NO_BEAUTIFY_DIRECTIVE}\n\
         \n\
         STYLE ({style_id}): {style}\n\
         INTENSITY ({intensity_id}): {intensity}\n",
        style_id = options.style.as_str(),
        intensity_id = options.intensity.as_str(),
    );
    if let Some(effect_text) = effect {
        let effect_id = options
            .effect
            .map(|value| value.as_str())
            .unwrap_or_default();
        prompt.push_str(&format!("EFFECT ({effect_id}): {effect_text}\n"));
    }
    prompt.push_str(
        "\nThe result must show the exact same person in the exact same pose, in a much more \
         polished, high-end context. High resolution, sharp focus, professional color grading.",
    );
    prompt
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Privileged (user-provided) and shared/default keys, resolved
/// independently. Which backend model is requested is a function of
/// provenance alone, never of user choice.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub user_key: Option<String>,
    pub shared_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCredential {
    pub key: String,
    pub model: &'static str,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            user_key: non_empty_env("PORTRAY_API_KEY"),
            shared_key: non_empty_env("PORTRAY_SHARED_API_KEY"),
        }
    }

    /// Checked eagerly, before any network access.
    pub fn resolve(&self) -> Result<ResolvedCredential, GenerationError> {
        if let Some(key) = self.user_key.as_ref() {
            return Ok(ResolvedCredential {
                key: key.clone(),
                model: PREMIUM_MODEL,
            });
        }
        if let Some(key) = self.shared_key.as_ref() {
            return Ok(ResolvedCredential {
                key: key.clone(),
                model: STANDARD_MODEL,
            });
        }
        Err(GenerationError::CredentialMissing)
    }
}

// ---------------------------------------------------------------------------
// Remote generation client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub image_bytes: Vec<u8>,
    pub mime_type: String,
    pub prompt: String,
    /// Explicit model override; `None` lets credential provenance decide.
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub png_bytes: Vec<u8>,
}

impl GeneratedImage {
    pub fn data_uri(&self) -> String {
        format!("data:image/png;base64,{}", BASE64.encode(&self.png_bytes))
    }
}

/// A single non-blocking round trip to a generative-image transport. Two
/// calls with identical inputs may yield different images; the remote model
/// is non-deterministic and that is a property, not a defect.
pub trait GenerationBackend: Send {
    fn name(&self) -> &str;
    fn generate(&self, request: &GenerateRequest) -> Result<GeneratedImage, GenerationError>;
}

pub struct GeminiBackend {
    api_base: String,
    credentials: Credentials,
    http: HttpClient,
}

impl GeminiBackend {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            api_base: env::var("PORTRAY_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            credentials,
            http: HttpClient::new(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

impl GenerationBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &GenerateRequest) -> Result<GeneratedImage, GenerationError> {
        let credential = self.credentials.resolve()?;
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| credential.model.to_string());
        let endpoint = self.endpoint_for_model(&model);
        let payload = build_generate_payload(request);

        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", credential.key.as_str())])
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .map_err(|err| GenerationError::Unknown(format!("request failed: {err}")))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| GenerationError::Unknown(format!("response read failed: {err}")))?;
        if !status.is_success() {
            return Err(classify_provider_error(Some(status.as_u16()), &body));
        }
        let parsed: Value = serde_json::from_str(&body).map_err(|_| {
            GenerationError::Unknown("provider returned an invalid JSON payload".to_string())
        })?;
        decode_generate_response(&parsed)
    }
}

pub fn build_generate_payload(request: &GenerateRequest) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [
                {
                    "inlineData": {
                        "mimeType": request.mime_type,
                        "data": BASE64.encode(&request.image_bytes),
                    }
                },
                { "text": request.prompt },
            ],
        }],
        "generationConfig": {
            "responseModalities": ["IMAGE"],
        },
    })
}

/// Pulls the first inline image out of a `generateContent` response and
/// re-encodes it through a PNG container regardless of the source format.
/// Text-only responses are a model refusal.
pub fn decode_generate_response(payload: &Value) -> Result<GeneratedImage, GenerationError> {
    let candidates = payload
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut refusal = String::new();

    for candidate in &candidates {
        let parts = candidate
            .get("content")
            .and_then(Value::as_object)
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            let data = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
                .and_then(|inline| inline.get("data"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !data.is_empty() {
                let bytes = BASE64.decode(data.as_bytes()).map_err(|_| {
                    GenerationError::Unknown("provider image base64 decode failed".to_string())
                })?;
                return reencode_png(&bytes);
            }
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                refusal.push_str(text);
            }
        }
    }

    if refusal.trim().is_empty() {
        return Err(GenerationError::GenerationRefused(
            "the model returned no image".to_string(),
        ));
    }
    Err(GenerationError::GenerationRefused(truncate_text(
        refusal.trim(),
        REFUSAL_MAX_CHARS,
    )))
}

fn reencode_png(bytes: &[u8]) -> Result<GeneratedImage, GenerationError> {
    let decoded = image::load_from_memory(bytes).map_err(|_| {
        GenerationError::Unknown("provider returned undecodable image data".to_string())
    })?;
    let mut out = Vec::new();
    decoded
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(|_| GenerationError::Unknown("png encode failed".to_string()))?;
    Ok(GeneratedImage { png_bytes: out })
}

/// Single place where free-form provider error text is mapped to a kind.
/// The substring rules track the provider's current error format and are
/// best-effort; anything unmatched stays `Unknown` on purpose.
pub fn classify_provider_error(status: Option<u16>, body: &str) -> GenerationError {
    let message = provider_error_message(body);
    let lowered = format!("{body} {message}").to_ascii_lowercase();

    if status == Some(429) || lowered.contains("quota") || lowered.contains("resource_exhausted") {
        return GenerationError::QuotaExceeded(message);
    }
    if status == Some(403)
        || lowered.contains("permission")
        || lowered.contains("denied")
        || lowered.contains("not found")
    {
        return GenerationError::AuthError(message);
    }
    if lowered.contains("safety") {
        return GenerationError::SafetyBlocked;
    }
    GenerationError::Unknown(message)
}

/// Extracts a human-readable message from a provider error body. Bodies are
/// usually JSON with an `error.message` field; that field is sometimes
/// itself a JSON-encoded error, so one nested parse is attempted.
fn provider_error_message(body: &str) -> String {
    let fallback = || truncate_text(body.trim(), 512);
    let Ok(parsed) = serde_json::from_str::<Value>(body) else {
        return fallback();
    };
    let Some(message) = parsed
        .get("error")
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
    else {
        return fallback();
    };
    if let Ok(nested) = serde_json::from_str::<Value>(message) {
        if let Some(inner) = nested
            .get("error")
            .and_then(|error| error.get("message"))
            .and_then(Value::as_str)
        {
            return truncate_text(inner.trim(), 512);
        }
    }
    truncate_text(message.trim(), 512)
}

/// Offline transport: a deterministic flat-color PNG derived from the
/// prompt. Used by tests and the CLI's dryrun mode; never a product feature.
pub struct DryrunBackend;

impl GenerationBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &GenerateRequest) -> Result<GeneratedImage, GenerationError> {
        let mut hasher = Sha256::new();
        hasher.update(request.prompt.as_bytes());
        let digest = hasher.finalize();
        let pixel = image::Rgb([digest[0], digest[1], digest[2]]);
        let mut canvas = image::RgbImage::new(512, 512);
        for px in canvas.pixels_mut() {
            *px = pixel;
        }
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(canvas)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .map_err(|_| GenerationError::Unknown("png encode failed".to_string()))?;
        Ok(GeneratedImage { png_bytes: out })
    }
}

// ---------------------------------------------------------------------------
// Progress simulation
// ---------------------------------------------------------------------------

/// Read side of the progress simulation; cheap to clone across threads.
#[derive(Debug, Clone, Default)]
pub struct ProgressHandle {
    step: Arc<AtomicUsize>,
}

impl ProgressHandle {
    pub fn current_step(&self) -> usize {
        self.step.load(Ordering::SeqCst)
    }

    pub fn current_label(&self) -> &'static str {
        PROCESSING_STEPS[self.current_step().min(PROCESSING_STEPS.len() - 1)]
    }
}

/// Timer that advances the step counter on a fixed cadence, capping at the
/// last step. Dropping the ticker stops and joins the thread, so every exit
/// path out of a submission tears the timer down.
pub struct ProgressTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressTicker {
    pub fn start(progress: &ProgressHandle) -> Self {
        Self::spawn(progress, PROGRESS_STEP_PERIOD, None)
    }

    pub fn start_with_period(progress: &ProgressHandle, period: Duration) -> Self {
        Self::spawn(progress, period, None)
    }

    fn spawn(progress: &ProgressHandle, period: Duration, events: Option<EventWriter>) -> Self {
        progress.step.store(0, Ordering::SeqCst);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let step = progress.step.clone();
        let handle = thread::spawn(move || {
            let last = PROCESSING_STEPS.len() - 1;
            loop {
                let deadline = Instant::now() + period;
                while Instant::now() < deadline {
                    if thread_stop.load(Ordering::SeqCst) {
                        return;
                    }
                    thread::sleep(Duration::from_millis(10).min(period));
                }
                let current = step.load(Ordering::SeqCst);
                if current < last {
                    step.store(current + 1, Ordering::SeqCst);
                    if let Some(events) = &events {
                        let _ = events.emit(
                            "progress_step",
                            payload(json!({
                                "step": current + 1,
                                "label": PROCESSING_STEPS[current + 1],
                            })),
                        );
                    }
                }
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Processing orchestrator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Splash,
    Home,
    Configuring,
    Processing,
    Result,
    History,
    Privacy,
    Gallery,
    Zoom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Configuring,
    Submitting,
    AwaitingResult,
    Succeeded,
    Failed(GenerationError),
}

#[derive(Debug, Clone)]
struct PreparedRequest {
    request: GenerateRequest,
    original_data_uri: String,
    options: ProcessingOptions,
}

/// Owns the session state machine. All transitions happen on the calling
/// thread; the only background activity is the progress ticker, which owns
/// nothing but its counter and stop flag.
pub struct Session {
    screen: Screen,
    phase: Phase,
    options: ProcessingOptions,
    original_image: Option<String>,
    processed_image: Option<String>,
    model_override: Option<String>,
    history: HistoryStore,
    adapter: HistoryAdapter,
    events: EventWriter,
    backend: Box<dyn GenerationBackend>,
    progress: ProgressHandle,
    progress_period: Duration,
    pending_retry: Option<PreparedRequest>,
}

impl Session {
    pub fn new(
        backend: Box<dyn GenerationBackend>,
        store: Box<dyn KeyValueStore>,
        events: EventWriter,
    ) -> Self {
        let adapter = HistoryAdapter::new(store, events.clone());
        let history = adapter.load();
        let _ = events.emit(
            "session_started",
            payload(json!({
                "backend": backend.name(),
                "history_len": history.len(),
            })),
        );
        Self {
            screen: Screen::Splash,
            phase: Phase::Idle,
            options: ProcessingOptions::default(),
            original_image: None,
            processed_image: None,
            model_override: None,
            history,
            adapter,
            events,
            backend,
            progress: ProgressHandle::default(),
            progress_period: PROGRESS_STEP_PERIOD,
            pending_retry: None,
        }
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn options(&self) -> &ProcessingOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: ProcessingOptions) {
        self.options = options;
    }

    pub fn set_model_override(&mut self, model: Option<String>) {
        self.model_override = model;
    }

    /// Shortens the cosmetic step cadence; test hook.
    pub fn set_progress_period(&mut self, period: Duration) {
        self.progress_period = period;
    }

    pub fn progress(&self) -> ProgressHandle {
        self.progress.clone()
    }

    pub fn original_image(&self) -> Option<&str> {
        self.original_image.as_deref()
    }

    pub fn processed_image(&self) -> Option<&str> {
        self.processed_image.as_deref()
    }

    pub fn last_error(&self) -> Option<&GenerationError> {
        match &self.phase {
            Phase::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn navigate(&mut self, screen: Screen) {
        self.screen = screen;
    }

    /// Image intake. Oversize input fails without any state transition; a
    /// readable image moves the session to `Configuring`.
    pub fn load_image(&mut self, bytes: &[u8]) -> Result<(), GenerationError> {
        if bytes.len() > UPLOAD_LIMIT_BYTES {
            return Err(GenerationError::ImageTooLarge {
                limit_bytes: UPLOAD_LIMIT_BYTES,
            });
        }
        let mime_type = sniff_mime(bytes)?;
        let encoded = EncodedImage {
            bytes: bytes.to_vec(),
            mime_type,
        };
        self.original_image = Some(encoded.data_uri());
        self.processed_image = None;
        self.pending_retry = None;
        self.phase = Phase::Configuring;
        self.screen = Screen::Configuring;
        let _ = self.events.emit(
            "image_loaded",
            payload(json!({ "bytes": bytes.len(), "mime": encoded.mime_type })),
        );
        Ok(())
    }

    /// Runs the full pipeline for the currently loaded image and options.
    pub fn submit(&mut self) -> Result<ProcessedImageRecord, GenerationError> {
        let prepared = match self.prepare() {
            Ok(prepared) => prepared,
            Err(err) => {
                self.settle_failure(err.clone(), None);
                return Err(err);
            }
        };
        self.run_prepared(prepared)
    }

    /// Re-issues the exact request that failed with `QuotaExceeded`.
    pub fn retry_last(&mut self) -> Result<ProcessedImageRecord, GenerationError> {
        let Some(prepared) = self.pending_retry.take() else {
            return Err(GenerationError::Unknown(
                "no retryable request pending".to_string(),
            ));
        };
        self.run_prepared(prepared)
    }

    pub fn can_retry(&self) -> bool {
        self.pending_retry.is_some()
    }

    fn prepare(&mut self) -> Result<PreparedRequest, GenerationError> {
        let Some(original) = self.original_image.clone() else {
            return Err(GenerationError::Unknown("no image loaded".to_string()));
        };
        self.phase = Phase::Submitting;
        self.screen = Screen::Processing;
        let source = parse_data_uri(&original)?;
        let compressed = compress_image(&source.bytes, COMPRESSION_CEILING_BYTES)?;
        let prompt = build_prompt(&self.options);
        Ok(PreparedRequest {
            request: GenerateRequest {
                image_bytes: compressed.bytes,
                mime_type: compressed.mime_type,
                prompt,
                model: self.model_override.clone(),
            },
            original_data_uri: original,
            options: self.options,
        })
    }

    fn run_prepared(
        &mut self,
        prepared: PreparedRequest,
    ) -> Result<ProcessedImageRecord, GenerationError> {
        self.phase = Phase::AwaitingResult;
        self.screen = Screen::Processing;
        let _ = self.events.emit(
            "generation_started",
            payload(json!({
                "style": prepared.options.style.as_str(),
                "intensity": prepared.options.intensity.as_str(),
                "effect": prepared.options.effect.map(|value| value.as_str()),
                "backend": self.backend.name(),
            })),
        );

        // Guard: the ticker is torn down on every settle path, including
        // early returns and panics.
        let ticker =
            ProgressTicker::spawn(&self.progress, self.progress_period, Some(self.events.clone()));
        let result = self.backend.generate(&prepared.request);
        drop(ticker);

        match result {
            Ok(generated) => {
                let record = ProcessedImageRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    original_url: prepared.original_data_uri.clone(),
                    processed_url: generated.data_uri(),
                    timestamp: chrono::Utc::now().timestamp_millis(),
                    mode: prepared.options.intensity,
                    style: prepared.options.style,
                    effect: prepared.options.effect,
                };
                self.processed_image = Some(record.processed_url.clone());
                self.history.prepend(record.clone());
                self.adapter.save(&self.history);
                let _ = self.events.emit(
                    "generation_succeeded",
                    payload(json!({ "record_id": record.id })),
                );
                let _ = self.events.emit(
                    "history_saved",
                    payload(json!({ "history_len": self.history.len() })),
                );
                self.pending_retry = None;
                self.phase = Phase::Succeeded;
                self.screen = Screen::Result;
                Ok(record)
            }
            Err(err) => {
                let retry = err.is_retryable().then_some(prepared);
                self.settle_failure(err.clone(), retry);
                Err(err)
            }
        }
    }

    fn settle_failure(&mut self, err: GenerationError, retry: Option<PreparedRequest>) {
        let _ = self.events.emit(
            "generation_failed",
            payload(json!({
                "kind": err.kind(),
                "message": err.to_string(),
                "retryable": err.is_retryable(),
            })),
        );
        self.pending_retry = retry;
        self.phase = Phase::Failed(err);
        // Failures return to configuration, never a dead-end screen.
        self.screen = Screen::Configuring;
    }

    /// Loads a past record for re-viewing, overwriting the session images
    /// and options wholesale.
    pub fn view_record(&mut self, id: &str) -> bool {
        let Some(record) = self.history.get(id).cloned() else {
            return false;
        };
        self.original_image = Some(record.original_url.clone());
        self.processed_image = Some(record.processed_url.clone());
        self.options = record.options();
        self.pending_retry = None;
        self.phase = Phase::Succeeded;
        self.screen = Screen::Result;
        true
    }

    pub fn delete_record(&mut self, id: &str) -> bool {
        let removed = self.history.delete(id);
        if removed {
            self.adapter.save(&self.history);
            let _ = self
                .events
                .emit("record_deleted", payload(json!({ "record_id": id })));
        }
        removed
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        self.adapter.save(&self.history);
        let _ = self.events.emit("history_cleared", EventPayload::new());
    }

    /// Back to the entry screen with defaults.
    pub fn reset(&mut self) {
        self.screen = Screen::Home;
        self.phase = Phase::Idle;
        self.original_image = None;
        self.processed_image = None;
        self.pending_retry = None;
        self.options = ProcessingOptions::default();
    }

    pub fn finish(&self) {
        let _ = self.events.emit("session_finished", EventPayload::new());
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn payload(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use portray_contracts::events::EventWriter;
    use portray_contracts::history::MemoryStore;
    use portray_contracts::options::{Effect, Intensity, ProcessingOptions, Style};
    use serde_json::{json, Value};

    use super::*;

    fn sample_options() -> Vec<ProcessingOptions> {
        let mut all = Vec::new();
        for style in Style::ALL {
            for intensity in Intensity::ALL {
                all.push(ProcessingOptions {
                    intensity,
                    style,
                    effect: None,
                });
                for effect in Effect::ALL {
                    all.push(ProcessingOptions {
                        intensity,
                        style,
                        effect: Some(effect),
                    });
                }
            }
        }
        all
    }

    fn test_png(width: u32, height: u32) -> Vec<u8> {
        let mut canvas = image::RgbImage::new(width, height);
        for (x, y, px) in canvas.enumerate_pixels_mut() {
            *px = image::Rgb([(x % 251) as u8, (y % 241) as u8, ((x + y) % 199) as u8]);
        }
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(canvas)
            .write_to(&mut std::io::Cursor::new(&mut out), ImageFormat::Png)
            .expect("encode test png");
        out
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum MockReply {
        Image,
        Quota,
        Refused,
    }

    struct MockBackend {
        replies: Mutex<Vec<MockReply>>,
        seen: Arc<Mutex<Vec<GenerateRequest>>>,
    }

    impl MockBackend {
        fn new(replies: Vec<MockReply>) -> (Self, Arc<Mutex<Vec<GenerateRequest>>>) {
            let seen = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    replies: Mutex::new(replies),
                    seen: seen.clone(),
                },
                seen,
            )
        }
    }

    impl GenerationBackend for MockBackend {
        fn name(&self) -> &str {
            "mock"
        }

        fn generate(&self, request: &GenerateRequest) -> Result<GeneratedImage, GenerationError> {
            self.seen
                .lock()
                .expect("seen lock")
                .push(request.clone());
            let reply = {
                let mut replies = self.replies.lock().expect("replies lock");
                if replies.is_empty() {
                    MockReply::Image
                } else {
                    replies.remove(0)
                }
            };
            match reply {
                MockReply::Image => DryrunBackend.generate(request),
                MockReply::Quota => Err(classify_provider_error(Some(429), "")),
                MockReply::Refused => Err(GenerationError::GenerationRefused(
                    "cannot edit this photo".to_string(),
                )),
            }
        }
    }

    fn session_with(
        backend: Box<dyn GenerationBackend>,
        dir: &std::path::Path,
    ) -> Session {
        let events = EventWriter::new(dir.join("events.jsonl"), "test-session");
        let mut session = Session::new(backend, Box::new(MemoryStore::new()), events);
        session.set_progress_period(Duration::from_millis(5));
        session
    }

    #[test]
    fn prompt_always_restates_identity_directives() {
        for options in sample_options() {
            let prompt = build_prompt(&options);
            assert!(!prompt.trim().is_empty());
            assert!(prompt.contains(IDENTITY_DIRECTIVE));
            assert!(prompt.contains(EXPRESSION_DIRECTIVE));
            assert!(prompt.contains(POSE_DIRECTIVE));
            assert!(prompt.contains(NO_BEAUTIFY_DIRECTIVE));
            assert!(prompt.contains(options.style.as_str()));
            assert!(prompt.contains(options.intensity.as_str()));
        }
    }

    #[test]
    fn prompt_effect_fragment_only_when_selected() {
        let without = build_prompt(&ProcessingOptions::default());
        assert!(!without.contains("EFFECT"));

        let with = build_prompt(&ProcessingOptions {
            effect: Some(Effect::Noir),
            ..ProcessingOptions::default()
        });
        assert!(with.contains("EFFECT (noir)"));
        assert!(with.contains("noir grade"));
    }

    #[test]
    fn compress_image_meets_ceiling_and_keeps_aspect_ratio() -> anyhow::Result<()> {
        let input = test_png(1200, 800);
        let ceiling = 200 * 1024;
        let compressed = compress_image(&input, ceiling)?;
        assert!(compressed.bytes.len() <= ceiling);
        assert_eq!(compressed.mime_type, "image/jpeg");

        let decoded = image::load_from_memory(&compressed.bytes)?;
        let ratio = decoded.width() as f64 / decoded.height() as f64;
        assert!((ratio - 1.5).abs() < 0.02, "ratio drifted: {ratio}");
        Ok(())
    }

    #[test]
    fn compress_image_is_deterministic() -> anyhow::Result<()> {
        let input = test_png(900, 900);
        let first = compress_image(&input, 150 * 1024)?;
        let second = compress_image(&input, 150 * 1024)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn compress_image_rejects_garbage() {
        let err = compress_image(b"definitely not an image", 1024).unwrap_err();
        assert_eq!(err, GenerationError::UnsupportedFormat);
    }

    #[test]
    fn data_uri_round_trip() -> anyhow::Result<()> {
        let encoded = EncodedImage {
            bytes: test_png(8, 8),
            mime_type: "image/png".to_string(),
        };
        let parsed = parse_data_uri(&encoded.data_uri())?;
        assert_eq!(parsed, encoded);
        Ok(())
    }

    #[test]
    fn parse_data_uri_rejects_malformed_input() {
        assert_eq!(
            parse_data_uri("data:image/png;base64").unwrap_err(),
            GenerationError::UnsupportedFormat
        );
        assert_eq!(
            parse_data_uri("data:;base64,aaaa").unwrap_err(),
            GenerationError::UnsupportedFormat
        );
        assert_eq!(
            parse_data_uri("data:image/png;base64,@@@@").unwrap_err(),
            GenerationError::UnsupportedFormat
        );
    }

    #[test]
    fn credentials_pick_model_by_provenance() {
        let user = Credentials {
            user_key: Some("user-key".to_string()),
            shared_key: Some("shared-key".to_string()),
        };
        let resolved = user.resolve().expect("user credential");
        assert_eq!(resolved.model, PREMIUM_MODEL);
        assert_eq!(resolved.key, "user-key");

        let shared = Credentials {
            user_key: None,
            shared_key: Some("shared-key".to_string()),
        };
        let resolved = shared.resolve().expect("shared credential");
        assert_eq!(resolved.model, STANDARD_MODEL);

        let none = Credentials::default();
        assert_eq!(
            none.resolve().unwrap_err(),
            GenerationError::CredentialMissing
        );
    }

    #[test]
    fn classifier_maps_provider_failures() {
        let cases: Vec<(Option<u16>, &str, &str)> = vec![
            (Some(429), "", "quota_exceeded"),
            (None, "You exceeded your current quota", "quota_exceeded"),
            (Some(500), r#"{"error":{"message":"RESOURCE_EXHAUSTED"}}"#, "quota_exceeded"),
            (Some(403), "", "auth_error"),
            (None, "Permission denied on resource", "auth_error"),
            (Some(404), "model not found", "auth_error"),
            (Some(400), "blocked by safety settings", "safety_blocked"),
            (Some(500), "internal error", "unknown"),
        ];
        for (status, body, expected) in cases {
            let err = classify_provider_error(status, body);
            assert_eq!(err.kind(), expected, "status={status:?} body={body}");
        }
    }

    #[test]
    fn classifier_unwraps_nested_json_error_bodies() {
        let inner = json!({"error": {"message": "You exceeded your current quota."}}).to_string();
        let body = json!({"error": {"message": inner}}).to_string();
        let err = classify_provider_error(Some(500), &body);
        match err {
            GenerationError::QuotaExceeded(message) => {
                assert_eq!(message, "You exceeded your current quota.");
            }
            other => panic!("expected quota, got {other:?}"),
        }
    }

    #[test]
    fn refusal_response_yields_truncated_reason() {
        let long_reason = "a".repeat(400);
        let response = json!({
            "candidates": [{
                "content": { "parts": [{ "text": long_reason }] }
            }]
        });
        match decode_generate_response(&response).unwrap_err() {
            GenerationError::GenerationRefused(reason) => {
                assert!(reason.chars().count() <= REFUSAL_MAX_CHARS + 1);
            }
            other => panic!("expected refusal, got {other:?}"),
        }
    }

    #[test]
    fn image_response_is_reencoded_as_png() -> anyhow::Result<()> {
        let jpeg = {
            let decoded = image::load_from_memory(&test_png(32, 32))?;
            encode_jpeg(&decoded, 80)?
        };
        let response = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "here you go" },
                    { "inlineData": { "mimeType": "image/jpeg", "data": BASE64.encode(&jpeg) } }
                ]}
            }]
        });
        let generated = decode_generate_response(&response)?;
        assert_eq!(image::guess_format(&generated.png_bytes)?, ImageFormat::Png);
        assert!(generated.data_uri().starts_with("data:image/png;base64,"));
        Ok(())
    }

    #[test]
    fn dryrun_backend_is_deterministic() -> anyhow::Result<()> {
        let request = GenerateRequest {
            image_bytes: test_png(16, 16),
            mime_type: "image/png".to_string(),
            prompt: "portrait".to_string(),
            model: None,
        };
        let first = DryrunBackend.generate(&request)?;
        let second = DryrunBackend.generate(&request)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn progress_ticker_caps_at_last_step_and_stops_on_drop() {
        let progress = ProgressHandle::default();
        let ticker = ProgressTicker::start_with_period(&progress, Duration::from_millis(5));
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while progress.current_step() < PROCESSING_STEPS.len() - 1 {
            assert!(std::time::Instant::now() < deadline, "ticker never capped");
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(30));
        assert_eq!(progress.current_step(), PROCESSING_STEPS.len() - 1);
        assert_eq!(progress.current_label(), PROCESSING_STEPS[5]);

        drop(ticker);
        let frozen = progress.current_step();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(progress.current_step(), frozen);
    }

    #[test]
    fn oversize_image_fails_without_state_change_or_remote_call() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (backend, seen) = MockBackend::new(vec![MockReply::Image]);
        let mut session = session_with(Box::new(backend), temp.path());

        let oversize = vec![0u8; UPLOAD_LIMIT_BYTES + 1];
        let err = session.load_image(&oversize).unwrap_err();
        assert_eq!(
            err,
            GenerationError::ImageTooLarge {
                limit_bytes: UPLOAD_LIMIT_BYTES
            }
        );
        assert_eq!(*session.phase(), Phase::Idle);
        assert_eq!(session.screen(), Screen::Splash);
        assert!(seen.lock().expect("seen lock").is_empty());
    }

    #[test]
    fn successful_submit_prepends_one_record() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (backend, seen) = MockBackend::new(vec![MockReply::Image]);
        let mut session = session_with(Box::new(backend), temp.path());
        session.set_options(ProcessingOptions {
            intensity: Intensity::Premium,
            style: Style::CyberGlitch,
            effect: Some(Effect::Vivid),
        });

        session.load_image(&test_png(640, 480))?;
        assert_eq!(*session.phase(), Phase::Configuring);

        let record = session.submit()?;
        assert_eq!(*session.phase(), Phase::Succeeded);
        assert_eq!(session.screen(), Screen::Result);
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history().records()[0], record);
        assert!(record.processed_url.starts_with("data:image/png;base64,"));
        assert_eq!(record.mode, Intensity::Premium);
        assert_eq!(record.style, Style::CyberGlitch);
        assert_eq!(record.effect, Some(Effect::Vivid));
        assert_eq!(seen.lock().expect("seen lock").len(), 1);
        Ok(())
    }

    #[test]
    fn history_is_newest_first_across_submissions() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (backend, _) = MockBackend::new(vec![]);
        let mut session = session_with(Box::new(backend), temp.path());

        session.load_image(&test_png(320, 240))?;
        let first = session.submit()?;
        session.load_image(&test_png(320, 240))?;
        let second = session.submit()?;
        session.load_image(&test_png(320, 240))?;
        let third = session.submit()?;

        let ids: Vec<&str> = session
            .history()
            .records()
            .iter()
            .map(|record| record.id.as_str())
            .collect();
        assert_eq!(ids, vec![third.id.as_str(), second.id.as_str(), first.id.as_str()]);
        Ok(())
    }

    #[test]
    fn quota_failure_offers_identical_retry() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (backend, seen) = MockBackend::new(vec![MockReply::Quota, MockReply::Image]);
        let mut session = session_with(Box::new(backend), temp.path());

        session.load_image(&test_png(640, 480))?;
        let err = session.submit().unwrap_err();
        assert_eq!(err.kind(), "quota_exceeded");
        assert_eq!(session.screen(), Screen::Configuring);
        assert!(matches!(session.phase(), Phase::Failed(_)));
        assert!(session.history().is_empty());
        assert!(session.can_retry());

        let record = session.retry_last()?;
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history().records()[0].id, record.id);

        let calls = seen.lock().expect("seen lock");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
        Ok(())
    }

    #[test]
    fn refusal_is_not_retryable() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (backend, _) = MockBackend::new(vec![MockReply::Refused]);
        let mut session = session_with(Box::new(backend), temp.path());

        session.load_image(&test_png(320, 240))?;
        let err = session.submit().unwrap_err();
        assert_eq!(err.kind(), "generation_refused");
        assert!(!session.can_retry());
        assert!(session
            .retry_last()
            .is_err());
        Ok(())
    }

    #[test]
    fn failure_keeps_in_memory_images() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (backend, _) = MockBackend::new(vec![MockReply::Image, MockReply::Quota]);
        let mut session = session_with(Box::new(backend), temp.path());

        session.load_image(&test_png(320, 240))?;
        session.submit()?;
        let shown = session.processed_image().map(str::to_string);
        assert!(shown.is_some());

        session.load_image(&test_png(320, 240))?;
        let _ = session.submit().unwrap_err();
        assert!(session.original_image().is_some());
        Ok(())
    }

    #[test]
    fn view_delete_and_clear_manage_history() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (backend, _) = MockBackend::new(vec![]);
        let mut session = session_with(Box::new(backend), temp.path());

        session.load_image(&test_png(320, 240))?;
        let first = session.submit()?;
        session.load_image(&test_png(320, 240))?;
        let second = session.submit()?;

        session.reset();
        assert_eq!(*session.phase(), Phase::Idle);
        assert!(session.original_image().is_none());

        assert!(session.view_record(&first.id));
        assert_eq!(session.screen(), Screen::Result);
        assert_eq!(session.processed_image(), Some(first.processed_url.as_str()));
        assert_eq!(session.options().style, first.style);

        assert!(!session.view_record("missing"));
        assert!(!session.delete_record("missing"));
        assert!(session.delete_record(&first.id));
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history().records()[0].id, second.id);

        session.clear_history();
        assert!(session.history().is_empty());
        Ok(())
    }

    #[test]
    fn lifecycle_events_are_ordered() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (backend, _) = MockBackend::new(vec![]);
        let mut session = session_with(Box::new(backend), temp.path());

        session.load_image(&test_png(320, 240))?;
        session.submit()?;
        session.finish();

        let raw = std::fs::read_to_string(temp.path().join("events.jsonl"))?;
        let types: Vec<String> = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect();

        let started = types
            .iter()
            .position(|value| value == "generation_started")
            .expect("missing generation_started");
        let succeeded = types
            .iter()
            .position(|value| value == "generation_succeeded")
            .expect("missing generation_succeeded");
        let saved = types
            .iter()
            .position(|value| value == "history_saved")
            .expect("missing history_saved");
        assert!(types.contains(&"session_started".to_string()));
        assert!(types.contains(&"image_loaded".to_string()));
        assert!(types.contains(&"session_finished".to_string()));
        assert!(started < succeeded);
        assert!(succeeded < saved);
        Ok(())
    }

    #[test]
    fn gemini_endpoint_builds_model_path() {
        let backend = GeminiBackend::new(Credentials::default());
        let endpoint = backend.endpoint_for_model("gemini-2.5-flash-image");
        assert!(endpoint.ends_with("/models/gemini-2.5-flash-image:generateContent"));
        let prefixed = backend.endpoint_for_model("models/custom");
        assert!(prefixed.ends_with("/models/custom:generateContent"));
    }

    #[test]
    fn gemini_without_credentials_fails_before_network() {
        let backend = GeminiBackend::new(Credentials::default());
        let request = GenerateRequest {
            image_bytes: test_png(8, 8),
            mime_type: "image/png".to_string(),
            prompt: "portrait".to_string(),
            model: None,
        };
        assert_eq!(
            backend.generate(&request).unwrap_err(),
            GenerationError::CredentialMissing
        );
    }

    #[test]
    fn generate_payload_carries_image_then_prompt() {
        let request = GenerateRequest {
            image_bytes: vec![1, 2, 3],
            mime_type: "image/jpeg".to_string(),
            prompt: "portrait".to_string(),
            model: None,
        };
        let built = build_generate_payload(&request);
        let parts = built["contents"][0]["parts"]
            .as_array()
            .expect("parts array");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["inlineData"]["mimeType"], json!("image/jpeg"));
        assert_eq!(
            parts[0]["inlineData"]["data"],
            json!(BASE64.encode([1u8, 2, 3]))
        );
        assert_eq!(parts[1]["text"], json!("portrait"));
    }
}

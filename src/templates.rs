// Ticket rendering: template lookup, QR embedding and HTML rasterization

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use minijinja::{Environment, ErrorKind, Value};
use qrcode::QrCode;
use serde_json::Map;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{RenderError, StorageError};
use crate::image_processing::RenderedArtifact;

/// Data key whose value becomes the QR payload.
pub const QR_FIELD: &str = "id";
/// Template variable holding the QR code as a PNG data URI.
pub const QR_PLACEHOLDER: &str = "QRCODE";

// Pixels per QR module and quiet-zone width in modules
const QR_BOX_SIZE: u32 = 10;
const QR_BORDER: u32 = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct PrintRequest {
    pub template_name: String,
    pub fields: Map<String, serde_json::Value>,
}

impl PrintRequest {
    pub fn new(template_name: impl Into<String>, fields: Map<String, serde_json::Value>) -> Self {
        PrintRequest {
            template_name: template_name.into(),
            fields,
        }
    }

    /// The QR payload: `fields["id"]` verbatim, or its JSON text when it is
    /// not a string.
    pub fn qr_payload(&self) -> Result<String, RenderError> {
        match self.fields.get(QR_FIELD) {
            Some(serde_json::Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(RenderError::MissingField {
                field: QR_FIELD.to_string(),
            }),
        }
    }
}

pub fn generate_qr(payload: &str) -> Result<DynamicImage, RenderError> {
    let code = QrCode::new(payload.as_bytes()).map_err(|e| RenderError::Qr(e.to_string()))?;
    let modules = code.to_colors();
    let module_count = code.width() as u32;
    let img_size = (module_count + 2 * QR_BORDER) * QR_BOX_SIZE;

    let mut img = GrayImage::from_pixel(img_size, img_size, Luma([255u8]));

    for (i, color) in modules.iter().enumerate() {
        if *color != qrcode::Color::Dark {
            continue;
        }
        let x = (i as u32 % module_count + QR_BORDER) * QR_BOX_SIZE;
        let y = (i as u32 / module_count + QR_BORDER) * QR_BOX_SIZE;
        for dx in 0..QR_BOX_SIZE {
            for dy in 0..QR_BOX_SIZE {
                img.put_pixel(x + dx, y + dy, Luma([0u8]));
            }
        }
    }

    Ok(DynamicImage::ImageLuma8(img))
}

pub fn qr_data_uri(payload: &str) -> Result<String, RenderError> {
    let qr = generate_qr(payload)?;
    let mut png = Cursor::new(Vec::new());
    qr.write_to(&mut png, ImageFormat::Png)
        .map_err(|e| RenderError::Qr(e.to_string()))?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png.into_inner())))
}

/// Turns an HTML page into a raster image.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(&self, html: &str) -> Result<DynamicImage, RenderError>;
}

/// Pipes HTML into `wkhtmltoimage` and loads the PNG it writes.
pub struct WkHtmlRasterizer {
    binary: String,
    work_dir: PathBuf,
}

impl WkHtmlRasterizer {
    pub fn new(binary: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        WkHtmlRasterizer {
            binary: binary.into(),
            work_dir: work_dir.into(),
        }
    }
}

#[async_trait]
impl Rasterizer for WkHtmlRasterizer {
    async fn rasterize(&self, html: &str) -> Result<DynamicImage, RenderError> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let output_path = self.work_dir.join(format!("render-{}.png", Uuid::new_v4()));

        let mut child = Command::new(&self.binary)
            .args(["--quiet", "--format", "png", "-"])
            .arg(&output_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RenderError::Rasterize(format!("failed to launch {}: {}", self.binary, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(html.as_bytes()).await?;
        }
        let output = child.wait_with_output().await?;

        let loaded = image::open(&output_path);
        if let Err(e) = tokio::fs::remove_file(&output_path).await {
            debug!("Could not remove {:?}: {}", output_path, e);
        }

        check_rasterized(&self.binary, &output, loaded)
    }
}

/// A rasterization counts only when the tool exited cleanly and left a
/// readable image behind.
fn check_rasterized(
    binary: &str,
    output: &Output,
    loaded: image::ImageResult<DynamicImage>,
) -> Result<DynamicImage, RenderError> {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        return Err(RenderError::Rasterize(format!(
            "{} exited with {}: {}",
            binary,
            output.status,
            stderr.trim()
        )));
    }

    loaded.map_err(|e| {
        RenderError::Rasterize(format!(
            "{} produced no readable image ({}): {}",
            binary,
            stderr.trim(),
            e
        ))
    })
}

/// The template directory: read by the renderer, written by uploads.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        TemplateStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Renders template `name` with `context`. A fresh environment per call
    /// picks up templates uploaded since the last render.
    pub fn render(&self, name: &str, context: &BTreeMap<String, Value>) -> Result<String, RenderError> {
        let mut env = Environment::new();
        env.set_loader(minijinja::path_loader(self.dir.clone()));

        let template = env.get_template(name).map_err(|e| match e.kind() {
            ErrorKind::TemplateNotFound => RenderError::TemplateNotFound {
                name: name.to_string(),
            },
            _ => RenderError::Template(e.to_string()),
        })?;

        template
            .render(context)
            .map_err(|e| RenderError::Template(e.to_string()))
    }

    /// Stores an uploaded template under its client-supplied name, writing a
    /// hidden staging file first and renaming it into place.
    pub async fn save(&self, filename: &str, contents: &[u8]) -> Result<PathBuf, StorageError> {
        validate_filename(filename)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let target = self.dir.join(filename);
        let staging = self
            .dir
            .join(format!(".{}.{}.upload", filename, Uuid::new_v4()));

        tokio::fs::write(&staging, contents).await?;
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }

        info!("Stored template {:?} ({} bytes)", target, contents.len());
        Ok(target)
    }
}

fn validate_filename(filename: &str) -> Result<(), StorageError> {
    let invalid = filename.is_empty()
        || filename == "."
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains("..")
        || filename.contains('\0');
    if invalid {
        return Err(StorageError::InvalidFilename(filename.to_string()));
    }
    Ok(())
}

pub struct TemplateRenderer {
    store: TemplateStore,
    rasterizer: Arc<dyn Rasterizer>,
}

impl TemplateRenderer {
    pub fn new(store: TemplateStore, rasterizer: Arc<dyn Rasterizer>) -> Self {
        TemplateRenderer { store, rasterizer }
    }

    /// Renders the request's template with its fields plus `QRCODE`.
    pub fn render_html(&self, request: &PrintRequest) -> Result<String, RenderError> {
        let payload = request.qr_payload()?;

        let mut context: BTreeMap<String, Value> = request
            .fields
            .iter()
            .map(|(key, value)| (key.clone(), Value::from_serialize(value)))
            .collect();
        context.insert(
            QR_PLACEHOLDER.to_string(),
            Value::from_safe_string(qr_data_uri(&payload)?),
        );

        self.store.render(&request.template_name, &context)
    }

    pub async fn render(&self, request: &PrintRequest) -> Result<RenderedArtifact, RenderError> {
        let html = self.render_html(request)?;
        let image = self.rasterizer.rasterize(&html).await?;

        if image.width() == 0 || image.height() == 0 {
            return Err(RenderError::Rasterize(format!(
                "empty image {}x{}",
                image.width(),
                image.height()
            )));
        }

        info!(
            "Rendered template '{}' to {}x{} image",
            request.template_name,
            image.width(),
            image.height()
        );
        RenderedArtifact::from_image(&image).map_err(|e| RenderError::Rasterize(e.to_string()))
    }
}

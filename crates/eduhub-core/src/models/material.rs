use std::fmt;
use std::path::Path;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Kind of learning material. The API spells these in Spanish.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MaterialType {
    Worksheet,
    Presentation,
    Video,
    Other(String),
}

impl MaterialType {
    pub fn as_api_str(&self) -> &str {
        match self {
            MaterialType::Worksheet => "ficha",
            MaterialType::Presentation => "presentacion",
            MaterialType::Video => "video",
            MaterialType::Other(s) => s,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            MaterialType::Worksheet => "Worksheet",
            MaterialType::Presentation => "Presentation",
            MaterialType::Video => "Video",
            MaterialType::Other(s) => s,
        }
    }
}

impl From<String> for MaterialType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "ficha" | "worksheet" => MaterialType::Worksheet,
            "presentacion" | "presentation" => MaterialType::Presentation,
            "video" => MaterialType::Video,
            _ => MaterialType::Other(s),
        }
    }
}

impl From<MaterialType> for String {
    fn from(kind: MaterialType) -> Self {
        kind.as_api_str().to_string()
    }
}

impl FromStr for MaterialType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(MaterialType::from(s.to_lowercase()))
    }
}

impl fmt::Display for MaterialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A material as returned by `/materiales/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub id: i64,
    #[serde(rename = "titulo")]
    pub title: String,
    #[serde(rename = "descripcion", default)]
    pub description: Option<String>,
    #[serde(rename = "tipo")]
    pub kind: MaterialType,
    #[serde(rename = "archivo_url", default)]
    pub file_url: Option<String>,
    #[serde(rename = "archivo_nombre", default)]
    pub file_name: Option<String>,
    #[serde(rename = "archivo_tipo", default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    /// Owner's email
    #[serde(rename = "usuario", default)]
    pub owner: Option<String>,
    #[serde(rename = "usuario_nombre", default)]
    pub owner_name: Option<String>,
    #[serde(rename = "fecha_creacion", default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "calificacion_promedio", default)]
    pub average_rating: Option<f64>,
    #[serde(rename = "total_calificaciones", default)]
    pub ratings_count: u32,
    #[serde(rename = "mi_calificacion", default)]
    pub my_rating: Option<u8>,
}

impl Material {
    pub fn is_owned_by(&self, email: &str) -> bool {
        self.owner.as_deref().is_some_and(|o| o.eq_ignore_ascii_case(email))
    }
}

/// Ordering options offered by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
    Rating,
    Title,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Newest => "newest",
            SortOrder::Oldest => "oldest",
            SortOrder::Rating => "rating",
            SortOrder::Title => "title",
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "newest" => Ok(SortOrder::Newest),
            "oldest" => Ok(SortOrder::Oldest),
            "rating" => Ok(SortOrder::Rating),
            "title" => Ok(SortOrder::Title),
            other => Err(format!("unknown sort order '{}' (newest, oldest, rating, title)", other)),
        }
    }
}

/// Server-side filters for `GET /materiales/`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterialQuery {
    pub kind: Option<MaterialType>,
    /// Owner email
    pub author: Option<String>,
    pub ordering: SortOrder,
    pub created_from: Option<NaiveDate>,
    pub created_to: Option<NaiveDate>,
}

impl MaterialQuery {
    /// Query-string pairs; `newest` is the server default and is omitted.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(ref kind) = self.kind {
            params.push(("tipo", kind.as_api_str().to_string()));
        }
        if let Some(author) = self.author.as_deref().filter(|a| !a.is_empty()) {
            params.push(("usuario", author.to_string()));
        }
        if self.ordering != SortOrder::Newest {
            params.push(("ordering", self.ordering.as_str().to_string()));
        }
        if let Some(from) = self.created_from {
            params.push(("fecha_creacion__gte", from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = self.created_to {
            params.push(("fecha_creacion__lte", to.format("%Y-%m-%d").to_string()));
        }
        params
    }
}

/// A file attached to an upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let content_type = content_type_for(&name).to_string();
        Ok(Self { name, content_type, bytes })
    }
}

fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_lowercase()).unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "odp" => "application/vnd.oasis.opendocument.presentation",
        "odt" => "application/vnd.oasis.opendocument.text",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// A material to upload. Videos need a video URL; every other type needs a file.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMaterial {
    pub title: String,
    pub description: String,
    pub kind: MaterialType,
    pub file: Option<UploadFile>,
    pub video_url: Option<String>,
}

/// JSON body of `POST /materiales/`; the file travels base64-encoded.
#[derive(Debug, Serialize)]
pub(crate) struct UploadPayload {
    titulo: String,
    descripcion: String,
    tipo: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    archivo_blob: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    archivo_nombre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    archivo_tipo: Option<String>,
    video_url: Option<String>,
}

impl NewMaterial {
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("a title is required".to_string());
        }
        if self.kind == MaterialType::Video {
            if self.video_url().is_none() {
                return Err("video materials need a video URL".to_string());
            }
        } else if self.file.is_none() {
            return Err(format!("{} materials need a file", self.kind.as_api_str()));
        }
        Ok(())
    }

    fn video_url(&self) -> Option<String> {
        self.video_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
    }

    /// Only the half that matches the type is sent.
    pub(crate) fn to_payload(&self) -> UploadPayload {
        let is_video = self.kind == MaterialType::Video;
        let file = if is_video { None } else { self.file.as_ref() };
        UploadPayload {
            titulo: self.title.trim().to_string(),
            descripcion: self.description.clone(),
            tipo: self.kind.as_api_str().to_string(),
            archivo_blob: file.map(|f| BASE64.encode(&f.bytes)),
            archivo_nombre: file.map(|f| f.name.clone()),
            archivo_tipo: file.map(|f| f.content_type.clone()),
            video_url: if is_video { self.video_url() } else { None },
        }
    }
}

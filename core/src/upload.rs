use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{CoreError, Result};

/// A document selected for analysis.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFile {
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl DocumentFile {
    pub fn new(file_name: impl Into<String>, mime_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type,
            bytes,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn extension(&self) -> Option<String> {
        let (_, ext) = self.file_name.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    }
}

// Document contents stay out of logs.
impl fmt::Debug for DocumentFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentFile")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("size_bytes", &self.bytes.len())
            .finish()
    }
}

/// Document formats accepted by the analysis service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Png,
    Jpeg,
    Webp,
    Heic,
    Docx,
    Text,
}

impl DocumentFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "application/pdf",
            DocumentFormat::Png => "image/png",
            DocumentFormat::Jpeg => "image/jpeg",
            DocumentFormat::Webp => "image/webp",
            DocumentFormat::Heic => "image/heic",
            DocumentFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            DocumentFormat::Text => "text/plain",
        }
    }

    pub fn from_mime_type(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "application/pdf" => Some(DocumentFormat::Pdf),
            "image/png" => Some(DocumentFormat::Png),
            "image/jpeg" | "image/jpg" => Some(DocumentFormat::Jpeg),
            "image/webp" => Some(DocumentFormat::Webp),
            "image/heic" | "image/heif" => Some(DocumentFormat::Heic),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(DocumentFormat::Docx)
            }
            "text/plain" => Some(DocumentFormat::Text),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "png" => Some(DocumentFormat::Png),
            "jpg" | "jpeg" => Some(DocumentFormat::Jpeg),
            "webp" => Some(DocumentFormat::Webp),
            "heic" | "heif" => Some(DocumentFormat::Heic),
            "docx" => Some(DocumentFormat::Docx),
            "txt" => Some(DocumentFormat::Text),
            _ => None,
        }
    }
}

/// Check a document before it is sent for analysis.
///
/// The MIME type wins when it is recognised; generic types such as
/// `application/octet-stream` fall through to the file extension.
pub fn validate_document(file: &DocumentFile, max_upload_bytes: u64) -> Result<DocumentFormat> {
    let format = file
        .mime_type
        .as_deref()
        .and_then(DocumentFormat::from_mime_type)
        .or_else(|| {
            file.extension()
                .as_deref()
                .and_then(DocumentFormat::from_extension)
        })
        .ok_or_else(|| CoreError::UnsupportedFormat {
            file_name: file.file_name.clone(),
            received: file
                .mime_type
                .clone()
                .or_else(|| file.extension())
                .unwrap_or_else(|| "unknown".to_string()),
        })?;

    if file.bytes.is_empty() {
        return Err(CoreError::EmptyFile {
            file_name: file.file_name.clone(),
        });
    }
    if file.size_bytes() > max_upload_bytes {
        return Err(CoreError::FileTooLarge {
            file_name: file.file_name.clone(),
            size_bytes: file.size_bytes(),
            max_bytes: max_upload_bytes,
        });
    }
    Ok(format)
}

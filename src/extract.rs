//! Content extraction
//!
//! Turns an uploaded artifact into plain text. Documents are decoded locally;
//! audio is only classified here and handed to the transcription provider.

mod office;

use thiserror::Error;

/// An uploaded file as received from the client
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub media_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, media_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type,
            bytes,
        }
    }

    /// Declared media type, or one inferred from the file name when the
    /// declared type is missing or generic
    pub fn effective_media_type(&self) -> String {
        match self.media_type.as_deref().map(str::trim) {
            Some(declared) if !is_generic(declared) => declared.to_ascii_lowercase(),
            _ => mime_guess::from_path(&self.name)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        }
    }

    pub fn class(&self) -> ContentClass {
        classify(&self.name, &self.effective_media_type())
    }
}

fn is_generic(media_type: &str) -> bool {
    media_type.is_empty() || media_type == "application/octet-stream"
}

/// Office document formats decoded from their OOXML parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfficeFormat {
    Docx,
    Pptx,
    Xlsx,
}

/// How an artifact becomes text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
    /// Sent to the transcription provider
    Audio,
    Office(OfficeFormat),
    PlainText,
    Unsupported,
}

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "csv", "json", "xml", "html", "htm", "log"];

const DOCX_TYPE: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const PPTX_TYPE: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";
const XLSX_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Determine the content class from the media type, falling back to the
/// file-name extension.
pub fn classify(name: &str, media_type: &str) -> ContentClass {
    let media_type = media_type.to_ascii_lowercase();
    if media_type.contains("audio") {
        return ContentClass::Audio;
    }

    match media_type.as_str() {
        DOCX_TYPE => return ContentClass::Office(OfficeFormat::Docx),
        PPTX_TYPE => return ContentClass::Office(OfficeFormat::Pptx),
        XLSX_TYPE => return ContentClass::Office(OfficeFormat::Xlsx),
        "application/json" | "application/xml" => return ContentClass::PlainText,
        t if t.starts_with("text/") => return ContentClass::PlainText,
        _ => {}
    }

    let extension = std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "docx" => ContentClass::Office(OfficeFormat::Docx),
        "pptx" => ContentClass::Office(OfficeFormat::Pptx),
        "xlsx" => ContentClass::Office(OfficeFormat::Xlsx),
        "mp3" | "wav" | "m4a" | "ogg" | "oga" | "webm" | "flac" | "mpga" => ContentClass::Audio,
        ext if TEXT_EXTENSIONS.contains(&ext) => ContentClass::PlainText,
        _ => ContentClass::Unsupported,
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Unsupported file format: {name} ({media_type})")]
    Unsupported { name: String, media_type: String },
    #[error("Failed to decode {name}: {reason}")]
    Decode { name: String, reason: String },
}

impl ExtractError {
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

/// Decode a document or text artifact into plain text.
///
/// Audio artifacts are not decoded here and are reported as unsupported;
/// callers route them to transcription first.
pub fn decode(artifact: &Artifact) -> Result<String, ExtractError> {
    let media_type = artifact.effective_media_type();
    match classify(&artifact.name, &media_type) {
        ContentClass::PlainText => Ok(String::from_utf8_lossy(&artifact.bytes).into_owned()),
        ContentClass::Office(format) => {
            office::extract_text(format, &artifact.bytes).map_err(|reason| ExtractError::Decode {
                name: artifact.name.clone(),
                reason,
            })
        }
        ContentClass::Audio | ContentClass::Unsupported => Err(ExtractError::Unsupported {
            name: artifact.name.clone(),
            media_type,
        }),
    }
}

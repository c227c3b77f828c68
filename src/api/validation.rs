//! Request validation helpers for fax submission

use super::error::ApiError;

/// Accepted upload formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaxMedia {
    Pdf,
    Text,
}

impl FaxMedia {
    pub fn extension(&self) -> &'static str {
        match self {
            FaxMedia::Pdf => "pdf",
            FaxMedia::Text => "txt",
        }
    }
}

/// Permissive E.164-style destination check: optional leading `+`,
/// 5 to 20 digits, separators tolerated and stripped.
pub fn validate_destination(raw: &str) -> Result<String, ApiError> {
    let trimmed = raw.trim();
    let (plus, digits_part) = match trimmed.strip_prefix('+') {
        Some(rest) => ("+", rest),
        None => ("", trimmed),
    };

    let digits: String = digits_part
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ApiError::Validation("destination is not a phone number".into()));
    }
    if !(5..=20).contains(&digits.len()) {
        return Err(ApiError::Validation("destination length out of range".into()));
    }

    Ok(format!("{plus}{digits}"))
}

/// Resolve the upload's media type from its declared content type, falling
/// back to the filename extension. Anything but PDF and plain text is
/// rejected.
pub fn validate_media(
    content_type: Option<&str>,
    filename: Option<&str>,
) -> Result<FaxMedia, ApiError> {
    if let Some(ct) = content_type {
        let media_type: mime::Mime = ct
            .parse()
            .map_err(|_| ApiError::UnsupportedMediaType(ct.to_string()))?;

        return match (media_type.type_(), media_type.subtype()) {
            (mime::APPLICATION, mime::PDF) => Ok(FaxMedia::Pdf),
            (mime::TEXT, mime::PLAIN) => Ok(FaxMedia::Text),
            // Browsers send generic types for drag-and-drop; fall through
            // to the extension for those
            (mime::APPLICATION, sub) if sub == "octet-stream" => {
                media_from_extension(filename).ok_or_else(|| {
                    ApiError::UnsupportedMediaType(ct.to_string())
                })
            }
            _ => Err(ApiError::UnsupportedMediaType(ct.to_string())),
        };
    }

    media_from_extension(filename)
        .ok_or_else(|| ApiError::UnsupportedMediaType("unknown".to_string()))
}

fn media_from_extension(filename: Option<&str>) -> Option<FaxMedia> {
    let name = filename?.to_ascii_lowercase();
    if name.ends_with(".pdf") {
        Some(FaxMedia::Pdf)
    } else if name.ends_with(".txt") {
        Some(FaxMedia::Text)
    } else {
        None
    }
}

/// Size check: exactly at the limit is accepted, one byte over is not.
pub fn validate_file_size(len: usize, max: usize) -> Result<(), ApiError> {
    if len > max {
        return Err(ApiError::PayloadTooLarge(len));
    }
    Ok(())
}

/// Internal PBX hooks hand us filesystem paths; anything relative or
/// escaping upward is refused.
pub fn validate_spool_path(path: &str) -> Result<(), ApiError> {
    let p = std::path::Path::new(path);
    if !p.is_absolute() {
        return Err(ApiError::Validation("spool path must be absolute".into()));
    }
    if p.components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(ApiError::Validation("spool path escapes its directory".into()));
    }
    Ok(())
}

use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::error::{QaError, Result};
use crate::models::{ChunkMetadata, LoadedDocument};

pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "txt", "docx"];

/// Reduces a path (either separator style) to its trimmed final component.
pub fn clean_source(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .last()
        .unwrap_or_default()
        .to_string()
}

pub fn file_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

pub fn is_supported(path: &Path) -> bool {
    file_extension(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Fails with `UnsupportedFormat` unless the extension is one we can load.
pub fn ensure_supported(path: &Path) -> Result<()> {
    if is_supported(path) {
        return Ok(());
    }
    Err(QaError::UnsupportedFormat(
        file_extension(path).unwrap_or_else(|| String::from("unknown")),
    ))
}

pub fn load(path: &Path) -> Result<Vec<LoadedDocument>> {
    ensure_supported(path)?;
    let extension = file_extension(path).unwrap_or_default();
    let bytes = fs::read(path)?;

    let text = match extension.as_str() {
        "pdf" => extract_pdf_text(&bytes)?,
        "docx" => extract_docx_text(&bytes)?,
        _ => String::from_utf8_lossy(&bytes).into_owned(),
    };

    let metadata = ChunkMetadata {
        source: clean_source(&path.to_string_lossy()),
        mime_type: mime_guess::from_path(path).first().map(|m| m.to_string()),
        chunk_index: 0,
    };

    if text.trim().is_empty() {
        debug!("No text extracted from {}", path.display());
        return Ok(Vec::new());
    }

    debug!("Extracted {} characters from {}", text.chars().count(), metadata.source);
    Ok(vec![LoadedDocument { text, metadata }])
}

/// pdf-extract panics on some well-formed files (missing font resources,
/// Type3 fonts), so a panic is reported as an extraction error for this file.
fn extract_pdf_text(bytes: &[u8]) -> Result<String> {
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(result) => result.map_err(|e| QaError::PdfExtraction(e.to_string())),
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| String::from("unknown cause"));
            warn!("PDF extractor panicked: {}", detail);
            Err(QaError::PdfExtraction(format!("extractor panicked: {detail}")))
        }
    }
}

fn extract_docx_text(bytes: &[u8]) -> Result<String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| QaError::DocxExtraction(e.to_string()))?;
    let mut xml = String::new();
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|e| QaError::DocxExtraction(e.to_string()))?;
    entry.read_to_string(&mut xml)?;
    docx_xml_to_text(&xml)
}

fn docx_xml_to_text(xml: &str) -> Result<String> {
    let pattern = Regex::new(r"(?s)<w:t(?:\s[^>]*)?>(.*?)</w:t>|</w:p>|<w:tab/>|<w:br\s*/>|<w:cr/>")
        .map_err(|e| QaError::DocxExtraction(e.to_string()))?;
    let numeric = Regex::new(r"&#(?:x([0-9A-Fa-f]+)|([0-9]+));")
        .map_err(|e| QaError::DocxExtraction(e.to_string()))?;

    let mut text = String::new();
    for caps in pattern.captures_iter(xml) {
        if let Some(run) = caps.get(1) {
            text.push_str(&decode_entities(run.as_str(), &numeric));
            continue;
        }
        match caps.get(0).map(|m| m.as_str()) {
            Some("<w:tab/>") => text.push('\t'),
            Some(_) => text.push('\n'),
            None => {}
        }
    }
    Ok(text)
}

/// `&amp;` goes last so an escaped reference such as `&amp;#38;` stays literal.
fn decode_entities(s: &str, numeric: &Regex) -> String {
    let named = s
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'");
    numeric
        .replace_all(&named, |caps: &Captures| {
            let code = match (caps.get(1), caps.get(2)) {
                (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
                (None, Some(dec)) => dec.as_str().parse().ok(),
                _ => None,
            };
            code.and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .replace("&amp;", "&")
}

//! Multi-format text extraction for uploaded documents.
//!
//! Dispatch is purely on the lower-cased file extension, matching upload-time validation;
//! content is never sniffed. Adding a format means adding one [`DocumentFormat`] variant and
//! one extraction arm.

use std::io::Read;
use thiserror::Error;

/// Maximum decompressed bytes read from a single OOXML ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Errors raised while turning an uploaded file into plain text.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// No extraction handler is registered for the file's extension.
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),
    /// The underlying parser rejected the file content.
    #[error("{format} extraction failed: {message}")]
    Extraction {
        /// Short name of the format whose parser failed.
        format: &'static str,
        /// Parser diagnostic message.
        message: String,
    },
}

/// Supported document formats, keyed by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// `.pdf`
    Pdf,
    /// `.docx`
    Docx,
    /// `.doc` (handled by the OOXML path; legacy binary files fail extraction)
    Doc,
    /// `.md`
    Markdown,
    /// `.txt`
    Text,
}

impl DocumentFormat {
    /// Resolve a format from a lower-cased extension.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "doc" => Some(Self::Doc),
            "md" => Some(Self::Markdown),
            "txt" => Some(Self::Text),
            _ => None,
        }
    }

    /// Resolve a format from a filename, failing when the extension is not supported.
    pub fn from_filename(filename: &str) -> Result<Self, ExtractError> {
        let extension = file_extension(filename)
            .ok_or_else(|| ExtractError::UnsupportedFormat(filename.to_string()))?;
        Self::from_extension(&extension)
            .ok_or(ExtractError::UnsupportedFormat(extension))
    }
}

/// Lower-cased extension of a filename, without the dot.
pub fn file_extension(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
}

/// Extract ordered plain-text segments from raw file bytes.
pub fn extract(bytes: &[u8], format: DocumentFormat) -> Result<Vec<String>, ExtractError> {
    let text = match format {
        DocumentFormat::Pdf => extract_pdf(bytes)?,
        DocumentFormat::Docx | DocumentFormat::Doc => extract_docx(bytes)?,
        DocumentFormat::Markdown | DocumentFormat::Text => {
            String::from_utf8_lossy(bytes).into_owned()
        }
    };
    Ok(vec![text])
}

/// Extract text from a locally materialized file, dispatching on its format.
pub fn extract_file(
    path: &std::path::Path,
    format: DocumentFormat,
) -> Result<Vec<String>, ExtractError> {
    let bytes = std::fs::read(path).map_err(|err| ExtractError::Extraction {
        format: "file",
        message: err.to_string(),
    })?;
    extract(&bytes, format)
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|err| ExtractError::Extraction {
        format: "PDF",
        message: err.to_string(),
    })
}

/// Pull the `w:t` text runs out of `word/document.xml`, inserting a newline per paragraph.
fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|err| ooxml_error(err.to_string()))?;
    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| ooxml_error("word/document.xml not found".to_string()))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|err| ooxml_error(err.to_string()))?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(ooxml_error(
                "word/document.xml exceeds size limit".to_string(),
            ));
        }
    }
    extract_text_runs(&doc_xml)
}

fn extract_text_runs(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t"
                    && let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                {
                    out.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" && !out.ends_with('\n') && !out.is_empty() {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(err) => return Err(ooxml_error(err.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

fn ooxml_error(message: String) -> ExtractError {
    ExtractError::Extraction {
        format: "OOXML",
        message,
    }
}

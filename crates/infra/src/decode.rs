//! Converting downloaded document bytes into plain text.

use std::io::{Cursor, Read};

use matchwork_core::mime_essence;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;
use tracing::debug;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

const DOCX_BODY: &str = "word/document.xml";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("failed to read pdf: {0}")]
    Pdf(String),

    #[error("failed to parse docx: {0}")]
    Docx(String),
}

/// Bytes plus MIME type in, text out. CPU-bound and synchronous.
pub trait DocumentDecoder: Send + Sync {
    fn decode(&self, mime: &str, bytes: &[u8]) -> Result<String, DecodeError>;
}

/// Decoder for plain text, PDF and DOCX, selected by MIME type.
///
/// MIME parameters (`; charset=...`) and case are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct MimeDecoder;

impl DocumentDecoder for MimeDecoder {
    fn decode(&self, mime: &str, bytes: &[u8]) -> Result<String, DecodeError> {
        match mime_essence(mime).as_str() {
            MIME_TEXT => Ok(String::from_utf8_lossy(bytes).into_owned()),
            MIME_PDF => pdf_text(bytes),
            MIME_DOCX => docx_text(bytes),
            _ => Err(DecodeError::Unsupported(mime.to_owned())),
        }
    }
}

fn pdf_text(bytes: &[u8]) -> Result<String, DecodeError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| DecodeError::Pdf(e.to_string()))?;
    let mut pages = Vec::new();
    for page in doc.get_pages().into_keys() {
        match doc.extract_text(&[page]) {
            Ok(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    pages.push(text.to_owned());
                }
            }
            Err(e) => debug!(page, error = %e, "skipping unreadable pdf page"),
        }
    }
    Ok(pages.join("\n"))
}

fn docx_text(bytes: &[u8]) -> Result<String, DecodeError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| DecodeError::Docx(e.to_string()))?;
    let mut xml = String::new();
    archive
        .by_name(DOCX_BODY)
        .map_err(|e| DecodeError::Docx(format!("{DOCX_BODY}: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| DecodeError::Docx(e.to_string()))?;
    document_xml_text(&xml)
}

/// Text runs of a WordprocessingML body, one line per paragraph.
fn document_xml_text(xml: &str) -> Result<String, DecodeError> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event().map_err(|e| DecodeError::Docx(e.to_string()))? {
            Event::Start(e) if e.name().as_ref() == b"w:t" => in_text = true,
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => out.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:tab" => out.push('\t'),
                b"w:br" | b"w:cr" => out.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text => {
                out.push_str(&t.unescape().map_err(|e| DecodeError::Docx(e.to_string()))?);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out.trim_end().to_owned())
}

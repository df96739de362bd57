//! services/api/src/extract.rs
//!
//! Best-effort text extraction for uploaded files.
//!
//! PDFs go through a tiered pipeline: direct text-layer extraction first,
//! then OCR over embedded page images, then a second OCR pass in a more
//! fragment-tolerant mode. A file that defeats every tier is still stored,
//! with a fixed placeholder as its text.

use lopdf::{Dictionary, Document, Object};
use tracing::{info, warn};
use tutor_core::ports::{OcrMode, OcrService};

pub const PDF_EXTENSIONS: &[&str] = &["pdf"];
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tiff"];

/// A text layer shorter than this is treated as "no usable text layer".
const MIN_TEXT_LAYER_CHARS: usize = 50;
/// Below this the extraction counts as failed and the placeholder is stored.
const MIN_EXTRACTED_CHARS: usize = 10;
/// Page-image budget for the first OCR pass.
const OCR_PAGE_LIMIT: usize = 10;
/// Page-image budget for the retry pass.
const OCR_RETRY_PAGE_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Image,
}

pub fn file_extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Classifies a filename into a supported upload kind, or `None` if the
/// extension is not allowed.
pub fn classify_extension(filename: &str) -> Option<FileKind> {
    let ext = file_extension(filename)?;
    if PDF_EXTENSIONS.contains(&ext.as_str()) {
        Some(FileKind::Pdf)
    } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(FileKind::Image)
    } else {
        None
    }
}

pub fn image_mime(filename: &str) -> &'static str {
    match file_extension(filename).as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("tiff") => "image/tiff",
        _ => "application/octet-stream",
    }
}

/// The fixed text stored when every extraction tier comes up empty.
pub fn extraction_failed_placeholder(filename: &str) -> String {
    format!(
        "File '{}' uploaded but text extraction failed. The file may be encrypted, \
         corrupted, or contain only images without text.",
        filename
    )
}

/// Extracts text from an uploaded file, falling back through OCR tiers.
/// Never fails: an unreadable file yields the placeholder text instead.
pub async fn extract_text(
    bytes: &[u8],
    kind: FileKind,
    filename: &str,
    ocr: &dyn OcrService,
) -> String {
    let text = match kind {
        FileKind::Pdf => extract_pdf_text(bytes, ocr).await,
        FileKind::Image => match ocr.recognize(bytes, image_mime(filename), OcrMode::Document).await
        {
            Ok(text) => text,
            Err(e) => {
                warn!("Image OCR failed for {}: {}", filename, e);
                String::new()
            }
        },
    };

    let text = text.trim().to_string();
    if text.chars().count() < MIN_EXTRACTED_CHARS {
        warn!("All extraction methods failed for {}", filename);
        extraction_failed_placeholder(filename)
    } else {
        text
    }
}

async fn extract_pdf_text(bytes: &[u8], ocr: &dyn OcrService) -> String {
    // Method 1: direct text-layer extraction.
    let mut text = match pdf_extract::extract_text_from_mem(bytes) {
        Ok(text) => {
            info!("Direct extraction successful: {} characters", text.len());
            text
        }
        Err(e) => {
            warn!("Direct extraction failed: {}", e);
            String::new()
        }
    };

    // Method 2: OCR over embedded page images.
    if text.trim().chars().count() < MIN_TEXT_LAYER_CHARS {
        info!("Attempting OCR extraction for PDF");
        let ocr_text = ocr_embedded_pages(bytes, OCR_PAGE_LIMIT, OcrMode::Document, ocr).await;
        if !ocr_text.trim().is_empty() {
            info!("OCR extraction successful: {} characters", ocr_text.len());
            text = ocr_text;
        }
    }

    // Method 3: retry in fragment mode over fewer pages.
    if text.trim().chars().count() < MIN_TEXT_LAYER_CHARS {
        info!("Attempting OCR with fragment-tolerant settings");
        let ocr_text =
            ocr_embedded_pages(bytes, OCR_RETRY_PAGE_LIMIT, OcrMode::Fragments, ocr).await;
        if !ocr_text.trim().is_empty() {
            info!(
                "Fragment-mode OCR extraction successful: {} characters",
                ocr_text.len()
            );
            text = ocr_text;
        }
    }

    text
}

async fn ocr_embedded_pages(
    bytes: &[u8],
    page_limit: usize,
    mode: OcrMode,
    ocr: &dyn OcrService,
) -> String {
    let images = match embedded_page_images(bytes, page_limit) {
        Ok(images) => images,
        Err(e) => {
            warn!("Failed to read PDF page images: {}", e);
            return String::new();
        }
    };

    let mut out = String::new();
    for image in &images {
        match ocr.recognize(image, "image/jpeg", mode).await {
            Ok(page_text) if !page_text.trim().is_empty() => {
                out.push_str(&page_text);
                out.push('\n');
            }
            Ok(_) => {}
            Err(e) => warn!("OCR failed for a page image: {}", e),
        }
    }
    out
}

/// Harvests JPEG image streams embedded in the PDF (scanned documents store
/// one full-page image per page), capped at `limit` images.
fn embedded_page_images(bytes: &[u8], limit: usize) -> Result<Vec<Vec<u8>>, lopdf::Error> {
    let doc = Document::load_mem(bytes)?;
    let mut images = Vec::new();
    for (_, object) in doc.objects.iter() {
        if images.len() >= limit {
            break;
        }
        if let Object::Stream(stream) = object {
            if is_jpeg_image(&stream.dict) {
                images.push(stream.content.clone());
            }
        }
    }
    Ok(images)
}

fn is_jpeg_image(dict: &Dictionary) -> bool {
    let is_image = matches!(
        dict.get(b"Subtype"),
        Ok(Object::Name(name)) if name.as_slice() == &b"Image"[..]
    );
    if !is_image {
        return false;
    }
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => name.as_slice() == &b"DCTDecode"[..],
        Ok(Object::Array(filters)) => filters
            .iter()
            .any(|f| matches!(f, Object::Name(name) if name.as_slice() == &b"DCTDecode"[..])),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tutor_core::ports::{PortResult, OcrService};

    struct CannedOcr(&'static str);

    #[async_trait]
    impl OcrService for CannedOcr {
        async fn recognize(&self, _: &[u8], _: &str, _: OcrMode) -> PortResult<String> {
            Ok(self.0.to_string())
        }
    }

    fn empty_pdf_bytes() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    #[test]
    fn classifies_supported_extensions() {
        assert_eq!(classify_extension("syllabus.PDF"), Some(FileKind::Pdf));
        assert_eq!(classify_extension("scan.jpeg"), Some(FileKind::Image));
        assert_eq!(classify_extension("song.mp3"), None);
        assert_eq!(classify_extension("no-extension"), None);
    }

    #[tokio::test]
    async fn image_extraction_uses_ocr_output() {
        let ocr = CannedOcr("Recognized image text from the scanner.");
        let text = extract_text(b"raw image bytes", FileKind::Image, "scan.png", &ocr).await;
        assert_eq!(text, "Recognized image text from the scanner.");
    }

    #[tokio::test]
    async fn blank_pdf_falls_through_to_placeholder() {
        // A PDF with no text layer and no embedded images defeats all tiers.
        let ocr = CannedOcr("");
        let bytes = empty_pdf_bytes();
        let text = extract_text(&bytes, FileKind::Pdf, "blank-scan.pdf", &ocr).await;
        assert_eq!(text, extraction_failed_placeholder("blank-scan.pdf"));
        assert!(text.contains("blank-scan.pdf"));
    }

    #[tokio::test]
    async fn short_ocr_noise_still_counts_as_failure() {
        let ocr = CannedOcr("::");
        let text = extract_text(b"img", FileKind::Image, "noise.bmp", &ocr).await;
        assert_eq!(text, extraction_failed_placeholder("noise.bmp"));
    }
}

//! Content extraction: raw bytes in, plain text out. Every content type has
//! a primary extraction path and, where the format allows it, a fallback
//! that degrades gracefully rather than failing outright. A final failure is
//! always a typed `CoreError::ExtractionFailed` tagged with the document id
//! (spec.md §4.1), since the ingestion pipeline needs that id to mark the
//! document FAILED and store the error message.

use std::path::Path;

use once_cell::sync::Lazy;

use crate::models::domain::ContentType;
use crate::utils::error::CoreError;

static HEADING_TAG_RE: Lazy<regex::Regex> = Lazy::new(|| regex::Regex::new(r"(?is)<h([1-6])[^>]*>(.*?)</h\1>").unwrap());
static LIST_ITEM_RE: Lazy<regex::Regex> = Lazy::new(|| regex::Regex::new(r"(?is)<li[^>]*>(.*?)</li>").unwrap());
static TAG_RE: Lazy<regex::Regex> = Lazy::new(|| regex::Regex::new(r"(?is)<[^>]+>").unwrap());
static MULTI_SPACE_RE: Lazy<regex::Regex> = Lazy::new(|| regex::Regex::new(r" {2,}").unwrap());

#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub content: String,
    pub page_count: Option<usize>,
    /// `(level, text)` for every Markdown header found, in document order.
    /// Populated only for `ContentType::Markdown`; empty otherwise.
    pub headers: Vec<(usize, String)>,
}

impl ExtractedDocument {
    fn new(content: String, page_count: Option<usize>) -> Self {
        Self { content, page_count, headers: Vec::new() }
    }
}

pub struct ContentExtractor;

impl ContentExtractor {
    pub fn extract(document_id: i64, file_path: &Path, content_type: ContentType) -> Result<ExtractedDocument, CoreError> {
        let result = match content_type {
            ContentType::Pdf => Self::extract_pdf_layout_aware(file_path).or_else(|e| {
                tracing::warn!(document_id, error = %e, "layout-aware PDF extraction failed, falling back to page-wise text");
                Self::extract_pdf_page_wise(file_path)
            }),
            ContentType::Docx => Self::extract_docx(file_path),
            ContentType::Pptx => Self::extract_pptx(file_path),
            ContentType::Html => Self::extract_html_structured(file_path).or_else(|e| {
                tracing::warn!(document_id, error = %e, "structured HTML extraction failed, falling back to minimal parse");
                Self::extract_html_minimal(file_path)
            }),
            ContentType::Markdown => Self::extract_markdown(file_path),
            ContentType::Csv => Self::extract_csv(file_path),
            ContentType::Text => Self::extract_text(file_path),
            ContentType::Image => Self::extract_image_layout_aware(file_path).or_else(|e| {
                tracing::warn!(document_id, error = %e, "layout-aware OCR failed, falling back to plain OCR");
                Self::extract_image_plain_ocr(file_path)
            }),
        };

        result.map_err(|e| CoreError::ExtractionFailed {
            document_id,
            message: e.to_string(),
        })
    }

    /// Primary PDF path: per-page layout-preserving extraction with a crude
    /// table-row heuristic (lines holding 2+ runs of 2+ spaces are annotated
    /// `[table row]`, since lopdf has no real layout/table model to draw on).
    /// A page that fails to extract is a hard error here — per spec.md §4.1
    /// "errors trigger the fallback" — rather than silently skipped, so the
    /// whole document drops to the page-wise fallback instead of silently
    /// losing a page's content.
    fn extract_pdf_layout_aware(file_path: &Path) -> anyhow::Result<ExtractedDocument> {
        use lopdf::Document;

        let doc = Document::load(file_path)?;
        let page_count = doc.get_pages().len();
        if page_count == 0 {
            anyhow::bail!("PDF contained no pages");
        }

        let mut content = String::new();
        for page_num in 1..=page_count as u32 {
            let text = doc
                .extract_text(&[page_num])
                .map_err(|e| anyhow::anyhow!("page {} unreadable: {}", page_num, e))?;

            for line in text.lines() {
                if is_table_like_row(line) {
                    content.push_str("[table row] ");
                }
                content.push_str(line);
                content.push('\n');
            }
        }

        if content.trim().is_empty() {
            anyhow::bail!("no extractable text in any of {} PDF pages", page_count);
        }

        Ok(ExtractedDocument::new(content, Some(page_count)))
    }

    /// Fallback PDF path: whole-document text extraction, no per-page table
    /// annotation. Tolerant of individual unreadable pages — a PDF that is
    /// mostly readable should still yield the text it can.
    fn extract_pdf_page_wise(file_path: &Path) -> anyhow::Result<ExtractedDocument> {
        use lopdf::Document;

        let doc = Document::load(file_path)?;
        let page_count = doc.get_pages().len();

        let mut content = String::new();
        let mut pages_extracted = 0usize;

        for page_num in 1..=page_count as u32 {
            match doc.extract_text(&[page_num]) {
                Ok(text) => {
                    content.push_str(&text);
                    content.push('\n');
                    pages_extracted += 1;
                }
                Err(_) => continue,
            }
        }

        if pages_extracted == 0 {
            anyhow::bail!("no extractable text in any of {} PDF pages", page_count);
        }

        Ok(ExtractedDocument::new(content, Some(page_count)))
    }

    fn extract_docx(file_path: &Path) -> anyhow::Result<ExtractedDocument> {
        use docx_rs::*;

        let data = std::fs::read(file_path)?;
        let docx = read_docx(&data)?;

        let mut content = String::new();
        for child in docx.document.children {
            if let DocumentChild::Paragraph(para) = child {
                for child in para.children {
                    if let ParagraphChild::Run(run) = child {
                        for child in run.children {
                            if let RunChild::Text(text) = child {
                                content.push_str(&text.text);
                            }
                        }
                    }
                }
                content.push('\n');
            }
        }

        if content.trim().is_empty() {
            anyhow::bail!("docx contained no paragraph text");
        }

        Ok(ExtractedDocument::new(content, None))
    }

    /// A pptx is a zip of slide XML parts; each run of visible text lives in
    /// an `<a:t>` element. Slides are concatenated in file order, which
    /// matches presentation order for every deck produced by PowerPoint or
    /// LibreOffice.
    fn extract_pptx(file_path: &Path) -> anyhow::Result<ExtractedDocument> {
        use quick_xml::events::Event;
        use quick_xml::Reader;
        use std::io::Read;

        let file = std::fs::File::open(file_path)?;
        let mut archive = zip::ZipArchive::new(file)?;

        let mut slide_names: Vec<String> = (0..archive.len())
            .filter_map(|i| archive.by_index(i).ok().map(|f| f.name().to_string()))
            .filter(|name| name.starts_with("ppt/slides/slide") && name.ends_with(".xml"))
            .collect();
        slide_names.sort_by_key(|name| {
            name.trim_start_matches("ppt/slides/slide")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX)
        });

        if slide_names.is_empty() {
            anyhow::bail!("pptx archive contained no slide parts");
        }

        let mut content = String::new();
        for name in slide_names {
            let mut xml = String::new();
            archive.by_name(&name)?.read_to_string(&mut xml)?;

            let mut reader = Reader::from_str(&xml);
            reader.config_mut().trim_text(true);
            let mut buf = Vec::new();
            let mut in_text_run = false;

            loop {
                match reader.read_event_into(&mut buf) {
                    Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text_run = true,
                    Ok(Event::End(e)) if e.local_name().as_ref() == b"t" => in_text_run = false,
                    Ok(Event::Text(t)) if in_text_run => {
                        content.push_str(&t.decode().unwrap_or_default());
                        content.push(' ');
                    }
                    Ok(Event::Eof) => break,
                    Err(_) => break,
                    _ => {}
                }
                buf.clear();
            }
            content.push('\n');
        }

        if content.trim().is_empty() {
            anyhow::bail!("pptx slides contained no extractable text runs");
        }

        Ok(ExtractedDocument::new(content, None))
    }

    /// Primary HTML path: parse the DOM and join the `<body>`'s text nodes.
    fn extract_html_structured(file_path: &Path) -> anyhow::Result<ExtractedDocument> {
        use scraper::{Html, Selector};

        let raw = std::fs::read_to_string(file_path)?;
        let document = Html::parse_document(&raw);
        let body_selector = Selector::parse("body").map_err(|e| anyhow::anyhow!("invalid selector: {:?}", e))?;

        let content = match document.select(&body_selector).next() {
            Some(body) => body.text().collect::<Vec<_>>().join(" "),
            None => document.root_element().text().collect::<Vec<_>>().join(" "),
        };

        let normalized = content.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.is_empty() {
            anyhow::bail!("html document contained no visible text");
        }

        Ok(ExtractedDocument::new(normalized, None))
    }

    /// Fallback HTML path: no DOM, just tag stripping with a handful of
    /// structural tags rewritten to markdown-like lines so headings and
    /// list items survive even when the document doesn't parse as valid
    /// HTML (spec.md §4.1 "minimal-parse fallback producing markdown-like
    /// output").
    fn extract_html_minimal(file_path: &Path) -> anyhow::Result<ExtractedDocument> {
        let raw = Self::read_text_with_fallback(file_path)?;

        let mut markdown_like = raw.clone();
        markdown_like = HEADING_TAG_RE
            .replace_all(&markdown_like, |caps: &regex::Captures| {
                let level: usize = caps[1].parse().unwrap_or(1);
                format!("\n{} {}\n", "#".repeat(level), strip_tags(&caps[2]))
            })
            .into_owned();
        markdown_like = LIST_ITEM_RE
            .replace_all(&markdown_like, |caps: &regex::Captures| format!("\n- {}\n", strip_tags(&caps[1])))
            .into_owned();
        let plain = strip_tags(&markdown_like);

        let normalized = plain.lines().map(str::trim).filter(|l| !l.is_empty()).collect::<Vec<_>>().join("\n");
        if normalized.is_empty() {
            anyhow::bail!("html document contained no visible text");
        }

        Ok(ExtractedDocument::new(normalized, None))
    }

    /// Records each header's level and text in `headers` (spec.md §4.1)
    /// without altering `content`, which stays the raw markdown source so
    /// the chunker's own header regex keeps working unchanged.
    fn extract_markdown(file_path: &Path) -> anyhow::Result<ExtractedDocument> {
        use pulldown_cmark::{HeadingLevel, Parser, Tag, TagEnd};

        let content = Self::read_text_with_fallback(file_path)?;
        if content.trim().is_empty() {
            anyhow::bail!("markdown file was empty");
        }

        let mut headers = Vec::new();
        let mut current_level: Option<usize> = None;
        let mut current_text = String::new();

        for event in Parser::new(&content) {
            match event {
                pulldown_cmark::Event::Start(Tag::Heading { level, .. }) => {
                    current_level = Some(heading_level_number(level));
                    current_text.clear();
                }
                pulldown_cmark::Event::End(TagEnd::Heading(_)) => {
                    if let Some(level) = current_level.take() {
                        headers.push((level, current_text.trim().to_string()));
                    }
                }
                pulldown_cmark::Event::Text(text) if current_level.is_some() => {
                    current_text.push_str(&text);
                }
                pulldown_cmark::Event::Code(text) if current_level.is_some() => {
                    current_text.push_str(&text);
                }
                _ => {}
            }
        }

        let mut extracted = ExtractedDocument::new(content, None);
        extracted.headers = headers;
        Ok(extracted)
    }

    /// Spec-literal text form: "Headers: …\n\nRow i: …", one line per row,
    /// 1-indexed (spec.md §4.1).
    fn extract_csv(file_path: &Path) -> anyhow::Result<ExtractedDocument> {
        let raw = Self::read_text_with_fallback(file_path)?;
        let mut lines = raw.lines();
        let header = lines.next().unwrap_or_default();
        let headers: Vec<&str> = header.split(',').map(|h| h.trim()).collect();

        let mut content = format!("Headers: {}\n\n", headers.join(", "));
        let mut row_count = 0usize;
        for (i, row) in lines.enumerate() {
            let cells: Vec<&str> = row.split(',').map(|c| c.trim()).collect();
            content.push_str(&format!("Row {}: {}\n", i + 1, cells.join(", ")));
            row_count += 1;
        }

        if row_count == 0 {
            anyhow::bail!("csv contained no data rows");
        }

        Ok(ExtractedDocument::new(content, None))
    }

    fn extract_text(file_path: &Path) -> anyhow::Result<ExtractedDocument> {
        let content = Self::read_text_with_fallback(file_path)?;
        if content.trim().is_empty() {
            anyhow::bail!("text file was empty");
        }
        Ok(ExtractedDocument::new(content, None))
    }

    /// Primary image path: grayscale preprocessing via `image`, then OCR via
    /// `rusty-tesseract` with layout-preserving args (`--psm 3`, tesseract's
    /// automatic page segmentation), matching the structured-OCR description
    /// in spec.md §4.1.
    fn extract_image_layout_aware(file_path: &Path) -> anyhow::Result<ExtractedDocument> {
        let img = image::open(file_path)?.to_luma8();
        let preprocessed_path = file_path.with_extension("ocr_pre.png");
        img.save(&preprocessed_path)?;

        let mut args = rusty_tesseract::Args::default();
        args.psm = Some(3);

        let ocr_image = rusty_tesseract::Image::from_path(&preprocessed_path)
            .map_err(|e| anyhow::anyhow!("failed to load preprocessed image for OCR: {}", e))?;
        let result = rusty_tesseract::image_to_string(&ocr_image, &args);
        let _ = std::fs::remove_file(&preprocessed_path);

        let content = result.map_err(|e| anyhow::anyhow!("layout-aware OCR failed: {}", e))?;
        if content.trim().is_empty() {
            anyhow::bail!("OCR produced no text");
        }

        Ok(ExtractedDocument::new(content, None))
    }

    /// Fallback image path: OCR directly against the original bytes, no
    /// preprocessing and default tesseract args.
    fn extract_image_plain_ocr(file_path: &Path) -> anyhow::Result<ExtractedDocument> {
        let ocr_image = rusty_tesseract::Image::from_path(file_path)
            .map_err(|e| anyhow::anyhow!("failed to load image for OCR: {}", e))?;
        let content = rusty_tesseract::image_to_string(&ocr_image, &rusty_tesseract::Args::default())
            .map_err(|e| anyhow::anyhow!("plain OCR failed: {}", e))?;

        if content.trim().is_empty() {
            anyhow::bail!("OCR produced no text");
        }

        Ok(ExtractedDocument::new(content, None))
    }

    /// UTF-8 first; on failure, detect and transcode from the most common
    /// legacy encodings rather than failing a document outright.
    fn read_text_with_fallback(file_path: &Path) -> anyhow::Result<String> {
        let bytes = std::fs::read(file_path)?;
        match String::from_utf8(bytes.clone()) {
            Ok(s) => Ok(s),
            Err(_) => {
                let (decoded, _, had_errors) = encoding_rs::WINDOWS_1252.decode(&bytes);
                if had_errors {
                    anyhow::bail!("could not decode file as UTF-8 or Windows-1252");
                }
                Ok(decoded.into_owned())
            }
        }
    }
}

fn heading_level_number(level: pulldown_cmark::HeadingLevel) -> usize {
    use pulldown_cmark::HeadingLevel::*;
    match level {
        H1 => 1,
        H2 => 2,
        H3 => 3,
        H4 => 4,
        H5 => 5,
        H6 => 6,
    }
}

fn strip_tags(s: &str) -> String {
    TAG_RE.replace_all(s, "").trim().to_string()
}

/// Heuristic for lopdf's flat text output: a line with 2+ runs of 2+ spaces
/// usually means a table's columns were laid out with whitespace.
fn is_table_like_row(line: &str) -> bool {
    MULTI_SPACE_RE.find_iter(line).count() >= 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("docbrain-extractor-test-{}-{}", std::process::id(), name));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn csv_extraction_matches_spec_literal_format() {
        let path = write_temp("t.csv", b"name,age\nAlice,30\nBob,40\n");
        let extracted = ContentExtractor::extract_csv(&path).unwrap();
        assert_eq!(extracted.content, "Headers: name, age\n\nRow 1: Alice, 30\nRow 2: Bob, 40\n");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn markdown_extraction_records_header_levels_and_text() {
        let path = write_temp("t.md", b"# Title\n\nbody text\n\n## Sub heading\n\nmore body\n");
        let extracted = ContentExtractor::extract_markdown(&path).unwrap();
        assert_eq!(extracted.headers, vec![(1, "Title".to_string()), (2, "Sub heading".to_string())]);
        assert!(extracted.content.contains("# Title"));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn html_minimal_fallback_converts_headings_and_list_items() {
        let path = write_temp("t.html", b"<h1>Title</h1><ul><li>one</li><li>two</li></ul>");
        let extracted = ContentExtractor::extract_html_minimal(&path).unwrap();
        assert!(extracted.content.contains("# Title"));
        assert!(extracted.content.contains("- one"));
        assert!(extracted.content.contains("- two"));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn text_extraction_rejects_empty_file() {
        let path = write_temp("t.txt", b"");
        assert!(ContentExtractor::extract_text(&path).is_err());
        std::fs::remove_file(path).ok();
    }
}

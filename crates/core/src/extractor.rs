use crate::chunking::normalize_line_endings;
use crate::error::IngestError;
use crate::models::DocumentFormat;
use lopdf::Document;
use regex::{Captures, Regex};
use std::io::{Cursor, Read};
use tracing::{debug, warn};

const DOCX_BODY: &str = "word/document.xml";
const DOCX_TOKENS: &str =
    r"</w:p>|<w:tab/>|<w:(?:br|cr)(?: [^>]*)?/>|<w:t(?: [^>]*)?>([^<]*)</w:t>";
const XML_ENTITY: &str = r"&(#x[0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);";
const PAGE_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PageSpan {
    number: u32,
    start: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    pages: Vec<PageSpan>,
}

impl ExtractedText {
    pub fn single(text: String) -> Self {
        Self {
            text,
            pages: Vec::new(),
        }
    }

    pub fn from_pages(pages: Vec<PageText>) -> Self {
        let mut text = String::new();
        let mut spans = Vec::new();
        let mut offset = 0usize;

        for page in pages {
            let normalized = normalize_line_endings(&page.text);
            let trimmed = normalized.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push_str(PAGE_SEPARATOR);
                offset += PAGE_SEPARATOR.chars().count();
            }
            spans.push(PageSpan {
                number: page.number,
                start: offset,
            });
            text.push_str(trimmed);
            offset += trimmed.chars().count();
        }

        Self { text, pages: spans }
    }

    /// Page that contains the character at `offset`, if the format has pages.
    pub fn page_at(&self, offset: usize) -> Option<u32> {
        let index = self.pages.partition_point(|span| span.start <= offset);
        index
            .checked_sub(1)
            .and_then(|index| self.pages.get(index))
            .map(|span| span.number)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

pub trait TextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl TextExtractor for LopdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::parse("pdf", error))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            match document.extract_text(&[page_no]) {
                Ok(text) => pages.push(PageText {
                    number: page_no,
                    text,
                }),
                Err(error) => warn!(page = page_no, %error, "skipping unreadable pdf page"),
            }
        }

        if pages.is_empty() {
            return Err(IngestError::parse("pdf", "no page could be read"));
        }

        debug!(pages = pages.len(), "extracted pdf pages");
        Ok(ExtractedText::from_pages(pages))
    }
}

#[derive(Default)]
pub struct DocxExtractor;

impl TextExtractor for DocxExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, IngestError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|error| IngestError::parse("docx", error))?;
        let mut body = archive
            .by_name(DOCX_BODY)
            .map_err(|error| IngestError::parse("docx", format!("{DOCX_BODY}: {error}")))?;

        let mut xml = String::new();
        body.read_to_string(&mut xml)
            .map_err(|error| IngestError::parse("docx", error))?;

        let text = docx_xml_to_text(&xml)?;
        Ok(ExtractedText::single(
            normalize_line_endings(&text).trim().to_string(),
        ))
    }
}

#[derive(Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, IngestError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|error| IngestError::parse("text", format!("not valid utf-8: {error}")))?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        Ok(ExtractedText::single(
            normalize_line_endings(text).trim().to_string(),
        ))
    }
}

pub fn extractor_for(format: DocumentFormat) -> Box<dyn TextExtractor + Send + Sync> {
    match format {
        DocumentFormat::Pdf => Box::new(LopdfExtractor),
        DocumentFormat::Docx => Box::new(DocxExtractor),
        DocumentFormat::Text | DocumentFormat::Markdown => Box::new(PlainTextExtractor),
    }
}

pub fn extract_text(
    bytes: &[u8],
    format: DocumentFormat,
    filename: &str,
) -> Result<ExtractedText, IngestError> {
    let extracted = extractor_for(format).extract(bytes)?;
    if extracted.is_blank() {
        return Err(IngestError::EmptyDocument(filename.to_string()));
    }
    Ok(extracted)
}

fn docx_xml_to_text(xml: &str) -> Result<String, IngestError> {
    let tokens = Regex::new(DOCX_TOKENS).map_err(|error| IngestError::parse("docx", error))?;
    let entity = Regex::new(XML_ENTITY).map_err(|error| IngestError::parse("docx", error))?;

    let mut text = String::new();
    for capture in tokens.captures_iter(xml) {
        if let Some(run) = capture.get(1) {
            text.push_str(&decode_entities(&entity, run.as_str()));
            continue;
        }
        match capture.get(0).map(|token| token.as_str()) {
            Some("</w:p>") => text.push('\n'),
            Some("<w:tab/>") => text.push('\t'),
            Some(_) => text.push('\n'),
            None => {}
        }
    }
    Ok(text)
}

fn decode_entities(entity: &Regex, raw: &str) -> String {
    entity
        .replace_all(raw, |capture: &Captures| {
            let name = &capture[1];
            let decoded = match name {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => name
                    .strip_prefix("#x")
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| name.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| capture[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_bytes(document_xml: &str) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            let options = zip::write::FileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            writer.start_file(DOCX_BODY, options).unwrap();
            writer.write_all(document_xml.as_bytes()).unwrap();
            writer.finish().unwrap();
        }
        buffer.into_inner()
    }

    #[test]
    fn pages_are_joined_with_recorded_offsets() {
        let extracted = ExtractedText::from_pages(vec![
            PageText {
                number: 1,
                text: "  Abstract\r\n".to_string(),
            },
            PageText {
                number: 2,
                text: "   ".to_string(),
            },
            PageText {
                number: 3,
                text: "Results".to_string(),
            },
        ]);

        assert_eq!(extracted.text, "Abstract\n\nResults");
        assert_eq!(extracted.page_count(), 2);
        assert_eq!(extracted.page_at(0), Some(1));
        assert_eq!(extracted.page_at(9), Some(1));
        assert_eq!(extracted.page_at(10), Some(3));
        assert_eq!(ExtractedText::single("x".to_string()).page_at(0), None);
    }

    #[test]
    fn plain_text_strips_bom_and_trims() {
        let extracted = PlainTextExtractor
            .extract("\u{feff}\n# Title\r\nBody\n".as_bytes())
            .unwrap();
        assert_eq!(extracted.text, "# Title\nBody");
    }

    #[test]
    fn invalid_utf8_is_a_parse_error() {
        let result = extract_text(&[0xff, 0xfe, 0x00], DocumentFormat::Text, "bad.txt");
        assert!(matches!(result, Err(IngestError::Parse { .. })));
    }

    #[test]
    fn whitespace_only_text_is_empty() {
        let result = extract_text(b" \n\t ", DocumentFormat::Markdown, "blank.md");
        assert!(matches!(result, Err(IngestError::EmptyDocument(name)) if name == "blank.md"));
    }

    #[test]
    fn garbage_pdf_is_a_parse_error() {
        let result = extract_text(b"%PDF-1.4\n%broken", DocumentFormat::Pdf, "broken.pdf");
        assert!(matches!(result, Err(IngestError::Parse { .. })));
    }

    #[test]
    fn docx_paragraphs_runs_and_entities_are_extracted() {
        let xml = concat!(
            r#"<w:document><w:body>"#,
            r#"<w:p><w:pPr><w:pStyle w:val="Title"/></w:pPr><w:r><w:t>Deep &amp; Wide</w:t></w:r></w:p>"#,
            r#"<w:p><w:r><w:t xml:space="preserve">Accuracy </w:t></w:r><w:r><w:tab/><w:t>92&#37;</w:t></w:r></w:p>"#,
            r#"</w:body></w:document>"#
        );

        let extracted = extract_text(&docx_bytes(xml), DocumentFormat::Docx, "paper.docx").unwrap();
        assert_eq!(extracted.text, "Deep & Wide\nAccuracy \t92%");
    }

    #[test]
    fn docx_without_body_is_a_parse_error() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            writer
                .start_file("other.xml", zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(b"<x/>").unwrap();
            writer.finish().unwrap();
        }

        let result = extract_text(&buffer.into_inner(), DocumentFormat::Docx, "empty.docx");
        assert!(matches!(result, Err(IngestError::Parse { ref format, .. }) if format == "docx"));
    }
}

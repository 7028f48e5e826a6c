//! DOCX document generator
//!
//! Writes a minimal WordprocessingML package: Times New Roman 12pt body, a
//! centered source header, the participant list, a separator, one paragraph
//! per transcript line and a page number in the footer.

use std::io::{Cursor, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{DocumentGenerator, StageError, StageResult, TranscriptDocument};
use crate::services::assembler::TranscriptLine;

pub const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/><Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/><Override PartName="/word/footer1.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.footer+xml"/></Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const DOCUMENT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/footer" Target="footer1.xml"/></Relationships>"#;

const STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:docDefaults><w:rPrDefault><w:rPr><w:rFonts w:ascii="Times New Roman" w:hAnsi="Times New Roman" w:eastAsia="Times New Roman" w:cs="Times New Roman"/><w:sz w:val="24"/><w:szCs w:val="24"/><w:lang w:val="ru-RU"/></w:rPr></w:rPrDefault></w:docDefaults><w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/></w:style></w:styles>"#;

const FOOTER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:ftr xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:p><w:pPr><w:jc w:val="center"/></w:pPr><w:r><w:fldChar w:fldCharType="begin"/></w:r><w:r><w:instrText xml:space="preserve"> PAGE </w:instrText></w:r><w:r><w:fldChar w:fldCharType="separate"/></w:r><w:r><w:t>1</w:t></w:r><w:r><w:fldChar w:fldCharType="end"/></w:r></w:p></w:ftr>"#;

/// Page setup: A4, margins 2cm top/bottom, 3cm left, 1.5cm right (twips)
const SECTION_PROPERTIES: &str = r#"<w:sectPr><w:footerReference w:type="default" r:id="rId2"/><w:pgSz w:w="11906" w:h="16838"/><w:pgMar w:top="1134" w:right="850" w:bottom="1134" w:left="1701" w:header="708" w:footer="708" w:gutter="0"/></w:sectPr>"#;

#[derive(Debug, Default, Clone, Copy)]
pub struct DocxGenerator;

impl DocxGenerator {
    pub fn new() -> Self {
        Self
    }

    fn document_xml(document: &TranscriptDocument) -> String {
        let mut body = String::new();

        body.push_str(&paragraph(
            Some("center"),
            &[Run::new(&format!("ИСХОДНИК: {}", document.source_filename))
                .bold()
                .size(28)],
        ));
        body.push_str(&paragraph(None, &[]));

        let mut participants = vec![Run::new("УЧАСТНИКИ:").bold()];
        for participant in &document.participants {
            let mut entry = participant.name.to_uppercase();
            if !participant.abbreviation.is_empty() {
                entry.push_str(&format!(" ({})", participant.abbreviation));
            }
            participants.push(Run::new(&entry).break_before());
        }
        body.push_str(&paragraph(None, &participants));
        body.push_str(&paragraph(None, &[]));

        body.push_str(&paragraph(Some("center"), &[Run::new(&"— ".repeat(20))]));
        body.push_str(&paragraph(None, &[]));

        for line in &document.lines {
            let runs = match line {
                TranscriptLine::Speech {
                    timecode,
                    speaker,
                    text,
                    ..
                } => vec![
                    Run::new(&format!("{} ", timecode)).size(20),
                    Run::new(&format!("{}: ", speaker)).bold(),
                    Run::new(text),
                ],
                TranscriptLine::Remark { text, .. } => vec![Run::new(text).italic()],
            };
            body.push_str(&paragraph(None, &runs));
        }

        format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
                "\n",
                r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" "#,
                r#"xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">"#,
                "<w:body>{}{}</w:body></w:document>"
            ),
            body, SECTION_PROPERTIES
        )
    }
}

impl DocumentGenerator for DocxGenerator {
    fn generate(&self, document: &TranscriptDocument) -> StageResult<Vec<u8>> {
        let parts: [(&str, String); 6] = [
            ("[Content_Types].xml", CONTENT_TYPES_XML.to_string()),
            ("_rels/.rels", ROOT_RELS_XML.to_string()),
            ("word/_rels/document.xml.rels", DOCUMENT_RELS_XML.to_string()),
            ("word/styles.xml", STYLES_XML.to_string()),
            ("word/footer1.xml", FOOTER_XML.to_string()),
            ("word/document.xml", Self::document_xml(document)),
        ];

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        for (name, content) in parts.iter() {
            zip.start_file(*name, options)
                .map_err(|e| StageError::Generation(e.to_string()))?;
            zip.write_all(content.as_bytes())
                .map_err(|e| StageError::Generation(e.to_string()))?;
        }

        let cursor = zip
            .finish()
            .map_err(|e| StageError::Generation(e.to_string()))?;
        Ok(cursor.into_inner())
    }

    fn content_type(&self) -> &'static str {
        DOCX_CONTENT_TYPE
    }

    fn extension(&self) -> &'static str {
        ".docx"
    }
}

struct Run {
    text: String,
    bold: bool,
    italic: bool,
    half_points: Option<u32>,
    break_before: bool,
}

impl Run {
    fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            bold: false,
            italic: false,
            half_points: None,
            break_before: false,
        }
    }

    fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    fn italic(mut self) -> Self {
        self.italic = true;
        self
    }

    fn size(mut self, half_points: u32) -> Self {
        self.half_points = Some(half_points);
        self
    }

    fn break_before(mut self) -> Self {
        self.break_before = true;
        self
    }

    fn to_xml(&self) -> String {
        let mut props = String::new();
        if self.bold {
            props.push_str("<w:b/>");
        }
        if self.italic {
            props.push_str("<w:i/>");
        }
        if let Some(sz) = self.half_points {
            props.push_str(&format!(r#"<w:sz w:val="{0}"/><w:szCs w:val="{0}"/>"#, sz));
        }

        let mut xml = String::from("<w:r>");
        if !props.is_empty() {
            xml.push_str(&format!("<w:rPr>{}</w:rPr>", props));
        }
        if self.break_before {
            xml.push_str("<w:br/>");
        }
        xml.push_str(&format!(
            r#"<w:t xml:space="preserve">{}</w:t></w:r>"#,
            escape_xml(&self.text)
        ));
        xml
    }
}

fn paragraph(align: Option<&str>, runs: &[Run]) -> String {
    let mut xml = String::from("<w:p>");
    if let Some(jc) = align {
        xml.push_str(&format!(r#"<w:pPr><w:jc w:val="{}"/></w:pPr>"#, jc));
    }
    for run in runs {
        xml.push_str(&run.to_xml());
    }
    xml.push_str("</w:p>");
    xml
}

/// Escape text content; control characters XML 1.0 forbids are dropped
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(c),
            c if (c as u32) < 0x20 => {}
            c => out.push(c),
        }
    }
    out
}

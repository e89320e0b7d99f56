//! OOXML text extraction (docx, pptx, xlsx)

use super::OfficeFormat;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};
use zip::ZipArchive;

/// Upper bound on decompressed XML read from one archive, across all parts
pub(super) const MAX_EXPANDED_BYTES: u64 = 16 * 1024 * 1024;

type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

pub(super) fn extract_text(format: OfficeFormat, bytes: &[u8]) -> Result<String, String> {
    let archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("not an OOXML archive: {e}"))?;
    let mut parts = Parts {
        archive,
        remaining: MAX_EXPANDED_BYTES,
    };

    let text = match format {
        OfficeFormat::Docx => docx_text(&mut parts)?,
        OfficeFormat::Pptx => pptx_text(&mut parts)?,
        OfficeFormat::Xlsx => xlsx_text(&mut parts)?,
    };
    Ok(text.trim().to_string())
}

/// Archive reader that charges every decompressed part against one budget
struct Parts<'a> {
    archive: Archive<'a>,
    remaining: u64,
}

impl Parts<'_> {
    fn contains(&self, path: &str) -> bool {
        self.archive.index_for_name(path).is_some()
    }

    fn read(&mut self, path: &str) -> Result<String, String> {
        let limit = self.remaining;
        let part = self
            .archive
            .by_name(path)
            .map_err(|e| format!("missing part {path}: {e}"))?;
        if part.size() > limit {
            return Err(too_large(path));
        }

        // The declared size is not trusted; the read itself is capped too.
        let mut raw = Vec::new();
        part.take(limit + 1)
            .read_to_end(&mut raw)
            .map_err(|e| format!("unreadable part {path}: {e}"))?;
        let read = raw.len() as u64;
        if read > limit {
            return Err(too_large(path));
        }
        self.remaining = limit - read;

        String::from_utf8(raw).map_err(|e| format!("invalid UTF-8 in part {path}: {e}"))
    }

    /// Numbered parts such as `ppt/slides/slide12.xml`, in numeric order
    fn numbered(&self, prefix: &str) -> Vec<String> {
        let mut parts: Vec<(u32, String)> = self
            .archive
            .file_names()
            .filter_map(|name| {
                let number = name.strip_prefix(prefix)?.strip_suffix(".xml")?.parse().ok()?;
                Some((number, name.to_string()))
            })
            .collect();
        parts.sort_unstable();
        parts.into_iter().map(|(_, name)| name).collect()
    }
}

const SHARED_STRINGS: &str = "xl/sharedStrings.xml";

fn too_large(path: &str) -> String {
    format!("document expands beyond {MAX_EXPANDED_BYTES} bytes at part {path}")
}

fn docx_text(parts: &mut Parts<'_>) -> Result<String, String> {
    let xml = parts.read("word/document.xml")?;
    paragraphs_text(&xml, b"t", b"p")
}

fn pptx_text(parts: &mut Parts<'_>) -> Result<String, String> {
    let slides = parts.numbered("ppt/slides/slide");
    if slides.is_empty() {
        return Err("presentation has no slides".to_string());
    }

    let mut out = Vec::with_capacity(slides.len());
    for slide in slides {
        let xml = parts.read(&slide)?;
        out.push(paragraphs_text(&xml, b"t", b"p")?);
    }
    Ok(out.join("\n\n"))
}

fn xlsx_text(parts: &mut Parts<'_>) -> Result<String, String> {
    // Workbooks without any text cells omit the shared string table.
    let shared = if parts.contains(SHARED_STRINGS) {
        shared_strings(&parts.read(SHARED_STRINGS)?)?
    } else {
        Vec::new()
    };

    let sheets = parts.numbered("xl/worksheets/sheet");
    if sheets.is_empty() {
        return Err("workbook has no worksheets".to_string());
    }

    let mut out = Vec::with_capacity(sheets.len());
    for sheet in sheets {
        let xml = parts.read(&sheet)?;
        out.push(sheet_text(&xml, &shared)?);
    }
    Ok(out.join("\n\n"))
}

/// Collect text runs, ending a line at each paragraph close.
fn paragraphs_text(xml: &str, run: &[u8], paragraph: &[u8]) -> Result<String, String> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut in_run = false;

    loop {
        match reader.read_event().map_err(|e| format!("malformed XML: {e}"))? {
            Event::Start(e) if e.local_name().as_ref() == run => in_run = true,
            Event::End(e) if e.local_name().as_ref() == run => in_run = false,
            Event::End(e) if e.local_name().as_ref() == paragraph => out.push('\n'),
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_run => out.push_str(&unescape(&t)?),
            Event::GeneralRef(r) if in_run => out.push_str(&resolve_ref(&r)?),
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(out)
}

fn shared_strings(xml: &str) -> Result<Vec<String>, String> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event().map_err(|e| format!("malformed shared strings: {e}"))? {
            Event::Start(e) if e.local_name().as_ref() == b"si" => current.clear(),
            Event::End(e) if e.local_name().as_ref() == b"si" => strings.push(std::mem::take(&mut current)),
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::End(e) if e.local_name().as_ref() == b"t" => in_text = false,
            Event::Text(t) if in_text => current.push_str(&unescape(&t)?),
            Event::GeneralRef(r) if in_text => current.push_str(&resolve_ref(&r)?),
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(strings)
}

/// Rows become lines, cells within a row are tab-separated.
fn sheet_text(xml: &str, shared: &[String]) -> Result<String, String> {
    let mut reader = Reader::from_str(xml);
    let mut rows: Vec<String> = Vec::new();
    let mut cells: Vec<String> = Vec::new();
    let mut cell_type: Option<String> = None;
    let mut value = String::new();
    let mut capturing = false;

    loop {
        match reader.read_event().map_err(|e| format!("malformed worksheet: {e}"))? {
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                cell_type = e
                    .try_get_attribute("t")
                    .map_err(|e| format!("malformed cell: {e}"))?
                    .map(|a| String::from_utf8_lossy(&a.value).into_owned());
                value.clear();
            }
            Event::Start(e) if matches!(e.local_name().as_ref(), b"v" | b"t") => capturing = true,
            Event::End(e) if matches!(e.local_name().as_ref(), b"v" | b"t") => capturing = false,
            Event::Text(t) if capturing => value.push_str(&unescape(&t)?),
            Event::GeneralRef(r) if capturing => value.push_str(&resolve_ref(&r)?),
            Event::End(e) if e.local_name().as_ref() == b"c" => {
                let text = match cell_type.as_deref() {
                    Some("s") => value
                        .trim()
                        .parse::<usize>()
                        .ok()
                        .and_then(|idx| shared.get(idx))
                        .cloned()
                        .unwrap_or_default(),
                    _ => std::mem::take(&mut value),
                };
                cells.push(text);
            }
            Event::End(e) if e.local_name().as_ref() == b"row" => {
                let row = cells.join("\t");
                cells.clear();
                if !row.trim().is_empty() {
                    rows.push(row);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(rows.join("\n"))
}

fn unescape(raw: &[u8]) -> Result<String, String> {
    let text = std::str::from_utf8(raw).map_err(|e| format!("invalid UTF-8 in XML text: {e}"))?;
    quick_xml::escape::unescape(text)
        .map(std::borrow::Cow::into_owned)
        .map_err(|e| format!("bad XML escape: {e}"))
}

fn resolve_ref(name: &[u8]) -> Result<String, String> {
    let name = std::str::from_utf8(name).map_err(|e| format!("invalid UTF-8 in XML reference: {e}"))?;
    unescape(format!("&{name};").as_bytes())
}

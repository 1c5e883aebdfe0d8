//! Archive reading and slide text extraction.
//!
//! A PPTX file is a ZIP container. Each slide lives in its own XML part,
//! `ppt/slides/slideN.xml`, with an optional companion relationship part
//! `ppt/slides/_rels/slideN.xml.rels`. The ZIP directory lists entries in
//! whatever order the authoring tool wrote them, so slides are ordered by
//! the numeric suffix `N`, never by listing position.
//!
//! Text lives in `<a:t>` runs. Each run becomes one display line; lines are
//! trimmed, blank ones dropped, and the rest joined with `\n`.

use crate::error::PptxError;
use crate::output::SlideText;
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::borrow::Cow;
use std::io::{Cursor, Read};
use tracing::{debug, warn};
use zip::result::ZipError;
use zip::ZipArchive;

static RE_SLIDE_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ppt/slides/slide(\d+)\.xml$").unwrap());

static RE_TEXT_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<a:t(?:\s[^>]*)?>(.*?)</a:t>").unwrap());

static RE_ENTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"&(lt|gt|amp|quot|apos);").unwrap());

/// One slide part discovered in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlidePart {
    /// 1-based position after sorting by `part_index`.
    pub slide_number: u32,
    /// The `N` in `slideN.xml`.
    pub part_index: u32,
    /// Full entry name inside the archive.
    pub part_name: String,
}

impl SlidePart {
    /// Entry name of this slide's relationship part.
    pub fn rels_name(&self) -> String {
        format!("ppt/slides/_rels/slide{}.xml.rels", self.part_index)
    }
}

/// An opened presentation archive with its slide parts indexed.
pub struct PptxArchive {
    zip: ZipArchive<Cursor<Vec<u8>>>,
    parts: Vec<SlidePart>,
}

impl std::fmt::Debug for PptxArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PptxArchive")
            .field("entries", &self.zip.len())
            .field("parts", &self.parts)
            .finish()
    }
}

impl PptxArchive {
    /// Open a PPTX from raw bytes and index its slide parts.
    ///
    /// # Errors
    /// * [`PptxError::InvalidArchive`] if the bytes are not a ZIP container.
    /// * [`PptxError::NoSlides`] if no `ppt/slides/slideN.xml` part exists.
    pub fn open(bytes: Vec<u8>) -> Result<Self, PptxError> {
        let zip = ZipArchive::new(Cursor::new(bytes))?;

        let mut indexed: Vec<(u32, String)> = zip
            .file_names()
            .filter_map(|name| {
                let caps = RE_SLIDE_PART.captures(name)?;
                let idx = caps[1].parse::<u32>().ok()?;
                Some((idx, name.to_string()))
            })
            .collect();

        if indexed.is_empty() {
            return Err(PptxError::NoSlides);
        }

        indexed.sort_by_key(|(idx, _)| *idx);
        let parts = indexed
            .into_iter()
            .enumerate()
            .map(|(pos, (part_index, part_name))| SlidePart {
                slide_number: pos as u32 + 1,
                part_index,
                part_name,
            })
            .collect::<Vec<_>>();

        debug!("Archive has {} entries, {} slide parts", zip.len(), parts.len());
        Ok(Self { zip, parts })
    }

    /// Slide parts in slide order.
    pub fn slide_parts(&self) -> &[SlidePart] {
        &self.parts
    }

    /// Extract plain text for every slide, in slide order.
    ///
    /// Always returns exactly one entry per slide part; a slide without
    /// text runs yields an empty string.
    pub fn slide_texts(&mut self) -> Result<Vec<SlideText>, PptxError> {
        let parts = self.parts.clone();
        let mut out = Vec::with_capacity(parts.len());
        for part in &parts {
            let bytes = self
                .read_entry(&part.part_name)?
                .ok_or_else(|| PptxError::InvalidArchive {
                    detail: format!("slide part '{}' vanished", part.part_name),
                })?;
            let xml = String::from_utf8_lossy(&bytes);
            let text = extract_slide_text(&xml);
            debug!(
                "Slide {} ({}): {} chars",
                part.slide_number,
                part.part_name,
                text.len()
            );
            out.push(SlideText {
                slide_number: part.slide_number,
                text,
            });
        }
        Ok(out)
    }

    /// Read a whole entry. `Ok(None)` when the archive has no such entry.
    pub fn read_entry(&mut self, name: &str) -> Result<Option<Vec<u8>>, PptxError> {
        let mut file = match self.zip.by_name(name) {
            Ok(f) => f,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut buf = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut buf)
            .map_err(|e| PptxError::InvalidArchive {
                detail: format!("failed to read '{name}': {e}"),
            })?;
        Ok(Some(buf))
    }
}

/// Extract display lines from one slide's XML.
///
/// Malformed XML falls back to a lenient scan of `<a:t>` runs so a single
/// broken part still yields whatever text it holds.
pub fn extract_slide_text(xml: &str) -> String {
    match extract_lines_strict(xml) {
        Ok(lines) => join_lines(lines),
        Err(e) => {
            warn!("Slide XML did not parse ({e}); falling back to lenient scan");
            join_lines(
                RE_TEXT_RUN
                    .captures_iter(xml)
                    .map(|c| decode_entities(&c[1]).into_owned()),
            )
        }
    }
}

fn extract_lines_strict(xml: &str) -> Result<Vec<String>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut inside = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"a:t" => {
                inside = true;
                current.clear();
            }
            Event::End(e) if e.name().as_ref() == b"a:t" => {
                inside = false;
                lines.push(std::mem::take(&mut current));
            }
            Event::Text(t) if inside => current.push_str(&t.unescape()?),
            Event::CData(c) if inside => current.push_str(&String::from_utf8_lossy(&c)),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(lines)
}

fn join_lines(lines: impl IntoIterator<Item = String>) -> String {
    lines
        .into_iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Decode the five predefined XML entities in a single pass.
///
/// `&amp;lt;` decodes to `&lt;`, not `<`.
pub fn decode_entities(s: &str) -> Cow<'_, str> {
    RE_ENTITY.replace_all(s, |caps: &regex::Captures<'_>| match &caps[1] {
        "lt" => "<",
        "gt" => ">",
        "amp" => "&",
        "quot" => "\"",
        _ => "'",
    })
}

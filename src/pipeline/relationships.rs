//! Slide-image resolution via relationship parts.
//!
//! A slide references its pictures indirectly: `<a:blip r:embed="rId2"/>` in
//! the slide XML, and `rId2 → ../media/image5.png` in
//! `ppt/slides/_rels/slideN.xml.rels`. Only the relationship part is needed
//! to pair a slide with its photo: the first relationship (in document order)
//! whose target lies in the media directory and carries a `jpg`, `jpeg` or
//! `png` extension wins. Later image relationships on the same slide are
//! ignored.

use crate::error::PptxError;
use crate::output::SlideImageRef;
use crate::pipeline::archive::PptxArchive;
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use tracing::{debug, warn};

static RE_MEDIA_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|/)media/([^/]+\.(?:jpe?g|png))$").unwrap());

static RE_RELATIONSHIP_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<Relationship\b[^>]*>").unwrap());

static RE_TARGET_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bTarget\s*=\s*"([^"]*)""#).unwrap());

static RE_EXTERNAL_MODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\bTargetMode\s*=\s*"External""#).unwrap());

/// Pair each slide with the media filename of its first image.
///
/// Slides without a relationship part, or whose relationships name no
/// suitable image, are simply absent from the result.
pub fn resolve_slide_images(archive: &mut PptxArchive) -> Result<Vec<SlideImageRef>, PptxError> {
    let parts = archive.slide_parts().to_vec();
    let mut refs = Vec::new();

    for part in &parts {
        let rels_name = part.rels_name();
        let Some(bytes) = archive.read_entry(&rels_name)? else {
            debug!("Slide {}: no relationship part", part.slide_number);
            continue;
        };
        let xml = String::from_utf8_lossy(&bytes);
        match first_image_target(&xml) {
            Some(media_filename) => {
                debug!("Slide {} → {}", part.slide_number, media_filename);
                refs.push(SlideImageRef {
                    slide_number: part.slide_number,
                    media_filename,
                });
            }
            None => debug!("Slide {}: no image relationship", part.slide_number),
        }
    }

    Ok(refs)
}

/// Return the media filename of the first image relationship, if any.
pub fn first_image_target(rels_xml: &str) -> Option<String> {
    match relationship_targets(rels_xml) {
        Ok(targets) => targets.iter().find_map(|t| media_filename(t)),
        Err(e) => {
            warn!("Relationship XML did not parse ({e}); falling back to lenient scan");
            lenient_targets(rels_xml).find_map(media_filename)
        }
    }
}

/// Regex scan over `<Relationship .../>` tags for XML quick-xml rejects.
/// External targets are skipped here too.
fn lenient_targets(xml: &str) -> impl Iterator<Item = &str> {
    RE_RELATIONSHIP_TAG
        .find_iter(xml)
        .map(|m| m.as_str())
        .filter(|tag| !RE_EXTERNAL_MODE.is_match(tag))
        .filter_map(|tag| RE_TARGET_ATTR.captures(tag))
        .filter_map(|c| c.get(1).map(|t| t.as_str()))
}

/// Internal (non-external) relationship targets in document order.
fn relationship_targets(xml: &str) -> Result<Vec<String>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut targets = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Empty(e) | Event::Start(e) if e.local_name().as_ref() == b"Relationship" => {
                let mut target = None;
                let mut external = false;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"Target" => target = Some(attr.unescape_value()?.into_owned()),
                        b"TargetMode" => {
                            external = attr.unescape_value()?.eq_ignore_ascii_case("External")
                        }
                        _ => {}
                    }
                }
                if let (Some(t), false) = (target, external) {
                    targets.push(t);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(targets)
}

fn media_filename(target: &str) -> Option<String> {
    RE_MEDIA_IMAGE
        .captures(target)
        .map(|c| c[1].to_string())
}

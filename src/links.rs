use std::collections::HashSet;

use lopdf::{Document, Object, ObjectId, dictionary};
use regex::Regex;

use crate::config::{LinkStyle, TocConfig};
use crate::error::Error;
use crate::model::{LineRect, RenderedLineBox, TocBridge, TocRecord, normalize};
use crate::scan::{page_id_at, scan_page};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkReport {
    pub attached: usize,
    /// Entries without a resolved target page.
    pub skipped_unresolved: usize,
    /// Entries whose rendered lines could not be found.
    pub missed: usize,
}

/// A scanned TOC page with the lines entries may be matched against.
struct ScannedPage {
    lines: Vec<RenderedLineBox>,
    excluded: Vec<bool>,
    cursor: usize,
}

struct LineClassifier {
    title: String,
    headers: HashSet<String>,
    header_pattern: Regex,
    entry_font_size: f32,
}

impl LineClassifier {
    fn new(bridge: &TocBridge) -> Result<Self, Error> {
        Ok(Self {
            title: normalize(&bridge.title),
            headers: bridge.headers().map(|r| normalize(&r.text)).collect(),
            header_pattern: Regex::new(bridge.scheme.header_pattern())?,
            entry_font_size: bridge.font_size,
        })
    }

    /// Recorded header texts always match. The numbering pattern only applies
    /// to lines set larger than entries, so an entry title that starts with
    /// a section number stays an entry.
    fn is_header(&self, text: &str, font_size: f32) -> bool {
        if self.headers.contains(text) {
            return true;
        }
        let ends_in_number = text
            .split_whitespace()
            .last()
            .is_some_and(|t| t.chars().all(|c| c.is_ascii_digit()));
        font_size > self.entry_font_size + 0.1
            && self.header_pattern.is_match(text)
            && !ends_in_number
    }

    fn classify(&self, lines: Vec<RenderedLineBox>, first_page: bool) -> ScannedPage {
        let mut excluded = vec![false; lines.len()];
        let mut in_title = first_page && !self.title.is_empty();
        for (i, line) in lines.iter().enumerate() {
            let text = normalize(&line.text);
            if in_title && self.title.contains(text.as_str()) {
                excluded[i] = true;
                continue;
            }
            in_title = false;
            excluded[i] = self.is_header(&text, line.font_size);
        }
        ScannedPage {
            lines,
            excluded,
            cursor: 0,
        }
    }
}

fn last_token(text: &str) -> Option<&str> {
    text.split_whitespace().last()
}

/// True when `text` begins with `lead` and the match ends on a word boundary
/// (the dot leader counts as one).
fn starts_with_words(text: &str, lead: &str) -> bool {
    if lead.is_empty() {
        return false;
    }
    let text = normalize(text);
    match text.strip_prefix(lead) {
        Some(rest) => rest.is_empty() || rest.starts_with(' ') || rest.starts_with('.'),
        None => false,
    }
}

impl ScannedPage {
    fn candidates(&self) -> impl Iterator<Item = usize> + '_ {
        (self.cursor..self.lines.len()).filter(|&i| !self.excluded[i])
    }

    /// Finds the first and terminal line of `record` after the cursor and consumes them.
    fn take_entry(&mut self, record: &TocRecord) -> Option<(usize, usize)> {
        let lead = normalize(&record.lead_words);
        let number = record.page_num_str.as_str();
        let is_terminal = |i: &usize| last_token(&self.lines[*i].text) == Some(number);

        // The number sits on the entry's last line; an earlier wrapped line
        // may end in the same digits, so the window is searched from its end.
        let by_lead = self
            .candidates()
            .find(|&i| starts_with_words(&self.lines[i].text, &lead))
            .and_then(|first| {
                let window: Vec<usize> = self
                    .candidates()
                    .skip_while(|&i| i < first)
                    .take(record.line_count.max(1))
                    .collect();
                window.into_iter().rev().find(is_terminal).map(|last| (first, last))
            });

        let found = by_lead.or_else(|| self.candidates().find(is_terminal).map(|last| (last, last)))?;
        self.cursor = found.1 + 1;
        Some(found)
    }

    /// Opening part of an entry that continues on the next page: from the
    /// lead line to the last candidate on this page.
    fn take_head(&mut self, record: &TocRecord) -> Option<(usize, usize)> {
        let lead = normalize(&record.lead_words);
        let first = self
            .candidates()
            .find(|&i| starts_with_words(&self.lines[i].text, &lead))?;
        let last = self.candidates().last()?;
        self.cursor = self.lines.len();
        Some((first, last))
    }

    /// A page filled by the middle of an entry.
    fn take_rest(&mut self) -> Option<(usize, usize)> {
        let first = self.candidates().next()?;
        let last = self.candidates().last()?;
        self.cursor = self.lines.len();
        Some((first, last))
    }

    /// Closing part of a continued entry, up to the line carrying its number.
    fn take_tail(&mut self, record: &TocRecord) -> Option<(usize, usize)> {
        let number = record.page_num_str.as_str();
        let first = self.candidates().next()?;
        let last = self
            .candidates()
            .find(|&i| last_token(&self.lines[i].text) == Some(number))?;
        self.cursor = last + 1;
        Some((first, last))
    }

    fn union(&self, first: usize, last: usize) -> LineRect {
        self.lines[first..=last]
            .iter()
            .map(|l| l.rect)
            .reduce(|a, b| a.union(&b))
            .unwrap_or(self.lines[first].rect)
    }
}

/// Line rects covering `record` on each TOC page it occupies, consuming
/// the matched lines.
fn locate(pages: &mut [ScannedPage], record: &TocRecord) -> Option<Vec<(usize, LineRect)>> {
    let first = record.toc_page.checked_sub(1)? as usize;
    if !record.is_split() {
        let page = pages.get_mut(first)?;
        let (f, l) = page.take_entry(record)?;
        return Some(vec![(first, page.union(f, l))]);
    }

    let last = record.end_page.checked_sub(1)? as usize;
    let mut rects = Vec::with_capacity(last - first + 1);
    for index in first..=last {
        let page = pages.get_mut(index)?;
        let (f, l) = if index == first {
            page.take_head(record)?
        } else if index == last {
            page.take_tail(record)?
        } else {
            page.take_rest()?
        };
        rects.push((index, page.union(f, l)));
    }
    Some(rects)
}

/// Re-scans the TOC pages at the front of `doc` and attaches a GoTo link to
/// every entry with a resolved target. Headers and the title never get one.
/// Link geometry follows the page width and margin recorded in `bridge`.
pub fn attach_links(
    doc: &mut Document,
    bridge: &TocBridge,
    config: &TocConfig,
) -> Result<LinkReport, Error> {
    let geom = TocConfig {
        page_width_mm: bridge.page_width_mm,
        margin_mm: bridge.margin_mm,
        ..config.clone()
    }
    .geometry();
    let classifier = LineClassifier::new(bridge)?;
    let page_count = bridge.toc_page_count as usize;
    let mut pages = Vec::with_capacity(page_count);
    for p in 0..page_count {
        pages.push(classifier.classify(scan_page(doc, p)?, p == 0));
    }

    let mut report = LinkReport::default();
    for record in bridge.entries() {
        let Some(target) = record.target_page else {
            log::debug!("No link for unresolved entry {:?}", record.text);
            report.skipped_unresolved += 1;
            continue;
        };

        let Some(rects) = locate(&mut pages, record) else {
            log::warn!(
                "Could not locate TOC line for {:?} on TOC page {}",
                record.text,
                record.toc_page
            );
            report.missed += 1;
            continue;
        };

        let target_id = page_id_at(doc, (target as usize).saturating_sub(1))?;
        for (page_index, rect) in rects {
            let rect = LineRect {
                x0: geom.margin,
                x1: geom.right_edge(),
                ..rect
            };
            let page_id = page_id_at(doc, page_index)?;
            add_link(doc, page_id, target_id, rect, config.link_style)?;
        }
        report.attached += 1;
    }

    log::info!(
        "Links: {} attached, {} unresolved, {} missed",
        report.attached,
        report.skipped_unresolved,
        report.missed,
    );
    Ok(report)
}

fn add_link(
    doc: &mut Document,
    page_id: ObjectId,
    target_id: ObjectId,
    rect: LineRect,
    style: LinkStyle,
) -> Result<(), Error> {
    let mut annot = dictionary! {
        "Type" => "Annot",
        "Subtype" => "Link",
        "Rect" => vec![rect.x0.into(), rect.y0.into(), rect.x1.into(), rect.y1.into()],
        "Dest" => vec![Object::Reference(target_id), "Fit".into()],
    };
    match style {
        LinkStyle::Invisible => {
            annot.set("Border", vec![0.into(), 0.into(), 0.into()]);
        }
        LinkStyle::Underline => {
            annot.set("C", vec![0.into(), 0.into(), 1.into()]);
            annot.set("BS", dictionary! { "W" => 0.5f32, "S" => "U" });
        }
    }
    let annot_id = doc.add_object(annot);

    let existing = doc.get_object(page_id)?.as_dict()?.get(b"Annots").ok().cloned();
    match existing {
        Some(Object::Reference(array_id)) => {
            doc.get_object_mut(array_id)?
                .as_array_mut()?
                .push(Object::Reference(annot_id));
        }
        Some(Object::Array(mut annots)) => {
            annots.push(Object::Reference(annot_id));
            doc.get_object_mut(page_id)?
                .as_dict_mut()?
                .set("Annots", annots);
        }
        _ => {
            doc.get_object_mut(page_id)?
                .as_dict_mut()?
                .set("Annots", vec![Object::Reference(annot_id)]);
        }
    }
    Ok(())
}

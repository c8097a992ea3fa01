use crate::config::{PageGeometry, PassMode, TocConfig, mm_to_pt};
use crate::error::Error;
use crate::fonts::{FontEntry, FontRole, FontSet};
use crate::model::{ContentPageMap, RecordKind, TocNode, TocRecord, UNRESOLVED_MARKER, clean_text};

const TITLE_LINE_MM: f32 = 10.0;
const TITLE_GAP_MM: f32 = 5.0;
const LEADER_SLACK_MM: f32 = 1.0;
const MAX_PASSES: usize = 8;
const LEAD_WORDS: usize = 3;

/// One run of text drawn at an absolute x on its line.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Segment {
    pub(crate) x: f32,
    pub(crate) width: f32,
    pub(crate) text: String,
    pub(crate) role: FontRole,
    pub(crate) font_size: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PlacedLine {
    pub(crate) baseline: f32,
    pub(crate) segments: Vec<Segment>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct PageLayout {
    pub(crate) lines: Vec<PlacedLine>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct TocLayout {
    pub(crate) pages: Vec<PageLayout>,
    pub(crate) records: Vec<TocRecord>,
}

pub(crate) struct Pagination {
    pub(crate) layout: TocLayout,
    pub(crate) toc_page_count: u32,
    pub(crate) passes: usize,
}

/// Wraps `text` at `max_width`; a word wider than a line is broken by characters.
/// Returns each line with its measured width. Never empty.
pub(crate) fn wrap_text(
    text: &str,
    font: &FontEntry,
    font_size: f32,
    max_width: f32,
) -> Vec<(String, f32)> {
    let space_w = font.space_width(font_size);
    let mut lines: Vec<(String, f32)> = Vec::new();
    let mut current = String::new();
    let mut current_w = 0.0f32;

    for word in text.split_whitespace() {
        let ww = font.text_width(word, font_size);

        if ww > max_width {
            if !current.is_empty() {
                lines.push((std::mem::take(&mut current), current_w));
                current_w = 0.0;
            }
            for ch in word.chars() {
                let cw = font.char_width(ch, font_size);
                if !current.is_empty() && current_w + cw > max_width {
                    lines.push((std::mem::take(&mut current), current_w));
                    current_w = 0.0;
                }
                current.push(ch);
                current_w += cw;
            }
            continue;
        }

        if current.is_empty() {
            current.push_str(word);
            current_w = ww;
            continue;
        }

        let proposed = current_w + space_w + ww;
        if proposed > max_width {
            lines.push((std::mem::take(&mut current), current_w));
            current.push_str(word);
            current_w = ww;
        } else {
            current.push(' ');
            current.push_str(word);
            current_w = proposed;
        }
    }

    if !current.is_empty() || lines.is_empty() {
        lines.push((current, current_w));
    }
    lines
}

/// `'9'` repeated for the widest page number the document can reach, at least three digits.
pub(crate) fn placeholder_number(total_content_pages: u32, node_count: usize) -> String {
    let upper = total_content_pages as usize + node_count;
    "9".repeat(upper.to_string().len().max(3))
}

struct Block {
    pitch: f32,
    gap_before: f32,
    gap_after: f32,
    font_size: f32,
    lines: Vec<Vec<Segment>>,
    /// Keep on the same page as the following block.
    keep_with_next: bool,
    record: Option<TocRecord>,
}

struct PassContext<'a> {
    config: &'a TocConfig,
    geom: PageGeometry,
    fonts: &'a FontSet,
    reserved_w: f32,
}

impl PassContext<'_> {
    /// Lays out every node once; `number_for` supplies the page-number string
    /// and absolute target for an entry's file.
    fn run(&self, nodes: &[TocNode], number_for: impl Fn(&str) -> (String, Option<u32>)) -> TocLayout {
        let mut blocks = Vec::with_capacity(nodes.len() + 1);
        if let Some(title) = self.title_block() {
            blocks.push(title);
        }

        let mut section = String::new();
        for node in nodes {
            match node {
                TocNode::Header {
                    section: id, text, ..
                } => {
                    section = id.clone();
                    blocks.push(self.header_block(text, &section));
                }
                TocNode::Entry { text, file, .. } => {
                    let (number, target) = number_for(file);
                    blocks.push(self.entry_block(text, file, &section, number, target));
                }
            }
        }
        self.paginate(blocks)
    }

    fn title_block(&self) -> Option<Block> {
        let title = clean_text(&self.config.title);
        if title.is_empty() {
            return None;
        }
        let size = self.config.title_font_size;
        let font = self.fonts.get(FontRole::Bold);
        let lines = wrap_text(&title, font, size, self.geom.content_width())
            .into_iter()
            .map(|(text, width)| {
                vec![Segment {
                    x: self.geom.margin,
                    width,
                    text,
                    role: FontRole::Bold,
                    font_size: size,
                }]
            })
            .collect();
        Some(Block {
            pitch: mm_to_pt(TITLE_LINE_MM),
            gap_before: 0.0,
            gap_after: mm_to_pt(TITLE_GAP_MM),
            font_size: size,
            lines,
            keep_with_next: false,
            record: None,
        })
    }

    fn header_block(&self, text: &str, section: &str) -> Block {
        let size = self.config.header_font_size;
        let font = self.fonts.get(FontRole::Bold);
        let wrapped = wrap_text(text, font, size, self.geom.content_width());
        let record = TocRecord {
            kind: RecordKind::Header,
            toc_page: 0,
            end_page: 0,
            text: text.to_string(),
            lead_words: lead_words(&wrapped[0].0),
            page_num_str: String::new(),
            target_page: None,
            line_count: wrapped.len(),
            section: section.to_string(),
            file: None,
        };
        let quarter = self.geom.line_height * 0.25;
        Block {
            pitch: self.geom.line_height,
            gap_before: quarter,
            gap_after: quarter,
            font_size: size,
            lines: wrapped
                .into_iter()
                .map(|(text, width)| {
                    vec![Segment {
                        x: self.geom.margin,
                        width,
                        text,
                        role: FontRole::Bold,
                        font_size: size,
                    }]
                })
                .collect(),
            keep_with_next: true,
            record: Some(record),
        }
    }

    fn entry_block(
        &self,
        text: &str,
        file: &str,
        section: &str,
        number: String,
        target: Option<u32>,
    ) -> Block {
        let size = self.config.font_size;
        let font = self.fonts.get(FontRole::Regular);
        let indent = font.space_width(size) * 2.0;
        let text_x = self.geom.margin + indent;
        let wrap_at =
            self.geom.content_width() - self.reserved_w - self.geom.margin - indent;
        let wrapped = wrap_text(text, font, size, wrap_at);
        let line_count = wrapped.len();
        let last_w = wrapped.last().map_or(0.0, |(_, w)| *w);
        let lead = lead_words(&wrapped[0].0);

        let mut lines: Vec<Vec<Segment>> = wrapped
            .into_iter()
            .map(|(text, width)| {
                vec![Segment {
                    x: text_x,
                    width,
                    text,
                    role: FontRole::Regular,
                    font_size: size,
                }]
            })
            .collect();

        let number_w = font.text_width(&number, size);
        let available = self.geom.content_width() - indent - last_w - number_w - mm_to_pt(LEADER_SLACK_MM);
        let dot_w = font.char_width('.', size);
        if let Some(last) = lines.last_mut() {
            if available > 0.0 && dot_w > 0.0 {
                let count = (available / dot_w).floor() as usize;
                if count > 0 {
                    last.push(Segment {
                        x: text_x + last_w,
                        width: count as f32 * dot_w,
                        text: std::iter::repeat_n('.', count).collect(),
                        role: FontRole::Regular,
                        font_size: size,
                    });
                }
            }
            last.push(Segment {
                x: self.geom.right_edge() - number_w,
                width: number_w,
                text: number.clone(),
                role: FontRole::Regular,
                font_size: size,
            });
        }

        Block {
            pitch: self.geom.line_height,
            gap_before: 0.0,
            gap_after: self.geom.line_height / 4.0,
            font_size: size,
            lines,
            keep_with_next: false,
            record: Some(TocRecord {
                kind: RecordKind::Entry,
                toc_page: 0,
                end_page: 0,
                text: text.to_string(),
                lead_words: lead,
                page_num_str: number,
                target_page: target,
                line_count,
                section: section.to_string(),
                file: Some(file.to_string()),
            }),
        }
    }

    fn paginate(&self, blocks: Vec<Block>) -> TocLayout {
        let top = self.geom.height - self.geom.margin;
        let bottom = self.geom.margin - 0.01;
        let usable = top - bottom;
        let mut pages = vec![PageLayout::default()];
        let mut records = Vec::with_capacity(blocks.len());
        let mut y = top;

        // A block taller than a page cannot stay together; only its first
        // line has to fit before it starts.
        let height = |block: &Block| {
            let full = block.gap_before + block.lines.len() as f32 * block.pitch;
            if full > usable {
                block.gap_before + block.pitch
            } else {
                full
            }
        };

        for (i, block) in blocks.iter().enumerate() {
            let mut needed = height(block);
            if block.keep_with_next
                && let Some(next) = blocks.get(i + 1)
            {
                needed += height(next);
            }
            let page_has_lines = pages.last().is_some_and(|p| !p.lines.is_empty());
            if page_has_lines && y - needed < bottom {
                pages.push(PageLayout::default());
                y = top;
            }

            y -= block.gap_before;
            let mut start_page = None;
            for segments in &block.lines {
                if y - block.pitch < bottom && pages.last().is_some_and(|p| !p.lines.is_empty()) {
                    pages.push(PageLayout::default());
                    y = top;
                }
                let baseline = y - block.pitch / 2.0 - block.font_size * 0.3;
                if let Some(current) = pages.last_mut() {
                    current.lines.push(PlacedLine {
                        baseline,
                        segments: segments.clone(),
                    });
                }
                start_page.get_or_insert(pages.len());
                y -= block.pitch;
            }
            y -= block.gap_after;

            if let Some(record) = &block.record {
                records.push(TocRecord {
                    toc_page: start_page.unwrap_or(pages.len()) as u32,
                    end_page: pages.len() as u32,
                    ..record.clone()
                });
            }
        }

        TocLayout { pages, records }
    }
}

fn lead_words(line: &str) -> String {
    line.split_whitespace()
        .take(LEAD_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs the measurement pass with placeholder numbers, then the final pass
/// with real numbers, repeating it under `PassMode::FixedPoint` until the
/// TOC page count it was numbered against matches what it produced.
pub(crate) fn paginate(
    nodes: &[TocNode],
    map: &ContentPageMap,
    config: &TocConfig,
    fonts: &FontSet,
) -> Result<Pagination, Error> {
    if nodes.is_empty() {
        return Err(Error::EmptyToc);
    }

    let placeholder = placeholder_number(map.total_pages(), nodes.len());
    let ctx = PassContext {
        config,
        geom: config.geometry(),
        fonts,
        reserved_w: fonts.regular.text_width(&placeholder, config.font_size),
    };

    let measured = ctx.run(nodes, |_| (placeholder.clone(), None));
    let mut estimate = measured.pages.len() as u32;
    log::debug!("Measurement pass: {estimate} TOC page(s), placeholder {placeholder:?}");

    let mut passes = 1;
    loop {
        let layout = ctx.run(nodes, |file| match map.start_of(file) {
            Some(start) => {
                let target = start + estimate;
                (target.to_string(), Some(target))
            }
            None => (UNRESOLVED_MARKER.to_string(), None),
        });
        passes += 1;
        let actual = layout.pages.len() as u32;

        if actual == estimate {
            return Ok(Pagination {
                layout,
                toc_page_count: actual,
                passes,
            });
        }

        match config.pass_mode {
            PassMode::DryRun => {
                log::warn!(
                    "TOC estimated at {estimate} page(s) but rendered {actual}; page numbers may be off"
                );
                return Ok(Pagination {
                    layout,
                    toc_page_count: actual,
                    passes,
                });
            }
            PassMode::FixedPoint => {
                if passes >= MAX_PASSES {
                    return Err(Error::Layout(format!(
                        "TOC page count did not settle after {passes} passes (last {estimate} → {actual})"
                    )));
                }
                log::debug!("TOC page count moved {estimate} → {actual}, re-running final pass");
                estimate = actual;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DocumentEntry, DocumentSet};
    use crate::toc::build_nodes;

    fn entry_lines(layout: &TocLayout) -> Vec<&PlacedLine> {
        layout
            .pages
            .iter()
            .flat_map(|p| p.lines.iter())
            .filter(|l| l.segments[0].role == FontRole::Regular)
            .collect()
    }

    fn sample_set(count: usize) -> DocumentSet {
        let entries = (0..count)
            .map(|i| {
                DocumentEntry::new(
                    format!("t14_{}_{i:03}.rtf", i % 4 + 1),
                    Some(format!("Summary of Adverse Events, Listing {i}")),
                    format!("14.{}", i % 4 + 1),
                    "Safety Data",
                )
            })
            .collect();
        DocumentSet::new(entries).unwrap()
    }

    fn content_map(set: &DocumentSet, pages_each: u32) -> ContentPageMap {
        let mut map = ContentPageMap::new();
        for e in set.iter() {
            map.push(&e.file, pages_each);
        }
        map
    }

    #[test]
    fn placeholder_has_at_least_three_digits() {
        assert_eq!(placeholder_number(6, 5), "999");
        assert_eq!(placeholder_number(950, 60), "9999");
    }

    #[test]
    fn wrap_breaks_between_words() {
        let font = FontEntry::standard(FontRole::Regular);
        let lines = wrap_text("alpha beta gamma delta", &font, 10.0, 60.0);
        assert!(lines.len() >= 2);
        assert!(lines.iter().all(|(_, w)| *w <= 60.0));
        let rejoined: Vec<&str> = lines.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(rejoined.join(" "), "alpha beta gamma delta");
    }

    #[test]
    fn wrap_breaks_overlong_word_by_characters() {
        let font = FontEntry::standard(FontRole::Regular);
        let word = "x".repeat(80);
        let lines = wrap_text(&word, &font, 10.0, 50.0);
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|(_, w)| *w <= 50.0));
        assert_eq!(lines.iter().map(|(t, _)| t.len()).sum::<usize>(), 80);
    }

    #[test]
    fn wrap_of_empty_text_yields_one_empty_line() {
        let font = FontEntry::standard(FontRole::Regular);
        assert_eq!(wrap_text("", &font, 10.0, 50.0), vec![(String::new(), 0.0)]);
    }

    #[test]
    fn long_title_gets_one_leader_on_its_last_line() {
        let long = "Summary of Treatment Emergent Adverse Events by System Organ Class, \
                    Preferred Term and Maximum Severity for Subjects in the Safety Population";
        let set = DocumentSet::new(vec![DocumentEntry::new(
            "t14_3_01.rtf",
            Some(long.to_string()),
            "14.3",
            "Safety",
        )])
        .unwrap();
        let map = content_map(&set, 3);
        let config = TocConfig::default();
        let fonts = FontSet::standard();
        let result = paginate(&build_nodes(&set), &map, &config, &fonts).unwrap();

        let lines = entry_lines(&result.layout);
        assert!(lines.len() >= 2);
        let (last, rest) = lines.split_last().unwrap();
        assert!(rest.iter().all(|l| l.segments.len() == 1));
        assert_eq!(last.segments.len(), 3);
        assert!(last.segments[1].text.chars().all(|c| c == '.'));
        assert_eq!(last.segments[2].text, "2");
        assert_eq!(result.layout.records[1].line_count, lines.len());
    }

    #[test]
    fn number_is_flush_with_right_margin() {
        let set = sample_set(3);
        let map = content_map(&set, 2);
        let config = TocConfig::default();
        let geom = config.geometry();
        let result = paginate(&build_nodes(&set), &map, &config, &FontSet::standard()).unwrap();

        for line in entry_lines(&result.layout) {
            let number = line.segments.last().unwrap();
            assert!((number.x + number.width - geom.right_edge()).abs() < 1e-3);
        }
    }

    #[test]
    fn leader_is_omitted_when_no_room_is_left() {
        let config = TocConfig {
            page_width_mm: 60.0,
            margin_mm: 5.0,
            ..TocConfig::default()
        };
        let fonts = FontSet::standard();
        let ctx = PassContext {
            config: &config,
            geom: config.geometry(),
            fonts: &fonts,
            reserved_w: 0.0,
        };
        // With no reserved width the text may run up to the number column.
        let block = ctx.entry_block("WWWWWWWWWWWWWWWW", "a.rtf", "1", "1234".into(), Some(1234));
        assert_eq!(block.lines.len(), 1);
        let last = block.lines.last().unwrap();
        assert!(last.iter().all(|s| !s.text.starts_with('.')));
        assert_eq!(last.last().unwrap().text, "1234");
    }

    #[test]
    fn missing_document_renders_unresolved_marker() {
        let set = sample_set(2);
        let mut map = ContentPageMap::new();
        map.push(&set.entries()[0].file, 4);
        let result =
            paginate(&build_nodes(&set), &map, &TocConfig::default(), &FontSet::standard()).unwrap();

        let missing = result
            .layout
            .records
            .iter()
            .find(|r| r.file.as_deref() == Some(set.entries()[1].file.as_str()))
            .unwrap();
        assert_eq!(missing.page_num_str, UNRESOLVED_MARKER);
        assert_eq!(missing.target_page, None);
    }

    #[test]
    fn many_entries_spill_onto_more_pages_and_targets_follow() {
        let set = sample_set(120);
        let map = content_map(&set, 2);
        let result =
            paginate(&build_nodes(&set), &map, &TocConfig::default(), &FontSet::standard()).unwrap();

        assert!(result.toc_page_count > 1);
        assert_eq!(result.layout.pages.len() as u32, result.toc_page_count);
        for record in result.layout.records.iter().filter(|r| !r.is_header()) {
            let file = record.file.as_deref().unwrap();
            let expected = map.start_of(file).unwrap() + result.toc_page_count;
            assert_eq!(record.target_page, Some(expected));
            assert_eq!(record.page_num_str, expected.to_string());
        }
    }

    #[test]
    fn header_never_ends_a_page() {
        let set = sample_set(120);
        let map = content_map(&set, 2);
        let result =
            paginate(&build_nodes(&set), &map, &TocConfig::default(), &FontSet::standard()).unwrap();

        for page in &result.layout.pages {
            let last = page.lines.last().unwrap();
            assert_eq!(last.segments[0].role, FontRole::Regular);
        }
    }

    #[test]
    fn records_mirror_node_order() {
        let set = sample_set(10);
        let nodes = build_nodes(&set);
        let map = content_map(&set, 1);
        let result = paginate(&nodes, &map, &TocConfig::default(), &FontSet::standard()).unwrap();

        let texts: Vec<&str> = result.layout.records.iter().map(|r| r.text.as_str()).collect();
        let expected: Vec<&str> = nodes.iter().map(|n| n.text()).collect();
        assert_eq!(texts, expected);
    }

    #[test]
    fn empty_nodes_are_rejected() {
        let err = paginate(&[], &ContentPageMap::new(), &TocConfig::default(), &FontSet::standard());
        assert!(matches!(err, Err(Error::EmptyToc)));
    }

    #[test]
    fn entry_taller_than_a_page_continues_on_the_next() {
        let title = vec!["Listing of Laboratory Values"; 400].join(" ");
        let set = DocumentSet::new(vec![
            DocumentEntry::new("t14_1_01.rtf", Some(title), "14.1", "Alpha"),
            DocumentEntry::new("t14_1_02.rtf", Some("Vital Signs".into()), "14.1", "Alpha"),
        ])
        .unwrap();
        let map = content_map(&set, 2);
        let config = TocConfig::default();
        let geom = config.geometry();
        let result = paginate(&build_nodes(&set), &map, &config, &FontSet::standard()).unwrap();

        for page in &result.layout.pages {
            for line in &page.lines {
                assert!(line.baseline - config.font_size * 0.2 >= geom.margin - 0.01);
            }
        }

        let records = &result.layout.records;
        let (header, long) = (&records[0], &records[1]);
        assert_eq!(header.toc_page, 1);
        assert_eq!(long.toc_page, 1);
        assert!(long.is_split());
        assert!(long.end_page >= 2);
        assert!(records[2].toc_page >= long.end_page);
        assert!(!records[2].is_split());

        let numbers = entry_lines(&result.layout)
            .iter()
            .filter(|l| l.segments.len() > 1)
            .count();
        assert_eq!(numbers, 2);
    }
}

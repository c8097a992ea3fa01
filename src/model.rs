use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// One source document as handed over by the upstream title/section stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub file: String,
    #[serde(default)]
    pub title: Option<String>,
    pub section: String,
    #[serde(default)]
    pub section_name: String,
    #[serde(skip)]
    file_stem: String,
}

impl DocumentEntry {
    pub fn new(
        file: impl Into<String>,
        title: Option<String>,
        section: impl Into<String>,
        section_name: impl Into<String>,
    ) -> Self {
        let file = file.into();
        let file_stem = stem_of(&file);
        Self {
            file,
            title,
            section: section.into(),
            section_name: section_name.into(),
            file_stem,
        }
    }

    pub fn file_stem(&self) -> &str {
        &self.file_stem
    }

    /// Title shown in the TOC: the cleaned title, or the file stem when none survives cleaning.
    pub fn display_title(&self) -> String {
        self.title
            .as_deref()
            .map(clean_text)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.file_stem.clone())
    }

    /// Bookmark title; the stem suffix keeps identical titles apart.
    pub fn bookmark_title(&self) -> String {
        format!("{} ({})", self.display_title(), self.file_stem)
    }

    /// Text of the TOC header opening this entry's section.
    pub fn section_header(&self) -> String {
        format!("{}  {}", self.section, clean_text(&self.section_name))
            .trim_end()
            .to_string()
    }

    /// Name of the converted page stream inside the PDF folder.
    pub fn pdf_file_name(&self) -> String {
        format!("{}.pdf", self.file_stem)
    }
}

fn stem_of(file: &str) -> String {
    Path::new(file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file)
        .to_string()
}

/// The canonical ordering shared by every stage: entries sorted by
/// (section identifier, file stem). Built once per run.
#[derive(Clone, Debug, Default)]
pub struct DocumentSet {
    entries: Vec<DocumentEntry>,
}

impl DocumentSet {
    pub fn new(entries: Vec<DocumentEntry>) -> Result<Self, Error> {
        let mut entries: Vec<DocumentEntry> = entries
            .into_iter()
            .map(|mut e| {
                // Deserialized entries arrive without a stem.
                e.file_stem = stem_of(&e.file);
                e
            })
            .collect();

        let mut seen = HashSet::new();
        for e in &entries {
            if !seen.insert(e.file.as_str()) {
                return Err(Error::DuplicateFile(e.file.clone()));
            }
        }

        entries.sort_by(|a, b| {
            a.section
                .cmp(&b.section)
                .then_with(|| a.file_stem.cmp(&b.file_stem))
        });
        Ok(Self { entries })
    }

    pub fn from_manifest(path: &Path) -> Result<Self, Error> {
        let data = std::fs::read(path)?;
        let entries: Vec<DocumentEntry> = serde_json::from_slice(&data)?;
        Self::new(entries)
    }

    pub fn entries(&self) -> &[DocumentEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DocumentEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consecutive runs of entries sharing a section identifier.
    pub fn sections(&self) -> impl Iterator<Item = &[DocumentEntry]> {
        self.entries
            .chunk_by(|a, b| a.section == b.section)
    }
}

/// Starting page (1-based) of every assembled document within the content
/// stream, before the TOC is prepended. Kept in canonical order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentPageMap {
    starts: Vec<(String, u32)>,
    total_pages: u32,
}

impl ContentPageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a document of `page_count` pages and returns its starting page.
    pub fn push(&mut self, file: &str, page_count: u32) -> u32 {
        let start = self.total_pages + 1;
        self.starts.push((file.to_string(), start));
        self.total_pages += page_count;
        start
    }

    pub fn start_of(&self, file: &str) -> Option<u32> {
        self.starts
            .iter()
            .find(|(f, _)| f == file)
            .map(|&(_, p)| p)
    }

    pub fn contains(&self, file: &str) -> bool {
        self.start_of(file).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.starts.iter().map(|(f, p)| (f.as_str(), *p))
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TocNode {
    Header {
        section: String,
        section_name: String,
        text: String,
    },
    Entry {
        text: String,
        file: String,
        file_stem: String,
    },
}

impl TocNode {
    pub fn text(&self) -> &str {
        match self {
            TocNode::Header { text, .. } | TocNode::Entry { text, .. } => text,
        }
    }

    pub fn is_header(&self) -> bool {
        matches!(self, TocNode::Header { .. })
    }
}

/// How section identifiers are numbered; decides what a header line looks like.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionScheme {
    /// Automatic sections: `14  Name`.
    Plain,
    /// Mapped sections with sub-numbers: `14.1  Name`.
    #[default]
    Dotted,
}

impl SectionScheme {
    pub(crate) fn header_pattern(self) -> &'static str {
        match self {
            SectionScheme::Plain => r"^\d+\s+\S",
            SectionScheme::Dotted => r"^\d+(\.\d+)+\s+\S",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Header,
    Entry,
}

/// Placeholder shown instead of a page number for documents that were not assembled.
pub const UNRESOLVED_MARKER: &str = "N/A";

/// One laid-out TOC node as persisted in the bridge artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TocRecord {
    pub kind: RecordKind,
    /// 1-based TOC page the node starts on.
    pub toc_page: u32,
    /// 1-based TOC page holding the node's last line.
    pub end_page: u32,
    pub text: String,
    /// Leading words of the first rendered line.
    pub lead_words: String,
    pub page_num_str: String,
    pub target_page: Option<u32>,
    pub line_count: usize,
    pub section: String,
    pub file: Option<String>,
}

impl TocRecord {
    pub fn is_header(&self) -> bool {
        self.kind == RecordKind::Header
    }

    pub fn is_split(&self) -> bool {
        self.end_page > self.toc_page
    }
}

/// Everything the link and outline stages need from the paginator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TocBridge {
    pub title: String,
    pub scheme: SectionScheme,
    /// Geometry and entry size the TOC was rendered with.
    pub page_width_mm: f32,
    pub margin_mm: f32,
    pub font_size: f32,
    pub toc_page_count: u32,
    pub records: Vec<TocRecord>,
}

impl TocBridge {
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn entries(&self) -> impl Iterator<Item = &TocRecord> {
        self.records.iter().filter(|r| !r.is_header())
    }

    pub fn headers(&self) -> impl Iterator<Item = &TocRecord> {
        self.records.iter().filter(|r| r.is_header())
    }

    /// Rebuilds the content page map from resolved entry targets. Entries
    /// without a target were not assembled and stay out of the map.
    pub fn content_map(&self, total_content_pages: u32) -> ContentPageMap {
        let starts: Vec<(&str, u32)> = self
            .entries()
            .filter_map(|r| {
                let file = r.file.as_deref()?;
                let start = r.target_page?.checked_sub(self.toc_page_count)?;
                Some((file, start))
            })
            .collect();

        let mut map = ContentPageMap::new();
        for (i, &(file, start)) in starts.iter().enumerate() {
            let end = starts
                .get(i + 1)
                .map_or(total_content_pages + 1, |&(_, next)| next);
            map.push(file, end.saturating_sub(start));
        }
        map
    }

    /// TOC page on which a section's header was laid out.
    pub fn header_page(&self, section: &str) -> Option<u32> {
        self.headers()
            .find(|r| r.section == section)
            .map(|r| r.toc_page)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineRect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl LineRect {
    pub fn union(&self, other: &LineRect) -> LineRect {
        LineRect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }
}

/// Geometry and text of one rendered line, recovered from a TOC page.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedLineBox {
    pub page_index: usize,
    pub rect: LineRect,
    pub text: String,
    pub font_size: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bookmark {
    pub level: u8,
    pub title: String,
    /// 1-based page in the final document.
    pub page: u32,
}

/// Strips control and zero-width characters, the `€`/`~` markers left behind
/// by RTF conversion, and collapses whitespace.
pub fn clean_text(text: &str) -> String {
    let replaced: String = text
        .chars()
        .map(|c| match c {
            '\u{0}'..='\u{1F}' | '\u{7F}'..='\u{9F}' => ' ',
            '\u{200B}'..='\u{200F}' | '\u{2028}'..='\u{202F}' | '\u{2060}'..='\u{206F}' => ' ',
            '\u{A0}' | '€' | '~' => ' ',
            _ => c,
        })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whitespace-normalized form used when comparing rendered text.
pub(crate) fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

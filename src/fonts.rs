use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use memmap2::Mmap;
use pdf_writer::{Filter, Name, Pdf, Rect, Ref};
use ttf_parser::Face;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum FontRole {
    Regular,
    Bold,
}

#[derive(Clone, Debug)]
enum FontSource {
    Standard(&'static str),
    TrueType {
        data: Vec<u8>,
        ps_name: String,
        bbox: Rect,
        ascent: f32,
        descent: f32,
        cap_height: f32,
        italic_angle: f32,
    },
}

#[derive(Clone, Debug)]
pub(crate) struct FontEntry {
    pub(crate) pdf_name: String,
    /// Advance widths at 1000 units/em for WinAnsi bytes 32..=255.
    pub(crate) widths_1000: Vec<f32>,
    source: FontSource,
}

impl FontEntry {
    pub(crate) fn standard(role: FontRole) -> Self {
        let (pdf_name, base_font) = match role {
            FontRole::Regular => ("F1", "Helvetica"),
            FontRole::Bold => ("F2", "Helvetica-Bold"),
        };
        Self {
            pdf_name: pdf_name.to_string(),
            widths_1000: standard_widths(base_font.as_bytes()),
            source: FontSource::Standard(base_font),
        }
    }

    pub(crate) fn text_width(&self, text: &str, font_size: f32) -> f32 {
        to_winansi_bytes(text)
            .iter()
            .filter(|&&b| b >= 32)
            .map(|&b| self.widths_1000[(b - 32) as usize] * font_size / 1000.0)
            .sum()
    }

    pub(crate) fn char_width(&self, ch: char, font_size: f32) -> f32 {
        let byte = char_to_winansi(ch);
        if byte >= 32 {
            self.widths_1000[(byte - 32) as usize] * font_size / 1000.0
        } else {
            0.0
        }
    }

    pub(crate) fn space_width(&self, font_size: f32) -> f32 {
        self.char_width(' ', font_size)
    }

    pub(crate) fn is_embedded(&self) -> bool {
        matches!(self.source, FontSource::TrueType { .. })
    }
}

/// Regular and bold faces used for one TOC.
#[derive(Clone, Debug)]
pub(crate) struct FontSet {
    pub(crate) regular: FontEntry,
    pub(crate) bold: FontEntry,
}

impl FontSet {
    pub(crate) fn load(family: Option<&str>) -> Self {
        let Some(family) = family else {
            return Self::standard();
        };
        let regular = load_truetype(family, false, "F1").unwrap_or_else(|| {
            log::warn!("Font not found: {family} bold=false; using Helvetica");
            FontEntry::standard(FontRole::Regular)
        });
        let bold = load_truetype(family, true, "F2").unwrap_or_else(|| {
            log::warn!("Font not found: {family} bold=true; using Helvetica-Bold");
            FontEntry::standard(FontRole::Bold)
        });
        Self { regular, bold }
    }

    pub(crate) fn standard() -> Self {
        Self {
            regular: FontEntry::standard(FontRole::Regular),
            bold: FontEntry::standard(FontRole::Bold),
        }
    }

    pub(crate) fn get(&self, role: FontRole) -> &FontEntry {
        match role {
            FontRole::Regular => &self.regular,
            FontRole::Bold => &self.bold,
        }
    }
}

/// (lowercase family name, bold) -> (file path, face index within TTC)
type FontLookup = HashMap<(String, bool), (PathBuf, u32)>;

static FONT_INDEX: OnceLock<FontLookup> = OnceLock::new();

fn font_family_name(face: &Face) -> Option<String> {
    for name in face.names() {
        if name.name_id == ttf_parser::name_id::FAMILY
            && name.is_unicode()
            && let Some(s) = name.to_string()
        {
            return Some(s);
        }
    }
    None
}

fn font_directories() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();

    if let Ok(val) = std::env::var("TOCMERGE_FONTS") {
        let sep = if cfg!(windows) { ';' } else { ':' };
        for part in val.split(sep) {
            let trimmed = part.trim();
            if !trimmed.is_empty() {
                dirs.push(PathBuf::from(trimmed));
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        dirs.extend([
            "/Library/Fonts".into(),
            "/System/Library/Fonts".into(),
            "/System/Library/Fonts/Supplemental".into(),
        ]);
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(&home).join("Library/Fonts"));
        }
    }

    #[cfg(target_os = "linux")]
    {
        dirs.extend(["/usr/share/fonts".into(), "/usr/local/share/fonts".into()]);
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join(".local/share/fonts"));
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(windir) = std::env::var("WINDIR") {
            dirs.push(PathBuf::from(windir).join("Fonts"));
        } else {
            dirs.push("C:\\Windows\\Fonts".into());
        }
    }

    dirs
}

fn is_font_file(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("ttf" | "ttc")
    )
}

fn is_font_collection(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("ttc"))
}

fn scan_font_dirs() -> FontLookup {
    let t0 = std::time::Instant::now();
    let mut index = FontLookup::new();
    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut files_scanned = 0u32;

    let mut stack = font_directories();
    while let Some(dir) = stack.pop() {
        if !visited.insert(dir.clone()) {
            continue;
        }
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            if !is_font_file(&path) {
                continue;
            }
            files_scanned += 1;
            let Ok(file) = std::fs::File::open(&path) else {
                continue;
            };
            let Ok(data) = (unsafe { Mmap::map(&file) }) else {
                continue;
            };
            let face_count = if is_font_collection(&path) {
                ttf_parser::fonts_in_collection(&data).unwrap_or(1)
            } else {
                1
            };
            for face_idx in 0..face_count {
                let Ok(face) = Face::parse(&data, face_idx) else {
                    continue;
                };
                if face.is_italic() {
                    continue;
                }
                if let Some(family) = font_family_name(&face) {
                    index
                        .entry((family.to_lowercase(), face.is_bold()))
                        .or_insert((path.clone(), face_idx));
                }
            }
        }
    }

    log::info!(
        "Font scan: {:.1}ms, {} files parsed → {} entries",
        t0.elapsed().as_secs_f64() * 1000.0,
        files_scanned,
        index.len(),
    );
    index
}

fn find_font_file(family: &str, bold: bool) -> Option<(PathBuf, u32)> {
    let index = FONT_INDEX.get_or_init(scan_font_dirs);
    index.get(&(family.to_lowercase(), bold)).cloned()
}

fn load_truetype(family: &str, bold: bool, pdf_name: &str) -> Option<FontEntry> {
    let (path, face_index) = find_font_file(family, bold)?;
    let data = std::fs::read(&path).ok()?;
    truetype_entry(data, face_index, pdf_name)
}

/// Metrics for a TrueType face used as a simple WinAnsi font.
fn truetype_entry(data: Vec<u8>, face_index: u32, pdf_name: &str) -> Option<FontEntry> {
    let face = Face::parse(&data, face_index).ok()?;
    let units = face.units_per_em() as f32;
    let scale = |v: f32| v / units * 1000.0;

    let widths_1000: Vec<f32> = (32u8..=255u8)
        .map(|byte| {
            face.glyph_index(winansi_to_char(byte))
                .and_then(|gid| face.glyph_hor_advance(gid))
                .map(|adv| scale(adv as f32))
                .unwrap_or(0.0)
        })
        .collect();

    let bb = face.global_bounding_box();
    let bbox = Rect::new(
        scale(bb.x_min as f32),
        scale(bb.y_min as f32),
        scale(bb.x_max as f32),
        scale(bb.y_max as f32),
    );
    let ps_name = face
        .names()
        .into_iter()
        .find(|n| n.name_id == ttf_parser::name_id::POST_SCRIPT_NAME && n.is_unicode())
        .and_then(|n| n.to_string())
        .or_else(|| font_family_name(&face))?
        .replace(' ', "");

    let ascent = scale(face.ascender() as f32);
    let descent = scale(face.descender() as f32);
    let cap_height = face
        .capital_height()
        .map(|h| scale(h as f32))
        .unwrap_or(700.0);
    let italic_angle = face.italic_angle();

    Some(FontEntry {
        pdf_name: pdf_name.to_string(),
        widths_1000,
        source: FontSource::TrueType {
            data,
            ps_name,
            bbox,
            ascent,
            descent,
            cap_height,
            italic_angle,
        },
    })
}

/// Write the font objects for `entry` and return the font dictionary ref.
pub(crate) fn embed_font(pdf: &mut Pdf, entry: &FontEntry, alloc: &mut impl FnMut() -> Ref) -> Ref {
    let font_ref = alloc();
    match &entry.source {
        FontSource::Standard(base_font) => {
            pdf.type1_font(font_ref)
                .base_font(Name(base_font.as_bytes()))
                .encoding_predefined(Name(b"WinAnsiEncoding"));
        }
        FontSource::TrueType {
            data,
            ps_name,
            bbox,
            ascent,
            descent,
            cap_height,
            italic_angle,
        } => {
            let descriptor_ref = alloc();
            let data_ref = alloc();

            let compressed = miniz_oxide::deflate::compress_to_vec_zlib(data, 6);
            let data_len = i32::try_from(data.len()).unwrap_or(i32::MAX);
            pdf.stream(data_ref, &compressed)
                .filter(Filter::FlateDecode)
                .pair(Name(b"Length1"), data_len);

            pdf.font_descriptor(descriptor_ref)
                .name(Name(ps_name.as_bytes()))
                .flags(pdf_writer::types::FontFlags::NON_SYMBOLIC)
                .bbox(*bbox)
                .italic_angle(*italic_angle)
                .ascent(*ascent)
                .descent(*descent)
                .cap_height(*cap_height)
                .stem_v(80.0)
                .font_file2(data_ref);

            let mut dict = pdf.indirect(font_ref).dict();
            dict.pair(Name(b"Type"), Name(b"Font"));
            dict.pair(Name(b"Subtype"), Name(b"TrueType"));
            dict.pair(Name(b"BaseFont"), Name(ps_name.as_bytes()));
            dict.pair(Name(b"FirstChar"), 32);
            dict.pair(Name(b"LastChar"), 255);
            dict.insert(Name(b"Widths"))
                .array()
                .items(entry.widths_1000.iter().copied());
            dict.pair(Name(b"FontDescriptor"), descriptor_ref);
            dict.pair(Name(b"Encoding"), Name(b"WinAnsiEncoding"));
        }
    }
    font_ref
}

/// Windows-1252 (WinAnsi) byte to Unicode char mapping.
/// Bytes 0x80-0x9F are remapped; all others map directly to their Unicode codepoint.
pub(crate) fn winansi_to_char(byte: u8) -> char {
    match byte {
        0x80 => '\u{20AC}',
        0x82 => '\u{201A}',
        0x83 => '\u{0192}',
        0x84 => '\u{201E}',
        0x85 => '\u{2026}',
        0x86 => '\u{2020}',
        0x87 => '\u{2021}',
        0x88 => '\u{02C6}',
        0x89 => '\u{2030}',
        0x8A => '\u{0160}',
        0x8B => '\u{2039}',
        0x8C => '\u{0152}',
        0x8E => '\u{017D}',
        0x91 => '\u{2018}',
        0x92 => '\u{2019}',
        0x93 => '\u{201C}',
        0x94 => '\u{201D}',
        0x95 => '\u{2022}',
        0x96 => '\u{2013}',
        0x97 => '\u{2014}',
        0x98 => '\u{02DC}',
        0x99 => '\u{2122}',
        0x9A => '\u{0161}',
        0x9B => '\u{203A}',
        0x9C => '\u{0153}',
        0x9E => '\u{017E}',
        0x9F => '\u{0178}',
        _ => byte as char,
    }
}

/// Map a single Unicode char to its WinAnsi byte, or 0 if unmappable.
fn char_to_winansi(c: char) -> u8 {
    match c as u32 {
        0x0020..=0x007F => c as u8,
        0x00A0..=0x00FF => c as u8,
        0x20AC => 0x80,
        0x201A => 0x82,
        0x0192 => 0x83,
        0x201E => 0x84,
        0x2026 => 0x85,
        0x2020 => 0x86,
        0x2021 => 0x87,
        0x02C6 => 0x88,
        0x2030 => 0x89,
        0x0160 => 0x8A,
        0x2039 => 0x8B,
        0x0152 => 0x8C,
        0x017D => 0x8E,
        0x2018 => 0x91,
        0x2019 => 0x92,
        0x201C => 0x93,
        0x201D => 0x94,
        0x2022 => 0x95,
        0x2013 => 0x96,
        0x2014 => 0x97,
        0x02DC => 0x98,
        0x2122 => 0x99,
        0x0161 => 0x9A,
        0x203A => 0x9B,
        0x0153 => 0x9C,
        0x017E => 0x9E,
        0x0178 => 0x9F,
        _ => 0,
    }
}

/// Convert a UTF-8 string to WinAnsi (Windows-1252) bytes for PDF Str encoding.
/// Characters outside the code page are dropped.
pub(crate) fn to_winansi_bytes(s: &str) -> Vec<u8> {
    s.chars()
        .filter_map(|c| match char_to_winansi(c) {
            0 => None,
            b => Some(b),
        })
        .collect()
}

pub(crate) fn decode_winansi(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| winansi_to_char(b)).collect()
}

// Helvetica AFM advance widths for ASCII 32..=126.
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0-9
    278, 278, 584, 584, 584, 556, 1015, // :..@
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // A-M
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // N-Z
    278, 278, 278, 469, 556, 333, // [..`
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // a-m
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // n-z
    334, 260, 334, 584, // {..~
];

const HELVETICA_BOLD_ASCII: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0-9
    333, 333, 584, 584, 584, 611, 975, // :..@
    722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, // A-M
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // N-Z
    333, 278, 333, 584, 556, 333, // [..`
    556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, // a-m
    611, 611, 611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, // n-z
    389, 280, 389, 584, // {..~
];

/// Widths (1000 units/em, WinAnsi 32..=255) for a standard-14 Helvetica face.
/// Bytes above ASCII reuse the width of a typical lowercase letter.
pub(crate) fn standard_widths(base_font: &[u8]) -> Vec<f32> {
    let bold = base_font.windows(4).any(|w| w == b"Bold");
    let ascii = if bold {
        &HELVETICA_BOLD_ASCII
    } else {
        &HELVETICA_ASCII
    };
    (32u8..=255u8)
        .map(|b| match b {
            32..=126 => ascii[(b - 32) as usize] as f32,
            0xA0 => ascii[0] as f32,
            _ => 556.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helvetica_digits_share_one_width() {
        let font = FontEntry::standard(FontRole::Regular);
        let w1 = font.text_width("1", 10.0);
        let w9 = font.text_width("9", 10.0);
        assert_eq!(w1, w9);
        assert!((font.text_width("999", 10.0) - 16.68).abs() < 1e-3);
    }

    #[test]
    fn bold_is_wider_than_regular() {
        let regular = FontEntry::standard(FontRole::Regular);
        let bold = FontEntry::standard(FontRole::Bold);
        assert!(bold.text_width("Demographic data", 10.0) > regular.text_width("Demographic data", 10.0));
    }

    #[test]
    fn winansi_round_trip_for_latin1_and_quotes() {
        let text = "Café “quoted” – dash";
        assert_eq!(decode_winansi(&to_winansi_bytes(text)), text);
    }

    #[test]
    fn unmappable_chars_are_dropped() {
        assert_eq!(to_winansi_bytes("a\u{4E2D}b"), b"ab".to_vec());
    }
}

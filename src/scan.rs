//! Recovers rendered text lines, with their geometry, from a page's content stream.
//!
//! Only simple (single-byte) fonts are measured. Shown strings are decoded as
//! WinAnsi and advanced with the font's `/Widths`, or with standard Helvetica
//! metrics when the font dictionary carries none.

use std::collections::HashMap;

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::assemble::inherited;
use crate::error::Error;
use crate::fonts::{decode_winansi, standard_widths};
use crate::model::{LineRect, RenderedLineBox};

/// Spans whose baselines differ by less than this belong to one line.
const BASELINE_TOLERANCE: f32 = 0.5;

type Matrix = [f32; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

fn multiply(a: &Matrix, b: &Matrix) -> Matrix {
    [
        a[0] * b[0] + a[1] * b[2],
        a[0] * b[1] + a[1] * b[3],
        a[2] * b[0] + a[3] * b[2],
        a[2] * b[1] + a[3] * b[3],
        a[4] * b[0] + a[5] * b[2] + b[4],
        a[4] * b[1] + a[5] * b[3] + b[5],
    ]
}

fn translate(tx: f32, ty: f32) -> Matrix {
    [1.0, 0.0, 0.0, 1.0, tx, ty]
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(f) => Some(*f),
        _ => None,
    }
}

fn numbers<const N: usize>(operands: &[Object]) -> Option<[f32; N]> {
    if operands.len() < N {
        return None;
    }
    let mut out = [0.0; N];
    for (slot, obj) in out.iter_mut().zip(operands) {
        *slot = number(obj)?;
    }
    Some(out)
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Result<&'a Object, Error> {
    match obj {
        Object::Reference(id) => Ok(doc.get_object(*id)?),
        other => Ok(other),
    }
}

/// Glyph advances at 1000 units/em for one font resource.
#[derive(Clone, Debug)]
struct FontMetrics {
    first_char: i64,
    widths: Vec<f32>,
    missing_width: f32,
}

impl FontMetrics {
    fn standard(base_font: &[u8]) -> Self {
        Self {
            first_char: 32,
            widths: standard_widths(base_font),
            missing_width: 0.0,
        }
    }

    fn from_dict(doc: &Document, font: &Dictionary) -> Self {
        let base_font = font
            .get(b"BaseFont")
            .and_then(|b| b.as_name())
            .unwrap_or(b"Helvetica".as_slice());

        let widths = font
            .get(b"Widths")
            .ok()
            .and_then(|w| resolve(doc, w).ok())
            .and_then(|w| w.as_array().ok());
        let Some(widths) = widths else {
            return Self::standard(base_font);
        };

        let first_char = font
            .get(b"FirstChar")
            .ok()
            .and_then(|f| f.as_i64().ok())
            .unwrap_or(0);
        let missing_width = font
            .get(b"FontDescriptor")
            .ok()
            .and_then(|d| resolve(doc, d).ok())
            .and_then(|d| d.as_dict().ok())
            .and_then(|d| d.get(b"MissingWidth").ok())
            .and_then(number)
            .unwrap_or(0.0);

        Self {
            first_char,
            widths: widths
                .iter()
                .map(|w| resolve(doc, w).ok().and_then(number).unwrap_or(0.0))
                .collect(),
            missing_width,
        }
    }

    fn width(&self, byte: u8) -> f32 {
        usize::try_from(byte as i64 - self.first_char)
            .ok()
            .and_then(|i| self.widths.get(i).copied())
            .unwrap_or(self.missing_width)
    }
}

/// Font resources of a page, keyed by resource name.
fn page_fonts(doc: &Document, page_id: ObjectId) -> Result<HashMap<Vec<u8>, FontMetrics>, Error> {
    let mut fonts = HashMap::new();
    let Some(resources) = inherited(doc, page_id, b"Resources")? else {
        return Ok(fonts);
    };
    let resources = resolve(doc, resources)?.as_dict()?;
    let Ok(font_dict) = resources.get(b"Font") else {
        return Ok(fonts);
    };
    for (name, font) in resolve(doc, font_dict)?.as_dict()?.iter() {
        if let Ok(font) = resolve(doc, font)?.as_dict() {
            fonts.insert(name.clone(), FontMetrics::from_dict(doc, font));
        }
    }
    Ok(fonts)
}

/// A run of shown text in device space.
#[derive(Clone, Debug)]
struct Span {
    x0: f32,
    x1: f32,
    baseline: f32,
    font_size: f32,
    text: String,
}

struct TextState<'a> {
    fonts: &'a HashMap<Vec<u8>, FontMetrics>,
    fallback: FontMetrics,
    font: Option<Vec<u8>>,
    font_size: f32,
    char_spacing: f32,
    word_spacing: f32,
    h_scale: f32,
    leading: f32,
    tm: Matrix,
    tlm: Matrix,
    ctm: Matrix,
    saved: Vec<Matrix>,
    spans: Vec<Span>,
}

impl<'a> TextState<'a> {
    fn new(fonts: &'a HashMap<Vec<u8>, FontMetrics>) -> Self {
        Self {
            fonts,
            fallback: FontMetrics::standard(b"Helvetica"),
            font: None,
            font_size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            h_scale: 1.0,
            leading: 0.0,
            tm: IDENTITY,
            tlm: IDENTITY,
            ctm: IDENTITY,
            saved: Vec::new(),
            spans: Vec::new(),
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.tlm = multiply(&translate(tx, ty), &self.tlm);
        self.tm = self.tlm;
    }

    fn next_line(&mut self) {
        self.move_line(0.0, -self.leading);
    }

    /// Device-space point of text-space origin under the current matrices.
    fn origin(&self) -> (f32, f32) {
        let m = multiply(&self.tm, &self.ctm);
        (m[4], m[5])
    }

    fn effective_size(&self) -> f32 {
        let m = multiply(&self.tm, &self.ctm);
        self.font_size * (m[2] * m[2] + m[3] * m[3]).sqrt()
    }

    fn show(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let (x0, baseline) = self.origin();
        let size = self.effective_size();
        let metrics = self
            .font
            .as_ref()
            .and_then(|f| self.fonts.get(f))
            .unwrap_or(&self.fallback);

        let mut advance = 0.0f32;
        for &b in bytes {
            let mut w = metrics.width(b) / 1000.0 * self.font_size + self.char_spacing;
            if b == b' ' {
                w += self.word_spacing;
            }
            advance += w * self.h_scale;
        }
        self.tm = multiply(&translate(advance, 0.0), &self.tm);
        let (x1, _) = self.origin();

        self.spans.push(Span {
            x0: x0.min(x1),
            x1: x0.max(x1),
            baseline,
            font_size: size,
            text: decode_winansi(bytes),
        });
    }

    fn show_array(&mut self, items: &[Object]) {
        for item in items {
            match item {
                Object::String(bytes, _) => self.show(bytes),
                other => {
                    if let Some(adjust) = number(other) {
                        let tx = -adjust / 1000.0 * self.font_size * self.h_scale;
                        self.tm = multiply(&translate(tx, 0.0), &self.tm);
                    }
                }
            }
        }
    }

    fn apply(&mut self, operator: &str, operands: &[Object]) {
        match operator {
            "q" => self.saved.push(self.ctm),
            "Q" => {
                if let Some(ctm) = self.saved.pop() {
                    self.ctm = ctm;
                }
            }
            "cm" => {
                if let Some(m) = numbers::<6>(operands) {
                    self.ctm = multiply(&m, &self.ctm);
                }
            }
            "BT" => {
                self.tm = IDENTITY;
                self.tlm = IDENTITY;
            }
            "Tf" => {
                if let (Some(name), Some(size)) = (
                    operands.first().and_then(|o| o.as_name().ok()),
                    operands.get(1).and_then(number),
                ) {
                    self.font = Some(name.to_vec());
                    self.font_size = size;
                }
            }
            "Tc" => {
                if let Some([v]) = numbers::<1>(operands) {
                    self.char_spacing = v;
                }
            }
            "Tw" => {
                if let Some([v]) = numbers::<1>(operands) {
                    self.word_spacing = v;
                }
            }
            "Tz" => {
                if let Some([v]) = numbers::<1>(operands) {
                    self.h_scale = v / 100.0;
                }
            }
            "TL" => {
                if let Some([v]) = numbers::<1>(operands) {
                    self.leading = v;
                }
            }
            "Td" => {
                if let Some([tx, ty]) = numbers::<2>(operands) {
                    self.move_line(tx, ty);
                }
            }
            "TD" => {
                if let Some([tx, ty]) = numbers::<2>(operands) {
                    self.leading = -ty;
                    self.move_line(tx, ty);
                }
            }
            "Tm" => {
                if let Some(m) = numbers::<6>(operands) {
                    self.tm = m;
                    self.tlm = m;
                }
            }
            "T*" => self.next_line(),
            "Tj" => {
                if let Some(Object::String(bytes, _)) = operands.first() {
                    self.show(bytes);
                }
            }
            "'" => {
                self.next_line();
                if let Some(Object::String(bytes, _)) = operands.first() {
                    self.show(bytes);
                }
            }
            "\"" => {
                if let Some([aw, ac]) = numbers::<2>(operands) {
                    self.word_spacing = aw;
                    self.char_spacing = ac;
                }
                self.next_line();
                if let Some(Object::String(bytes, _)) = operands.get(2) {
                    self.show(bytes);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    self.show_array(items);
                }
            }
            _ => {}
        }
    }
}

/// Groups spans sharing a baseline into lines, ordered top to bottom.
fn group_lines(mut spans: Vec<Span>, page_index: usize) -> Vec<RenderedLineBox> {
    spans.retain(|s| !s.text.trim().is_empty());
    spans.sort_by(|a, b| {
        b.baseline
            .total_cmp(&a.baseline)
            .then_with(|| a.x0.total_cmp(&b.x0))
    });

    let mut groups: Vec<Vec<Span>> = Vec::new();
    for span in spans {
        match groups.last_mut() {
            Some(group) if (group[0].baseline - span.baseline).abs() < BASELINE_TOLERANCE => {
                group.push(span)
            }
            _ => groups.push(vec![span]),
        }
    }

    groups
        .into_iter()
        .map(|mut group| {
            group.sort_by(|a, b| a.x0.total_cmp(&b.x0));
            let baseline = group[0].baseline;
            let font_size = group.iter().map(|s| s.font_size).fold(0.0f32, f32::max);

            let mut text = String::new();
            let mut prev_x1: Option<f32> = None;
            for span in &group {
                if let Some(x1) = prev_x1
                    && span.x0 - x1 > span.font_size * 0.15
                    && !text.ends_with(' ')
                {
                    text.push(' ');
                }
                text.push_str(&span.text);
                prev_x1 = Some(span.x1);
            }

            let x0 = group.iter().map(|s| s.x0).fold(f32::INFINITY, f32::min);
            let x1 = group.iter().map(|s| s.x1).fold(f32::NEG_INFINITY, f32::max);
            RenderedLineBox {
                page_index,
                rect: LineRect {
                    x0,
                    y0: baseline - font_size * 0.2,
                    x1,
                    y1: baseline + font_size * 0.8,
                },
                text: text.trim().to_string(),
                font_size,
            }
        })
        .collect()
}

/// Text lines of the page at zero-based `page_index`, top to bottom.
pub fn scan_page(doc: &Document, page_index: usize) -> Result<Vec<RenderedLineBox>, Error> {
    let page_id = page_id_at(doc, page_index)?;
    let fonts = page_fonts(doc, page_id)?;
    let content = Content::decode(&doc.get_page_content(page_id)?)?;

    let mut state = TextState::new(&fonts);
    for op in &content.operations {
        state.apply(&op.operator, &op.operands);
    }
    Ok(group_lines(state.spans, page_index))
}

/// Object id of the page at zero-based `page_index`.
pub(crate) fn page_id_at(doc: &Document, page_index: usize) -> Result<ObjectId, Error> {
    let number = u32::try_from(page_index + 1)
        .map_err(|_| Error::Structure(format!("page index {page_index} out of range")))?;
    doc.get_pages()
        .get(&number)
        .copied()
        .ok_or_else(|| Error::Structure(format!("document has no page {number}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::Operation;
    use lopdf::{Stream, StringFormat, dictionary};

    fn text(s: &str) -> Object {
        Object::String(s.as_bytes().to_vec(), StringFormat::Literal)
    }

    fn single_page(ops: Vec<Operation>, font: Dictionary) -> Document {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(font);
        let content = Content { operations: ops };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            "Contents" => content_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        });
        doc.objects.insert(
            pages_id,
            dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }
            .into(),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    fn helvetica() -> Dictionary {
        dictionary! { "Type" => "Font", "Subtype" => "Type1", "BaseFont" => "Helvetica" }
    }

    #[test]
    fn spans_on_one_baseline_form_one_line() {
        let doc = single_page(
            vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 10.into()]),
                Operation::new("Td", vec![50.into(), 700.into()]),
                Operation::new("Tj", vec![text("Adverse Events")]),
                Operation::new("Td", vec![400.into(), 0.into()]),
                Operation::new("Tj", vec![text("12")]),
                Operation::new("ET", vec![]),
            ],
            helvetica(),
        );
        let lines = scan_page(&doc, 0).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "Adverse Events 12");
        assert!((lines[0].rect.x0 - 50.0).abs() < 1e-3);
        assert!((lines[0].rect.y0 - 698.0).abs() < 1e-3);
        assert!((lines[0].rect.y1 - 708.0).abs() < 1e-3);
        // "12" in Helvetica is 2 × 556 / 1000 × 10 wide.
        assert!((lines[0].rect.x1 - (450.0 + 11.12)).abs() < 1e-3);
    }

    #[test]
    fn adjacent_spans_are_joined_without_space() {
        let doc = single_page(
            vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 10.into()]),
                Operation::new("Td", vec![50.into(), 700.into()]),
                Operation::new("Tj", vec![text("Listing")]),
                Operation::new("Tj", vec![text("....")]),
                Operation::new("ET", vec![]),
            ],
            helvetica(),
        );
        let lines = scan_page(&doc, 0).unwrap();
        assert_eq!(lines[0].text, "Listing....");
    }

    #[test]
    fn lines_come_back_top_to_bottom() {
        let doc = single_page(
            vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 8.into()]),
                Operation::new("TL", vec![12.into()]),
                Operation::new("Tm", vec![1.into(), 0.into(), 0.into(), 1.into(), 40.into(), 500.into()]),
                Operation::new("Tj", vec![text("first")]),
                Operation::new("T*", vec![]),
                Operation::new("Tj", vec![text("second")]),
                Operation::new("'", vec![text("third")]),
                Operation::new("ET", vec![]),
            ],
            helvetica(),
        );
        let lines = scan_page(&doc, 0).unwrap();
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert!((lines[2].rect.y0 - (476.0 - 1.6)).abs() < 1e-3);
    }

    #[test]
    fn widths_array_drives_advance() {
        let mut font = helvetica();
        font.set("FirstChar", 65);
        font.set("LastChar", 66);
        font.set("Widths", vec![Object::Integer(1000), Object::Integer(500)]);
        let doc = single_page(
            vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 10.into()]),
                Operation::new("Td", vec![0.into(), 100.into()]),
                Operation::new("TJ", vec![Object::Array(vec![text("A"), Object::Integer(100), text("B")])]),
                Operation::new("ET", vec![]),
            ],
            font,
        );
        let lines = scan_page(&doc, 0).unwrap();
        assert_eq!(lines[0].text, "AB");
        // A (10) pulled back by 1 before B (5).
        assert!((lines[0].rect.x1 - 14.0).abs() < 1e-3);
    }

    #[test]
    fn missing_page_is_a_structure_error() {
        let doc = single_page(vec![], helvetica());
        assert!(matches!(scan_page(&doc, 3), Err(Error::Structure(_))));
    }
}

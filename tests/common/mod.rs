#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, StringFormat, dictionary};
use tempfile::TempDir;
use tocmerge_pdf::{DocumentEntry, DocumentSet, Paths};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One source document of a fixture: file name, title, section, section name, page count.
pub struct Doc {
    pub file: String,
    pub title: Option<String>,
    pub section: String,
    pub section_name: String,
    pub pages: u32,
}

pub fn doc(file: &str, title: Option<&str>, section: &str, section_name: &str, pages: u32) -> Doc {
    Doc {
        file: file.to_string(),
        title: title.map(str::to_string),
        section: section.to_string(),
        section_name: section_name.to_string(),
        pages,
    }
}

/// Letter-sized pages with "<prefix> <n>" drawn in Helvetica.
pub fn dummy_pdf(num_pages: u32, text_prefix: &str) -> Document {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut page_ids = vec![];
    for i in 1..=num_pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![100.into(), 700.into()]),
                Operation::new(
                    "Tj",
                    vec![Object::String(
                        format!("{text_prefix} {i}").into_bytes(),
                        StringFormat::Literal,
                    )],
                ),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        page_ids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        dictionary! {
            "Type" => "Pages",
            "Kids" => page_ids,
            "Count" => num_pages as i64,
        }
        .into(),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc
}

/// Temporary PDF and output folders holding one converted PDF per document.
pub struct Fixture {
    _dir: TempDir,
    pub pdf_folder: PathBuf,
    pub output_folder: PathBuf,
    pub set: DocumentSet,
}

impl Fixture {
    pub fn new(docs: &[Doc]) -> Self {
        Self::with_missing(docs, &[])
    }

    /// Like `new`, but the PDFs of `missing` are never written.
    pub fn with_missing(docs: &[Doc], missing: &[&str]) -> Self {
        init_logging();
        let dir = TempDir::new().unwrap();
        let pdf_folder = dir.path().join("pdf");
        let output_folder = dir.path().join("out");
        std::fs::create_dir_all(&pdf_folder).unwrap();

        let mut entries = Vec::new();
        for d in docs {
            entries.push(DocumentEntry::new(
                d.file.as_str(),
                d.title.clone(),
                d.section.as_str(),
                d.section_name.as_str(),
            ));
            if missing.contains(&d.file.as_str()) {
                continue;
            }
            let stem = Path::new(&d.file).file_stem().unwrap().to_str().unwrap();
            dummy_pdf(d.pages, stem)
                .save(pdf_folder.join(format!("{stem}.pdf")))
                .unwrap();
        }

        Self {
            _dir: dir,
            pdf_folder,
            output_folder,
            set: DocumentSet::new(entries).unwrap(),
        }
    }

    pub fn paths(&self) -> Paths {
        Paths::new(&self.pdf_folder, &self.output_folder)
    }

    pub fn output_in(&self, name: &str) -> Paths {
        Paths::new(&self.pdf_folder, self.output_folder.join(name))
    }
}

/// Sections A (two documents) and B (one document), two pages each.
pub fn three_docs() -> [Doc; 3] {
    [
        doc("t_b1.rtf", Some("Vital Signs"), "B", "Beta", 2),
        doc("t_a2.rtf", Some("Disposition"), "A", "Alpha", 2),
        doc("t_a1.rtf", Some("Demographics"), "A", "Alpha", 2),
    ]
}

fn page_numbers(doc: &Document) -> HashMap<ObjectId, u32> {
    doc.get_pages().into_iter().map(|(n, id)| (id, n)).collect()
}

/// A link annotation: rect and the 1-based page its destination points at.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub rect: [f32; 4],
    pub target: u32,
}

pub fn number(obj: &Object) -> f32 {
    match obj {
        Object::Integer(i) => *i as f32,
        Object::Real(f) => *f,
        other => panic!("not a number: {other:?}"),
    }
}

/// Link annotations on the 1-based page `page`.
pub fn links_on_page(doc: &Document, page: u32) -> Vec<Link> {
    let numbers = page_numbers(doc);
    let page_id = doc.get_pages()[&page];
    let page_dict = doc.get_object(page_id).unwrap().as_dict().unwrap();
    let Ok(annots) = page_dict.get(b"Annots") else {
        return vec![];
    };
    let annots = match annots {
        Object::Reference(id) => doc.get_object(*id).unwrap().as_array().unwrap(),
        other => other.as_array().unwrap(),
    };

    annots
        .iter()
        .map(|a| doc.get_object(a.as_reference().unwrap()).unwrap().as_dict().unwrap())
        .filter(|a| a.get(b"Subtype").unwrap().as_name().unwrap() == b"Link")
        .map(|a| {
            let rect = a.get(b"Rect").unwrap().as_array().unwrap();
            let dest = a.get(b"Dest").unwrap().as_array().unwrap();
            Link {
                rect: [number(&rect[0]), number(&rect[1]), number(&rect[2]), number(&rect[3])],
                target: numbers[&dest[0].as_reference().unwrap()],
            }
        })
        .collect()
}

/// Outline items depth-first as (depth, title, 1-based page).
pub fn outline(doc: &Document) -> Vec<(usize, String, u32)> {
    let numbers = page_numbers(doc);
    let root = doc.trailer.get(b"Root").unwrap().as_reference().unwrap();
    let catalog = doc.get_object(root).unwrap().as_dict().unwrap();
    let Ok(outlines) = catalog.get(b"Outlines") else {
        return vec![];
    };
    let outlines = doc
        .get_object(outlines.as_reference().unwrap())
        .unwrap()
        .as_dict()
        .unwrap();

    let mut out = Vec::new();
    let mut stack: Vec<(usize, ObjectId)> = Vec::new();
    if let Ok(first) = outlines.get(b"First") {
        stack.push((1, first.as_reference().unwrap()));
    }
    while let Some((depth, id)) = stack.pop() {
        let item = doc.get_object(id).unwrap().as_dict().unwrap();
        let title = match item.get(b"Title").unwrap() {
            Object::String(bytes, _) => String::from_utf8_lossy(bytes).to_string(),
            other => panic!("title is not a string: {other:?}"),
        };
        let dest = item.get(b"Dest").unwrap().as_array().unwrap();
        out.push((depth, title, numbers[&dest[0].as_reference().unwrap()]));

        // Next sibling is visited after this item's children.
        if let Ok(next) = item.get(b"Next") {
            stack.push((depth, next.as_reference().unwrap()));
        }
        if let Ok(child) = item.get(b"First") {
            stack.push((depth + 1, child.as_reference().unwrap()));
        }
    }
    out
}

use std::collections::HashMap;
use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId, dictionary};

use crate::config::Paths;
use crate::error::Error;
use crate::model::{ContentPageMap, DocumentSet};

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedDocument {
    pub file: String,
    pub reason: String,
}

pub struct AssemblyReport {
    pub map: ContentPageMap,
    pub document: Document,
    pub skipped: Vec<SkippedDocument>,
}

/// Concatenates the converted PDF of every entry, in canonical order, and
/// records where each one starts. Missing or unreadable files are skipped.
pub fn assemble(set: &DocumentSet, paths: &Paths) -> Result<AssemblyReport, Error> {
    let mut tree = PageTree::new();
    let mut map = ContentPageMap::new();
    let mut skipped = Vec::new();

    for entry in set.iter() {
        let path = paths.pdf_folder.join(entry.pdf_file_name());
        let source = match load_page_stream(&path) {
            Ok(doc) => doc,
            Err(reason) => {
                log::warn!("Skipping {}: {reason}", entry.file);
                skipped.push(SkippedDocument {
                    file: entry.file.clone(),
                    reason,
                });
                continue;
            }
        };
        let page_count = match tree.append(&source) {
            Ok(count) => count,
            Err(e) => {
                log::warn!("Skipping {}: {e}", entry.file);
                skipped.push(SkippedDocument {
                    file: entry.file.clone(),
                    reason: format!("pages could not be copied: {e}"),
                });
                continue;
            }
        };
        let start = map.push(&entry.file, page_count);
        log::debug!("{} → pages {start}..{}", entry.file, start + page_count - 1);
    }

    if map.total_pages() == 0 {
        return Err(Error::NothingAssembled(set.len()));
    }

    let mut document = tree.finish();
    document.save(paths.combined_path())?;
    log::info!(
        "Assembled {} of {} documents ({} pages) into {}",
        map.len(),
        set.len(),
        map.total_pages(),
        paths.combined_path().display(),
    );

    Ok(AssemblyReport {
        map,
        document,
        skipped,
    })
}

/// Reasons are returned as text; none of them stop the run.
fn load_page_stream(path: &Path) -> Result<Document, String> {
    let meta = std::fs::metadata(path).map_err(|_| "file not found".to_string())?;
    if meta.len() == 0 {
        return Err("file is empty".to_string());
    }
    let doc = Document::load(path).map_err(|e| format!("unreadable PDF: {e}"))?;
    if doc.get_pages().is_empty() {
        return Err("document has no pages".to_string());
    }
    Ok(doc)
}

/// Places the TOC pages first, followed by every content page.
pub fn combine(toc: &Document, content: &Document) -> Result<Document, Error> {
    let mut tree = PageTree::new();
    tree.append(toc)?;
    tree.append(content)?;
    Ok(tree.finish())
}

/// A flat page tree that documents are appended to.
pub(crate) struct PageTree {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
}

impl PageTree {
    pub(crate) fn new() -> Self {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    /// Deep-copies every page of `source` and returns how many were added.
    /// On error the tree is left exactly as it was.
    pub(crate) fn append(&mut self, source: &Document) -> Result<u32, Error> {
        let max_id = self.doc.max_id;
        match self.copy_pages(source) {
            Ok(kids) => {
                let count = u32::try_from(kids.len())
                    .map_err(|_| Error::Structure("too many pages".to_string()))?;
                self.kids.extend(kids);
                Ok(count)
            }
            Err(e) => {
                // Everything copied so far got an id above the old maximum.
                self.doc.objects.retain(|id, _| id.0 <= max_id);
                self.doc.max_id = max_id;
                Err(e)
            }
        }
    }

    fn copy_pages(&mut self, source: &Document) -> Result<Vec<Object>, Error> {
        let pages = source.get_pages();
        let mut kids = Vec::with_capacity(pages.len());
        let mut copier = ObjectCopier::new(source, &mut self.doc);

        // Pages are mapped up front so annotations pointing at a sibling page
        // land on the copy instead of dragging the old page tree along.
        let mut targets = Vec::with_capacity(pages.len());
        for &page_id in pages.values() {
            let new_id = copier.target.new_object_id();
            copier.id_map.insert(page_id, new_id);
            targets.push((page_id, new_id));
        }

        for (page_id, new_id) in targets {
            let mut page = flatten_page(source, page_id)?;
            page.remove(b"Parent");
            let Object::Dictionary(mut page) = copier.remap_references(Object::Dictionary(page))?
            else {
                return Err(Error::Structure(format!("page {page_id:?} is not a dictionary")));
            };
            page.set("Parent", self.pages_id);
            copier.target.objects.insert(new_id, Object::Dictionary(page));
            kids.push(Object::Reference(new_id));
        }
        Ok(kids)
    }

    pub(crate) fn finish(mut self) -> Document {
        let count = self.kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => self.kids,
                "Count" => count,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc
    }
}

/// Copy of the page dictionary with inherited attributes written onto the page itself.
fn flatten_page(doc: &Document, page_id: ObjectId) -> Result<Dictionary, Error> {
    let mut page = doc.get_object(page_id)?.as_dict()?.clone();
    for key in INHERITABLE {
        if page.has(key) {
            continue;
        }
        if let Some(value) = inherited(doc, page_id, key)? {
            page.set(key.to_vec(), value.clone());
        }
    }
    Ok(page)
}

/// Looks `key` up on the page, then up the /Parent chain.
pub(crate) fn inherited<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Result<Option<&'a Object>, Error> {
    let mut current = page_id;
    // Bounded so a /Parent cycle cannot hang the walk.
    for _ in 0..64 {
        let dict = doc.get_object(current)?.as_dict()?;
        if let Ok(value) = dict.get(key) {
            return Ok(Some(value));
        }
        match dict.get(b"Parent") {
            Ok(parent) => current = parent.as_reference()?,
            Err(_) => return Ok(None),
        }
    }
    Err(Error::Structure(format!("page tree above {page_id:?} is too deep")))
}

/// Copies objects between documents, remapping every reference it meets.
struct ObjectCopier<'a> {
    source: &'a Document,
    target: &'a mut Document,
    id_map: HashMap<ObjectId, ObjectId>,
}

impl<'a> ObjectCopier<'a> {
    fn new(source: &'a Document, target: &'a mut Document) -> Self {
        Self {
            source,
            target,
            id_map: HashMap::new(),
        }
    }

    /// Copies `source_id` and everything it references. `None` when the
    /// object does not exist; such a reference reads as null.
    fn copy_object(&mut self, source_id: ObjectId) -> Result<Option<ObjectId>, lopdf::Error> {
        if let Some(&target_id) = self.id_map.get(&source_id) {
            return Ok(Some(target_id));
        }
        let Some(obj) = self.source.objects.get(&source_id).cloned() else {
            log::debug!("Dangling reference {source_id:?} copied as null");
            return Ok(None);
        };

        // Registered before recursing; cyclic references resolve to this id.
        let new_id = self.target.add_object(Object::Null);
        self.id_map.insert(source_id, new_id);

        let new_obj = self.remap_references(obj)?;
        self.target.objects.insert(new_id, new_obj);
        Ok(Some(new_id))
    }

    fn remap_references(&mut self, obj: Object) -> Result<Object, lopdf::Error> {
        match obj {
            Object::Reference(id) => Ok(self
                .copy_object(id)?
                .map_or(Object::Null, Object::Reference)),
            Object::Array(items) => Ok(Object::Array(
                items
                    .into_iter()
                    .map(|o| self.remap_references(o))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            Object::Dictionary(mut dict) => {
                for (_, value) in dict.iter_mut() {
                    let taken = std::mem::replace(value, Object::Null);
                    *value = self.remap_references(taken)?;
                }
                Ok(Object::Dictionary(dict))
            }
            Object::Stream(mut stream) => {
                for (_, value) in stream.dict.iter_mut() {
                    let taken = std::mem::replace(value, Object::Null);
                    *value = self.remap_references(taken)?;
                }
                Ok(Object::Stream(stream))
            }
            other => Ok(other),
        }
    }
}

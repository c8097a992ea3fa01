use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat, dictionary};

use crate::config::DEFAULT_TITLE;
use crate::error::Error;
use crate::model::{Bookmark, ContentPageMap, DocumentSet, TocBridge, clean_text};
use crate::scan::page_id_at;

/// Three-level bookmark list in canonical order: the document title, one
/// item per section, and one per assembled document.
pub fn build_bookmarks(set: &DocumentSet, map: &ContentPageMap, bridge: &TocBridge) -> Vec<Bookmark> {
    let title = if bridge.title.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        bridge.title.clone()
    };
    let mut bookmarks = vec![Bookmark {
        level: 1,
        title,
        page: 1,
    }];

    for section in set.sections() {
        let Some(first) = section.first() else {
            continue;
        };
        let title = format!("{} {}", first.section, clean_text(&first.section_name));
        bookmarks.push(Bookmark {
            level: 2,
            title: title.trim_end().to_string(),
            page: bridge.header_page(&first.section).unwrap_or(1),
        });
        for entry in section {
            let Some(start) = map.start_of(&entry.file) else {
                continue;
            };
            bookmarks.push(Bookmark {
                level: 3,
                title: entry.bookmark_title(),
                page: start + bridge.toc_page_count,
            });
        }
    }
    bookmarks
}

struct OutlineNode {
    id: ObjectId,
    title: String,
    page: u32,
    children: Vec<OutlineNode>,
}

impl OutlineNode {
    /// Items shown when this node is open; only the top level starts open.
    fn visible_count(&self, level: u8) -> i64 {
        if level > 1 {
            return 0;
        }
        self.children
            .iter()
            .map(|c| 1 + c.visible_count(level + 1))
            .sum()
    }
}

/// Nests a flat, level-ordered bookmark list.
fn build_tree(doc: &mut Document, bookmarks: &[Bookmark]) -> Vec<OutlineNode> {
    let mut roots: Vec<OutlineNode> = Vec::new();
    let mut stack: Vec<(u8, OutlineNode)> = Vec::new();

    let attach = |node: OutlineNode, stack: &mut Vec<(u8, OutlineNode)>, roots: &mut Vec<OutlineNode>| {
        match stack.last_mut() {
            Some((_, parent)) => parent.children.push(node),
            None => roots.push(node),
        }
    };

    for bookmark in bookmarks {
        while let Some((level, _)) = stack.last() {
            if *level < bookmark.level {
                break;
            }
            if let Some((_, done)) = stack.pop() {
                attach(done, &mut stack, &mut roots);
            }
        }
        stack.push((
            bookmark.level,
            OutlineNode {
                id: doc.new_object_id(),
                title: bookmark.title.clone(),
                page: bookmark.page,
                children: Vec::new(),
            },
        ));
    }
    while let Some((_, done)) = stack.pop() {
        attach(done, &mut stack, &mut roots);
    }
    roots
}

/// Bookmark titles outside ASCII are written as UTF-16BE with a byte order mark.
fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::String(text.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

fn write_level(
    doc: &mut Document,
    items: &[OutlineNode],
    parent: ObjectId,
    level: u8,
) -> Result<(), Error> {
    for (i, item) in items.iter().enumerate() {
        let page_id = page_id_at(doc, item.page.saturating_sub(1) as usize)?;
        let mut dict: Dictionary = dictionary! {
            "Title" => text_string(&item.title),
            "Parent" => parent,
            "Dest" => vec![Object::Reference(page_id), "Fit".into()],
        };
        if i > 0 {
            dict.set("Prev", items[i - 1].id);
        }
        if let Some(next) = items.get(i + 1) {
            dict.set("Next", next.id);
        }
        if let (Some(first), Some(last)) = (item.children.first(), item.children.last()) {
            dict.set("First", first.id);
            dict.set("Last", last.id);
            let visible = item.visible_count(level);
            let count = if visible > 0 {
                visible
            } else {
                -(item.children.len() as i64)
            };
            dict.set("Count", count);
            write_level(doc, &item.children, item.id, level + 1)?;
        }
        doc.objects.insert(item.id, Object::Dictionary(dict));
    }
    Ok(())
}

/// Writes `bookmarks` as the document outline and asks viewers to show it.
pub fn write_outline(doc: &mut Document, bookmarks: &[Bookmark]) -> Result<(), Error> {
    if bookmarks.is_empty() {
        return Ok(());
    }
    let roots = build_tree(doc, bookmarks);
    let outlines_id = doc.new_object_id();
    write_level(doc, &roots, outlines_id, 1)?;

    let (Some(first), Some(last)) = (roots.first(), roots.last()) else {
        return Ok(());
    };
    let visible: i64 = roots.iter().map(|r| 1 + r.visible_count(1)).sum();
    doc.objects.insert(
        outlines_id,
        Object::Dictionary(dictionary! {
            "Type" => "Outlines",
            "First" => first.id,
            "Last" => last.id,
            "Count" => visible,
        }),
    );

    let root_id = doc.trailer.get(b"Root")?.as_reference()?;
    let catalog = doc.get_object_mut(root_id)?.as_dict_mut()?;
    catalog.set("Outlines", outlines_id);
    catalog.set("PageMode", "UseOutlines");

    log::debug!("Outline: {} bookmark(s)", bookmarks.len());
    Ok(())
}

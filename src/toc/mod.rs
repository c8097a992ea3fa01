mod layout;
mod render;

use std::path::Path;

use crate::config::{TocConfig, bridge_path_for};
use crate::error::Error;
use crate::fonts::FontSet;
use crate::model::{ContentPageMap, DocumentSet, TocBridge, TocNode, clean_text};

/// A rendered TOC and the bridge the annotation stage needs.
pub struct RenderedToc {
    pub pdf: Vec<u8>,
    pub bridge: TocBridge,
    /// Layout passes run, including the measurement pass.
    pub passes: usize,
}

impl RenderedToc {
    pub fn page_count(&self) -> u32 {
        self.bridge.toc_page_count
    }

    /// Writes the TOC PDF to `toc_path` and the bridge next to it as JSON.
    pub fn write(&self, toc_path: &Path) -> Result<(), Error> {
        std::fs::write(toc_path, &self.pdf)?;
        self.bridge.save(&bridge_path_for(toc_path))?;
        Ok(())
    }
}

/// Flattens the ordered documents into headers and entries; a header is
/// emitted every time the section identifier changes.
pub fn build_nodes(set: &DocumentSet) -> Vec<TocNode> {
    let mut nodes = Vec::with_capacity(set.len() + set.len() / 4);
    for section in set.sections() {
        let Some(first) = section.first() else {
            continue;
        };
        nodes.push(TocNode::Header {
            section: first.section.clone(),
            section_name: clean_text(&first.section_name),
            text: first.section_header(),
        });
        for entry in section {
            nodes.push(TocNode::Entry {
                text: entry.display_title(),
                file: entry.file.clone(),
                file_stem: entry.file_stem().to_string(),
            });
        }
    }
    nodes
}

/// Paginates `nodes` against the content page map and renders the TOC pages.
pub fn render_toc(
    nodes: &[TocNode],
    map: &ContentPageMap,
    config: &TocConfig,
) -> Result<RenderedToc, Error> {
    config.validate()?;
    let fonts = FontSet::load(config.font_family.as_deref());
    let pagination = layout::paginate(nodes, map, config, &fonts)?;
    let pdf = render::render_pdf(&pagination.layout, &config.geometry(), &fonts);

    log::info!(
        "TOC: {} node(s) on {} page(s) after {} pass(es)",
        nodes.len(),
        pagination.toc_page_count,
        pagination.passes,
    );

    Ok(RenderedToc {
        pdf,
        bridge: TocBridge {
            title: clean_text(&config.title),
            scheme: config.scheme,
            page_width_mm: config.page_width_mm,
            margin_mm: config.margin_mm,
            font_size: config.font_size,
            toc_page_count: pagination.toc_page_count,
            records: pagination.layout.records,
        },
        passes: pagination.passes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DocumentEntry;

    #[test]
    fn header_precedes_each_new_section() {
        let set = DocumentSet::new(vec![
            DocumentEntry::new("t14_2_01.rtf", Some("Efficacy".into()), "14.2", "Efficacy Data"),
            DocumentEntry::new("t14_1_02.rtf", Some("Disposition".into()), "14.1", "Demographic Data"),
            DocumentEntry::new("t14_1_01.rtf", None, "14.1", "Demographic Data"),
        ])
        .unwrap();
        let nodes = build_nodes(&set);

        let texts: Vec<&str> = nodes.iter().map(|n| n.text()).collect();
        assert_eq!(
            texts,
            vec![
                "14.1  Demographic Data",
                "t14_1_01",
                "Disposition",
                "14.2  Efficacy Data",
                "Efficacy",
            ]
        );
        assert_eq!(nodes.iter().filter(|n| n.is_header()).count(), 2);
    }

    #[test]
    fn empty_set_yields_no_nodes() {
        let set = DocumentSet::new(vec![]).unwrap();
        assert!(build_nodes(&set).is_empty());
    }

    #[test]
    fn invalid_config_is_rejected_before_layout() {
        let set = DocumentSet::new(vec![DocumentEntry::new("a.rtf", None, "1", "One")]).unwrap();
        let config = TocConfig {
            font_size: 0.0,
            ..TocConfig::default()
        };
        let result = render_toc(&build_nodes(&set), &ContentPageMap::new(), &config);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}

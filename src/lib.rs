mod assemble;
mod config;
mod error;
mod fonts;
mod links;
mod model;
mod outline;
mod scan;
mod toc;

pub use assemble::{AssemblyReport, SkippedDocument, assemble, combine};
pub use config::{
    DEFAULT_TITLE, LinkStyle, PAGE_HEIGHT_MM, PassMode, Paths, TocConfig, bridge_path_for,
    mm_to_pt,
};
pub use error::Error;
pub use links::{LinkReport, attach_links};
pub use model::{
    Bookmark, ContentPageMap, DocumentEntry, DocumentSet, LineRect, RecordKind, RenderedLineBox,
    SectionScheme, TocBridge, TocNode, TocRecord, UNRESOLVED_MARKER, clean_text,
};
pub use outline::{build_bookmarks, write_outline};
pub use scan::scan_page;
pub use toc::{RenderedToc, build_nodes, render_toc};

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use lopdf::Document;

/// What a full run produced.
#[derive(Debug)]
pub struct BuildReport {
    pub output: PathBuf,
    pub content_map: ContentPageMap,
    pub toc_page_count: u32,
    pub total_pages: u32,
    pub passes: usize,
    pub skipped: Vec<SkippedDocument>,
    pub links: LinkReport,
    pub bookmarks: Vec<Bookmark>,
}

/// Assembles every document in `set`, prepends a linked TOC and writes the
/// final PDF with its outline.
pub fn build(set: &DocumentSet, paths: &Paths, config: &TocConfig) -> Result<BuildReport, Error> {
    let t0 = Instant::now();

    config.validate()?;
    if set.is_empty() {
        return Err(Error::NoDocuments);
    }
    std::fs::create_dir_all(&paths.output_folder)?;

    let nodes = build_nodes(set);
    let assembly = assemble(set, paths)?;
    let t_assemble = t0.elapsed();

    let finished = finish(&nodes, &assembly, set, paths, config, t0);
    if !paths.keep_intermediates {
        remove_intermediates(paths);
    }
    let Finished {
        output,
        rendered,
        links,
        bookmarks,
        total_pages,
        t_toc,
        t_annotate,
    } = finished?;
    let t_total = t0.elapsed();

    log::info!(
        "Timing: assemble={:.1}ms, toc={:.1}ms, annotate={:.1}ms, write={:.1}ms, total={:.1}ms ({} pages)",
        t_assemble.as_secs_f64() * 1000.0,
        (t_toc - t_assemble).as_secs_f64() * 1000.0,
        (t_annotate - t_toc).as_secs_f64() * 1000.0,
        (t_total - t_annotate).as_secs_f64() * 1000.0,
        t_total.as_secs_f64() * 1000.0,
        total_pages,
    );

    Ok(BuildReport {
        output,
        toc_page_count: rendered.page_count(),
        content_map: assembly.map,
        total_pages,
        passes: rendered.passes,
        skipped: assembly.skipped,
        links,
        bookmarks,
    })
}

/// Re-runs link and outline attachment from the artifacts a previous run
/// kept: the TOC PDF with its bridge JSON, and the combined content PDF.
pub fn annotate(
    toc_pdf: &Path,
    content_pdf: &Path,
    output: &Path,
    set: &DocumentSet,
    config: &TocConfig,
) -> Result<LinkReport, Error> {
    let t0 = Instant::now();

    let bridge = TocBridge::load(&bridge_path_for(toc_pdf))?;
    let toc_doc = Document::load(toc_pdf)?;
    let content_doc = Document::load(content_pdf)?;
    if toc_doc.get_pages().len() as u32 != bridge.toc_page_count {
        return Err(Error::Structure(format!(
            "{} has {} page(s) but its bridge records {}",
            toc_pdf.display(),
            toc_doc.get_pages().len(),
            bridge.toc_page_count,
        )));
    }
    let map = bridge.content_map(content_doc.get_pages().len() as u32);

    let mut combined = combine(&toc_doc, &content_doc)?;
    let links = attach_links(&mut combined, &bridge, config)?;
    write_outline(&mut combined, &build_bookmarks(set, &map, &bridge))?;
    combined.save(output)?;

    log::info!(
        "Timing: annotate={:.1}ms ({} links)",
        t0.elapsed().as_secs_f64() * 1000.0,
        links.attached,
    );
    Ok(links)
}

/// Everything after assembly, up to the saved final PDF.
struct Finished {
    output: PathBuf,
    rendered: RenderedToc,
    links: LinkReport,
    bookmarks: Vec<Bookmark>,
    total_pages: u32,
    t_toc: Duration,
    t_annotate: Duration,
}

fn finish(
    nodes: &[TocNode],
    assembly: &AssemblyReport,
    set: &DocumentSet,
    paths: &Paths,
    config: &TocConfig,
    t0: Instant,
) -> Result<Finished, Error> {
    let rendered = render_toc(nodes, &assembly.map, config)?;
    rendered.write(&paths.toc_path())?;
    let t_toc = t0.elapsed();

    let toc_doc = Document::load_mem(&rendered.pdf)?;
    let mut combined = combine(&toc_doc, &assembly.document)?;
    let links = attach_links(&mut combined, &rendered.bridge, config)?;
    let bookmarks = build_bookmarks(set, &assembly.map, &rendered.bridge);
    write_outline(&mut combined, &bookmarks)?;
    let t_annotate = t0.elapsed();

    let output = paths.final_output_path();
    combined.save(&output)?;
    Ok(Finished {
        output,
        total_pages: combined.get_pages().len() as u32,
        rendered,
        links,
        bookmarks,
        t_toc,
        t_annotate,
    })
}

/// Removes the TOC PDF, its bridge and the combined content. Runs on
/// failure too, so some of them may not exist yet.
fn remove_intermediates(paths: &Paths) {
    for path in [paths.toc_path(), paths.bridge_path(), paths.combined_path()] {
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Could not remove {}: {e}", path.display()),
        }
    }
}

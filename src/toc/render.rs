use pdf_writer::{Content, Filter, Name, Pdf, Rect, Ref, Str};

use super::layout::{PlacedLine, TocLayout};
use crate::config::PageGeometry;
use crate::fonts::{FontRole, FontSet, embed_font, to_winansi_bytes};

pub(crate) fn render_pdf(layout: &TocLayout, geom: &PageGeometry, fonts: &FontSet) -> Vec<u8> {
    let t0 = std::time::Instant::now();
    let mut pdf = Pdf::new();
    let mut next_id = 1i32;
    let mut alloc = || {
        let r = Ref::new(next_id);
        next_id += 1;
        r
    };

    let catalog_id = alloc();
    let pages_id = alloc();
    let regular_ref = embed_font(&mut pdf, &fonts.regular, &mut alloc);
    let bold_ref = embed_font(&mut pdf, &fonts.bold, &mut alloc);
    let t_fonts = t0.elapsed();

    let n = layout.pages.len();
    let page_ids: Vec<Ref> = (0..n).map(|_| alloc()).collect();
    let content_ids: Vec<Ref> = (0..n).map(|_| alloc()).collect();

    for (i, page) in layout.pages.iter().enumerate() {
        let mut content = Content::new();
        render_lines(&mut content, &page.lines, fonts);
        let raw = content.finish();
        let compressed = miniz_oxide::deflate::compress_to_vec_zlib(raw.as_slice(), 6);
        pdf.stream(content_ids[i], &compressed).filter(Filter::FlateDecode);
    }

    pdf.catalog(catalog_id).pages(pages_id);
    pdf.pages(pages_id)
        .kids(page_ids.iter().copied())
        .count(n as i32);

    for i in 0..n {
        let mut page = pdf.page(page_ids[i]);
        page.media_box(Rect::new(0.0, 0.0, geom.width, geom.height))
            .parent(pages_id)
            .contents(content_ids[i]);
        let mut resources = page.resources();
        let mut font_dict = resources.fonts();
        font_dict.pair(Name(fonts.regular.pdf_name.as_bytes()), regular_ref);
        font_dict.pair(Name(fonts.bold.pdf_name.as_bytes()), bold_ref);
    }

    let t_pages = t0.elapsed();
    log::debug!(
        "TOC render: fonts={:.1}ms, pages={:.1}ms ({} page(s), embedded={})",
        t_fonts.as_secs_f64() * 1000.0,
        (t_pages - t_fonts).as_secs_f64() * 1000.0,
        n,
        fonts.regular.is_embedded(),
    );

    pdf.finish()
}

/// One BT/ET block per line, positioned with relative Td moves.
fn render_lines(content: &mut Content, lines: &[PlacedLine], fonts: &FontSet) {
    content.set_fill_gray(0.0);
    for line in lines {
        if line.segments.iter().all(|s| s.text.is_empty()) {
            continue;
        }
        content.begin_text();
        let mut cur_font: Option<(FontRole, f32)> = None;
        let mut td_x = 0.0_f32;
        let mut td_y = 0.0_f32;

        for segment in &line.segments {
            if segment.text.is_empty() {
                continue;
            }
            if cur_font != Some((segment.role, segment.font_size)) {
                let entry = fonts.get(segment.role);
                content.set_font(Name(entry.pdf_name.as_bytes()), segment.font_size);
                cur_font = Some((segment.role, segment.font_size));
            }
            content.next_line(segment.x - td_x, line.baseline - td_y);
            td_x = segment.x;
            td_y = line.baseline;
            content.show(Str(&to_winansi_bytes(&segment.text)));
        }
        content.end_text();
    }
}

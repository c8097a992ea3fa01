mod common;

use common::{Fixture, number, three_docs};
use lopdf::Document;
use tocmerge_pdf::{PAGE_HEIGHT_MM, TocConfig, build, mm_to_pt};

fn media_box(doc: &Document, page: u32) -> [f32; 4] {
    let id = doc.get_pages()[&page];
    let dict = doc.get_object(id).unwrap().as_dict().unwrap();
    let mb = dict.get(b"MediaBox").unwrap().as_array().unwrap();
    [number(&mb[0]), number(&mb[1]), number(&mb[2]), number(&mb[3])]
}

#[test]
fn toc_pages_use_configured_width_and_content_keeps_its_own() {
    let fixture = Fixture::new(&three_docs());
    for width_mm in [210.0, 297.0] {
        let config = TocConfig {
            page_width_mm: width_mm,
            ..TocConfig::default()
        };
        let report = build(
            &fixture.set,
            &fixture.output_in(&format!("w{width_mm}")),
            &config,
        )
        .unwrap();
        let doc = Document::load(&report.output).unwrap();

        println!("{:<8} {:>10} {:>10}", "page", "width", "height");
        for page in 1..=report.total_pages {
            let mb = media_box(&doc, page);
            println!("{page:<8} {:>10.2} {:>10.2}", mb[2], mb[3]);
        }

        for page in 1..=report.toc_page_count {
            let mb = media_box(&doc, page);
            assert!((mb[2] - mm_to_pt(width_mm)).abs() < 0.01);
            assert!((mb[3] - mm_to_pt(PAGE_HEIGHT_MM)).abs() < 0.01);
        }
        for page in report.toc_page_count + 1..=report.total_pages {
            assert_eq!(media_box(&doc, page), [0.0, 0.0, 612.0, 792.0]);
        }
    }
}

#[test]
fn page_count_is_toc_plus_content() {
    let fixture = Fixture::new(&three_docs());
    let report = build(&fixture.set, &fixture.paths(), &TocConfig::default()).unwrap();
    let doc = Document::load(&report.output).unwrap();
    assert_eq!(
        doc.get_pages().len() as u32,
        report.toc_page_count + report.content_map.total_pages()
    );
}

use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::model::SectionScheme;

const MM_PER_INCH: f32 = 25.4;
const PT_PER_INCH: f32 = 72.0;

pub fn mm_to_pt(mm: f32) -> f32 {
    mm / MM_PER_INCH * PT_PER_INCH
}

/// A4 height; the page geometry is fixed apart from its width.
pub const PAGE_HEIGHT_MM: f32 = 297.0;

pub const DEFAULT_TITLE: &str = "Table of Contents";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PassMode {
    /// One measurement pass with placeholder numbers, trusted as-is.
    DryRun,
    /// Re-run the final pass until the TOC page count stops changing.
    #[default]
    FixedPoint,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LinkStyle {
    #[default]
    Invisible,
    /// Thin blue underline drawn by the viewer from the annotation border.
    Underline,
}

#[derive(Clone, Debug)]
pub struct TocConfig {
    pub page_width_mm: f32,
    pub margin_mm: f32,
    pub font_size: f32,
    pub header_font_size: f32,
    pub title_font_size: f32,
    pub line_height_mm: f32,
    pub title: String,
    /// Family name looked up in the system font directories; Helvetica when unset or not found.
    pub font_family: Option<String>,
    pub scheme: SectionScheme,
    pub pass_mode: PassMode,
    pub link_style: LinkStyle,
}

impl Default for TocConfig {
    fn default() -> Self {
        Self {
            page_width_mm: 210.0,
            margin_mm: 15.0,
            font_size: 8.0,
            header_font_size: 10.0,
            title_font_size: 12.0,
            line_height_mm: 6.0,
            title: DEFAULT_TITLE.to_string(),
            font_family: None,
            scheme: SectionScheme::default(),
            pass_mode: PassMode::default(),
            link_style: LinkStyle::default(),
        }
    }
}

impl TocConfig {
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |msg: &str| Err(Error::InvalidConfig(msg.to_string()));
        if !(self.page_width_mm > 0.0) {
            return invalid("page width must be positive");
        }
        if !(self.margin_mm >= 0.0) {
            return invalid("margin cannot be negative");
        }
        if !(self.font_size > 0.0) {
            return invalid("font size must be positive");
        }
        if !(self.header_font_size > 0.0) {
            return invalid("header font size must be positive");
        }
        if !(self.title_font_size > 0.0) {
            return invalid("title font size must be positive");
        }
        if !(self.line_height_mm > 0.0) {
            return invalid("line height must be positive");
        }
        if self.content_width_mm() <= 0.0 {
            return invalid("margins leave no content width");
        }
        if PAGE_HEIGHT_MM - 2.0 * self.margin_mm < self.line_height_mm {
            return invalid("margins leave no room for a single line");
        }
        Ok(())
    }

    pub fn content_width_mm(&self) -> f32 {
        self.page_width_mm - 2.0 * self.margin_mm
    }

    pub(crate) fn geometry(&self) -> PageGeometry {
        PageGeometry {
            width: mm_to_pt(self.page_width_mm),
            height: mm_to_pt(PAGE_HEIGHT_MM),
            margin: mm_to_pt(self.margin_mm),
            line_height: mm_to_pt(self.line_height_mm),
        }
    }
}

/// Page geometry in points.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct PageGeometry {
    pub(crate) width: f32,
    pub(crate) height: f32,
    pub(crate) margin: f32,
    pub(crate) line_height: f32,
}

impl PageGeometry {
    pub(crate) fn content_width(&self) -> f32 {
        self.width - 2.0 * self.margin
    }

    pub(crate) fn right_edge(&self) -> f32 {
        self.width - self.margin
    }
}

/// Where the pipeline reads converted PDFs and writes its artifacts.
#[derive(Clone, Debug)]
pub struct Paths {
    pub pdf_folder: PathBuf,
    pub output_folder: PathBuf,
    pub final_output: String,
    pub intermediate_toc: String,
    pub intermediate_combined: String,
    pub keep_intermediates: bool,
}

impl Paths {
    pub fn new(pdf_folder: impl Into<PathBuf>, output_folder: impl Into<PathBuf>) -> Self {
        Self {
            pdf_folder: pdf_folder.into(),
            output_folder: output_folder.into(),
            final_output: "final_document_with_toc.pdf".to_string(),
            intermediate_toc: "_toc_intermediate.pdf".to_string(),
            intermediate_combined: "_combined_content.pdf".to_string(),
            keep_intermediates: false,
        }
    }

    pub fn final_output_path(&self) -> PathBuf {
        self.output_folder.join(&self.final_output)
    }

    pub fn toc_path(&self) -> PathBuf {
        self.output_folder.join(&self.intermediate_toc)
    }

    pub fn combined_path(&self) -> PathBuf {
        self.output_folder.join(&self.intermediate_combined)
    }

    /// The bridge artifact sits next to the TOC PDF.
    pub fn bridge_path(&self) -> PathBuf {
        bridge_path_for(&self.toc_path())
    }
}

pub fn bridge_path_for(toc_pdf: &Path) -> PathBuf {
    toc_pdf.with_extension("json")
}

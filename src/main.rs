use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tocmerge_pdf::{DocumentSet, LinkStyle, PassMode, Paths, SectionScheme, TocConfig};

#[derive(Parser, Debug)]
#[command(version, about = "Merge per-document PDFs behind a linked table of contents")]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Assemble the documents of a manifest into one PDF with a TOC and outline
    Build(BuildArgs),
    /// Attach links and outline to previously rendered TOC and content PDFs
    Annotate(AnnotateArgs),
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// JSON list of {file, title, section, section_name}
    #[arg(long)]
    manifest: PathBuf,

    /// Folder holding one <file stem>.pdf per document
    #[arg(long)]
    pdf_folder: PathBuf,

    #[arg(long)]
    output_folder: PathBuf,

    #[arg(long, default_value = "final_document_with_toc.pdf")]
    output_filename: String,

    /// Keep the TOC, bridge and combined-content artifacts
    #[arg(long)]
    keep_intermediates: bool,

    #[command(flatten)]
    layout: LayoutArgs,
}

#[derive(Args, Debug)]
struct AnnotateArgs {
    /// TOC PDF; its bridge is read from the same path with a .json extension
    #[arg(long)]
    toc: PathBuf,

    #[arg(long)]
    content: PathBuf,

    #[arg(long)]
    output: PathBuf,

    #[arg(long)]
    manifest: PathBuf,

    #[command(flatten)]
    layout: LayoutArgs,
}

#[derive(Args, Debug)]
struct LayoutArgs {
    /// Page width in millimetres
    #[arg(long, default_value_t = 210.0)]
    page_width: f32,

    /// Margin in millimetres
    #[arg(long, default_value_t = 15.0)]
    margin: f32,

    #[arg(long, default_value_t = 8.0)]
    font_size: f32,

    #[arg(long, default_value_t = 10.0)]
    header_font_size: f32,

    #[arg(long, default_value = tocmerge_pdf::DEFAULT_TITLE)]
    title: String,

    /// TrueType family looked up in the system font folders and TOCMERGE_FONTS
    #[arg(long)]
    font_family: Option<String>,

    #[arg(long, value_enum, default_value_t = SchemeArg::Dotted)]
    section_scheme: SchemeArg,

    /// Trust the single measurement pass instead of iterating to a stable page count
    #[arg(long)]
    dry_run_pagination: bool,

    #[arg(long, value_enum, default_value_t = LinkStyleArg::Invisible)]
    link_style: LinkStyleArg,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SchemeArg {
    Plain,
    Dotted,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LinkStyleArg {
    Invisible,
    Underline,
}

impl LayoutArgs {
    fn to_config(&self) -> TocConfig {
        TocConfig {
            page_width_mm: self.page_width,
            margin_mm: self.margin,
            font_size: self.font_size,
            header_font_size: self.header_font_size,
            title: self.title.clone(),
            font_family: self.font_family.clone(),
            scheme: match self.section_scheme {
                SchemeArg::Plain => SectionScheme::Plain,
                SchemeArg::Dotted => SectionScheme::Dotted,
            },
            pass_mode: if self.dry_run_pagination {
                PassMode::DryRun
            } else {
                PassMode::FixedPoint
            },
            link_style: match self.link_style {
                LinkStyleArg::Invisible => LinkStyle::Invisible,
                LinkStyleArg::Underline => LinkStyle::Underline,
            },
            ..TocConfig::default()
        }
    }
}

fn run(command: Command) -> Result<(), tocmerge_pdf::Error> {
    match command {
        Command::Build(args) => {
            let set = DocumentSet::from_manifest(&args.manifest)?;
            let config = args.layout.to_config();
            let mut paths = Paths::new(args.pdf_folder, args.output_folder);
            paths.final_output = args.output_filename;
            paths.keep_intermediates = args.keep_intermediates;

            let report = tocmerge_pdf::build(&set, &paths, &config)?;
            for skipped in &report.skipped {
                eprintln!("skipped {}: {}", skipped.file, skipped.reason);
            }
            println!(
                "Wrote {} ({} pages, {} TOC, {} links, {} bookmarks)",
                report.output.display(),
                report.total_pages,
                report.toc_page_count,
                report.links.attached,
                report.bookmarks.len(),
            );
        }
        Command::Annotate(args) => {
            let set = DocumentSet::from_manifest(&args.manifest)?;
            let config = args.layout.to_config();
            let links =
                tocmerge_pdf::annotate(&args.toc, &args.content, &args.output, &set, &config)?;
            println!(
                "Wrote {} ({} links, {} missed)",
                args.output.display(),
                links.attached,
                links.missed,
            );
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

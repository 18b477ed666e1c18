//! litwriter - EPUB to Microsoft Reader LIT converter

use std::process::ExitCode;

use clap::Parser;

use litwriter::{Book, read_epub, write_lit};

#[derive(Parser)]
#[command(name = "litwriter")]
#[command(version, about = "EPUB to Microsoft Reader LIT converter", long_about = None)]
#[command(after_help = "EXAMPLES:
    litwriter book.epub book.lit    Convert EPUB to LIT
    litwriter -i book.epub          Show book metadata")]
struct Cli {
    /// Input file (EPUB)
    #[arg(value_name = "INPUT")]
    input: String,

    /// Output file (LIT)
    #[arg(value_name = "OUTPUT", required_unless_present = "info")]
    output: Option<String>,

    /// Show book metadata without converting
    #[arg(short, long)]
    info: bool,

    /// Suppress warnings
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.quiet { "error" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let result = match (&cli.output, cli.info) {
        (_, true) => show_info(&cli.input),
        (Some(output), false) => convert(&cli.input, output, cli.quiet),
        (None, false) => Err("output file required".to_string()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn show_info(path: &str) -> Result<(), String> {
    let book = read_epub(path).map_err(|e| e.to_string())?;
    print_info(path, &book);
    Ok(())
}

fn print_info(path: &str, book: &Book) {
    let meta = &book.metadata;
    println!("File: {path}");
    println!("Title: {}", meta.title);
    if !meta.authors.is_empty() {
        println!("Authors: {}", meta.authors.join(", "));
    }
    if !meta.language.is_empty() {
        println!("Language: {}", meta.language);
    }
    if let Some(ref publisher) = meta.publisher {
        println!("Publisher: {publisher}");
    }
    if let Some(ref desc) = meta.description {
        let desc = desc.trim();
        match desc.char_indices().nth(200) {
            Some((cut, _)) => println!("Description: {}...", &desc[..cut]),
            None => println!("Description: {desc}"),
        }
    }
    if let Some(ref cover) = meta.cover {
        println!("Cover: {cover}");
    }
    println!("Spine items: {}", book.spine.len());
    println!("Manifest items: {}", book.manifest.len());
    println!("Guide references: {}", book.guide.len());
}

fn convert(input: &str, output: &str, quiet: bool) -> Result<(), String> {
    let mut book = read_epub(input).map_err(|e| e.to_string())?;
    write_lit(&mut book, output).map_err(|e| e.to_string())?;
    if !quiet {
        println!("{input} -> {output}");
    }
    Ok(())
}

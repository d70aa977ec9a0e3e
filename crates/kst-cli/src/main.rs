//! KiCad Symbol Templater CLI
//!
//! Command-line tool for generating KiCad symbol libraries from spreadsheets
//! of template overrides, and for turning libraries back into spreadsheets.

use clap::{Parser, Subcommand};
use kst_core::{KicadCodec, LibraryCodec, Spreadsheet, TemplateCache};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kicad-symbol-templater")]
#[command(about = "Derive KiCad symbol library from a common template", long_about = None)]
#[command(version)]
struct Cli {
    /// Log debug output (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new spreadsheet from a KiCad symbol
    New {
        /// Symbol library to extract template symbol from
        #[arg(short, long, requires = "symbol")]
        library: Option<String>,

        /// Name of symbol to extract from provided library for templating
        #[arg(short, long, requires = "library")]
        symbol: Option<String>,

        /// File to output spreadsheet to
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Generate KiCad symbol library from spreadsheet
    Generate {
        /// Path to input spreadsheet with parameters
        #[arg(short, long)]
        input: PathBuf,

        /// File to output KiCad symbol library to
        #[arg(short, long)]
        output: String,
    },

    /// Create a spreadsheet from an existing KiCad symbol library
    Import {
        /// Symbol library to import
        #[arg(short, long)]
        library: String,

        /// File to output spreadsheet to
        #[arg(short, long)]
        output: PathBuf,
    },

    /// List the symbols of a KiCad symbol library
    Show {
        /// Symbol library to list
        #[arg(short, long)]
        library: String,

        /// Print symbols as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run(command: Commands) -> kst_core::Result<()> {
    match command {
        Commands::New {
            library,
            symbol,
            output,
        } => cmd_new(library.as_deref(), symbol.as_deref(), &output),
        Commands::Generate { input, output } => cmd_generate(&input, &output),
        Commands::Import { library, output } => cmd_import(&library, &output),
        Commands::Show { library, json } => cmd_show(&library, json),
    }
}

fn cmd_new(library: Option<&str>, symbol: Option<&str>, output: &Path) -> kst_core::Result<()> {
    let codec = KicadCodec;
    let mut cache = TemplateCache::new(&codec);
    let mut spreadsheet = Spreadsheet::new();

    if let (Some(library), Some(symbol)) = (library, symbol) {
        spreadsheet.add_defaults(&mut cache, library, symbol)?;
    }

    spreadsheet.write_path(output)?;

    println!("Created spreadsheet: {}", output.display());
    println!("Columns: {}", spreadsheet.columns().join(", "));
    println!();
    println!("Add one row per symbol, then run:");
    println!(
        "  kicad-symbol-templater generate --input {} --output <library.kicad_sym>",
        output.display()
    );

    Ok(())
}

fn cmd_generate(input: &Path, output: &str) -> kst_core::Result<()> {
    let codec = KicadCodec;
    let mut cache = TemplateCache::new(&codec);
    let mut spreadsheet = Spreadsheet::new();

    let errors = spreadsheet.read_path(input, &mut cache)?;
    let written = spreadsheet.write_library(&codec, output)?;

    println!(
        "Generated {} symbols from {} rows ({} templates) into {}",
        written,
        spreadsheet.len(),
        spreadsheet.templates.len(),
        output
    );

    if !errors.is_empty() {
        println!("\nSkipped rows ({}):", errors.len());
        for error in &errors {
            println!("  {}", error);
        }
    }

    Ok(())
}

fn cmd_import(library: &str, output: &Path) -> kst_core::Result<()> {
    let spreadsheet = Spreadsheet::import(&KicadCodec, library)?;
    spreadsheet.write_path(output)?;

    println!(
        "Imported {} symbols ({} templates) from {} into {}",
        spreadsheet.len(),
        spreadsheet.templates.len(),
        library,
        output.display()
    );

    Ok(())
}

fn cmd_show(library: &str, json: bool) -> kst_core::Result<()> {
    let symbols = KicadCodec.load(library)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&symbols)?);
        return Ok(());
    }

    println!("Library: {}", library);
    println!("Symbols: {}", symbols.len());
    println!();

    for symbol in &symbols {
        match &symbol.extends {
            Some(base) => println!("{} (extends {})", symbol.name(), base),
            None => println!("{} ({} units)", symbol.name(), symbol.units().len()),
        }
        for (key, value) in symbol.properties.iter() {
            println!("  {}\t{}", key, value);
        }
    }

    Ok(())
}

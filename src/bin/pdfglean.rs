//! CLI binary for pdfglean.
//!
//! A thin shim over the library crate: subcommands map onto the pipeline
//! operations and print either human-readable output or raw NDJSON events.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use pdfglean::{
    extract_images, run_batch, BatchRequest, GeminiFactory, ProgressEvent, WorkingSetStore,
    DEFAULT_MODEL, MERGED_DOWNLOAD_NAME,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Stage a PDF and extract its embedded images
  pdfglean extract scan.pdf

  # Show the extracted gallery
  pdfglean list

  # Run text extraction over every image (reads GEMINI_API_KEY)
  pdfglean ocr --prompt "Transcribe all text in this image."

  # Run over a subset with a specific model, streaming raw NDJSON
  pdfglean ocr --json --model gemini-1.5-pro img_1.png img_3.png

  # Delete images (and their derived text)
  pdfglean delete img_2.png img_4.png

  # Write the merged text to a file
  pdfglean download -o extracted.txt

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY     API key for the text-extraction model
  PDFGLEAN_WORKDIR   Working-set root directory (default ./workset)
"#;

/// Extract embedded PDF images and batch-run them through a multimodal model.
#[derive(Parser, Debug)]
#[command(
    name = "pdfglean",
    version,
    about = "Extract embedded PDF images and batch-extract their text with a multimodal model",
    arg_required_else_help = true,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Working-set root; uploads/, extracted_image/, extracted_text/ live under it.
    #[arg(long, global = true, env = "PDFGLEAN_WORKDIR", default_value = "./workset")]
    workdir: PathBuf,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stage a PDF upload and extract its embedded images (replacing any prior set).
    Extract {
        /// Path to the PDF file.
        pdf: PathBuf,
    },
    /// List the extracted images in gallery order.
    List,
    /// Delete images and their derived text artifacts.
    Delete {
        /// Image names as shown by `list`.
        names: Vec<String>,
    },
    /// Run the batch text-extraction job over extracted images.
    Ocr {
        /// Image names to process, in order. Defaults to the full gallery.
        names: Vec<String>,

        /// Prompt sent to the model alongside each image.
        #[arg(long, default_value = "Extract all text from this image.")]
        prompt: String,

        /// Model identifier.
        #[arg(long, env = "PDFGLEAN_MODEL", default_value = DEFAULT_MODEL)]
        model: String,

        /// API key for the model. Prefer the environment variable over the flag.
        #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
        api_key: String,

        /// Print raw NDJSON progress records instead of a progress bar.
        #[arg(long)]
        json: bool,
    },
    /// Write the merged text artifact to a file or stdout.
    Download {
        /// Output path; stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let store = WorkingSetStore::under_root(&cli.workdir);
    store.ensure_layout().context("Could not create working-set directories")?;

    match cli.command {
        Command::Extract { pdf } => cmd_extract(store, pdf).await,
        Command::List => cmd_list(&store),
        Command::Delete { names } => cmd_delete(&store, names),
        Command::Ocr {
            names,
            prompt,
            model,
            api_key,
            json,
        } => cmd_ocr(store, names, prompt, model, api_key, json).await,
        Command::Download { output } => cmd_download(&store, output),
    }
}

async fn cmd_extract(store: WorkingSetStore, pdf: PathBuf) -> Result<()> {
    let filename = pdf
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload.pdf")
        .to_string();
    let bytes = std::fs::read(&pdf).with_context(|| format!("Could not read {}", pdf.display()))?;
    let staged = store.stage_source(&filename, &bytes)?;

    // lopdf parsing is CPU-bound; keep it off the async executor.
    let extract_store = store.clone();
    let count = tokio::task::spawn_blocking(move || extract_images(&extract_store, &staged))
        .await
        .context("Extraction task panicked")??;

    if count > 0 {
        println!("{} Extracted {} images", green("✔"), bold(&count.to_string()));
        for name in store.list_images()? {
            println!("  {name}");
        }
    } else {
        println!("No images found in the PDF.");
    }
    Ok(())
}

fn cmd_list(store: &WorkingSetStore) -> Result<()> {
    let images = store.list_images()?;
    if images.is_empty() {
        println!("No extracted images. Run `pdfglean extract <pdf>` first.");
    } else {
        for name in images {
            let has_text = store.text_path(&name).exists();
            println!("{name}{}", if has_text { "  [text]" } else { "" });
        }
    }
    Ok(())
}

fn cmd_delete(store: &WorkingSetStore, names: Vec<String>) -> Result<()> {
    if names.is_empty() {
        println!("No images selected for deletion.");
        return Ok(());
    }
    let deleted = store.delete(&names);
    if deleted > 0 {
        println!("{} Deleted {} images", green("✔"), bold(&deleted.to_string()));
    } else {
        println!("No images deleted.");
    }
    Ok(())
}

async fn cmd_ocr(
    store: WorkingSetStore,
    names: Vec<String>,
    prompt: String,
    model: String,
    api_key: String,
    json: bool,
) -> Result<()> {
    let selection = if names.is_empty() {
        store.list_images()?
    } else {
        names
    };

    let request = BatchRequest::new(selection, prompt, api_key).with_model(model);
    let mut events = run_batch(store.clone(), Arc::new(GeminiFactory::default()), request)?;

    if json {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        while let Some(event) = events.next().await {
            handle
                .write_all(event.to_ndjson()?.as_bytes())
                .context("Failed to write to stdout")?;
            handle.flush().ok();
        }
        return Ok(());
    }

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} images  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  "),
    );
    bar.set_prefix("Extracting");
    bar.enable_steady_tick(Duration::from_millis(80));

    let mut failures = 0usize;
    while let Some(event) = events.next().await {
        render_event(&bar, &event, &mut failures);
    }
    bar.finish_and_clear();

    if store.merged_exists() {
        eprintln!(
            "{} Done ({} failures). Merged text: `pdfglean download`",
            if failures == 0 { green("✔") } else { red("⚠") },
            failures
        );
    }
    Ok(())
}

fn render_event(bar: &ProgressBar, event: &ProgressEvent, failures: &mut usize) {
    if let (Some(progress), Some(total)) = (event.progress, event.total) {
        if bar.length() != Some(total as u64) {
            bar.set_length(total as u64);
        }
        bar.set_position(progress as u64);
    }
    if let Some(ref name) = event.current_image {
        bar.set_message(name.clone());
    }
    if let Some(ref error) = event.error {
        *failures += 1;
        bar.println(format!("  {} {error}", red("✗")));
    }
    if event.is_terminal() {
        if let Some(ref status) = event.status {
            bar.println(format!("  {} {status}", green("✓")));
        }
    }
}

fn cmd_download(store: &WorkingSetStore, output: Option<PathBuf>) -> Result<()> {
    match store.read_merged()? {
        Some(bytes) => match output {
            Some(path) => {
                std::fs::write(&path, &bytes)
                    .with_context(|| format!("Could not write {}", path.display()))?;
                println!(
                    "{} Wrote {} bytes to {} (suggested name: {MERGED_DOWNLOAD_NAME})",
                    green("✔"),
                    bytes.len(),
                    bold(&path.display().to_string())
                );
                Ok(())
            }
            None => {
                io::stdout()
                    .write_all(&bytes)
                    .context("Failed to write to stdout")?;
                Ok(())
            }
        },
        None => {
            eprintln!("No merged text file found.");
            std::process::exit(1);
        }
    }
}

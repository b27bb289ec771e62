use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use yt_batch_downloader::core::models::{ItemOutcome, Metadata};
use yt_batch_downloader::core::dependencies::is_ytdlp_available;
use yt_batch_downloader::utils::formatting::{format_duration, format_file_size, format_view_count};
use yt_batch_downloader::utils::logging::init_tracing;
use yt_batch_downloader::{
    load_or_initialize_config, BatchRequest, BatchResult, BatchService, OutputSpec,
};

const USAGE: &str =
    "Usage: batch_cli <url> [video|audio] [quality|codec] [--select i,j,..] [--out DIR] [--zip]";

struct Args {
    url: String,
    kind: Option<String>,
    choice: Option<String>,
    select: Option<Vec<usize>>,
    out: Option<PathBuf>,
    force_archive: bool,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = parse_args(env::args().skip(1).collect())?;
    let config = load_or_initialize_config();
    init_tracing(Some(&config.logging.level));

    let output = match args.kind.as_deref() {
        None => config.default_output(false),
        Some(kind) => OutputSpec::from_choice(kind, args.choice.as_deref(), args.choice.as_deref())?,
    };

    if !is_ytdlp_available(&config.tools.ytdlp_path).await {
        bail!(
            "yt-dlp not found at {:?}. Install it or set tools.ytdlp_path",
            config.tools.ytdlp_path
        );
    }

    let service = BatchService::from_config(&config)?;
    let metadata = service.preview(&args.url).await?;
    print_preview(&metadata);

    let items = match (&metadata, &args.select) {
        (Metadata::Playlist(playlist), Some(positions)) => playlist.select(positions),
        _ => metadata.clone().into_items(),
    };
    let destination = args
        .out
        .unwrap_or_else(|| config.download.output_directory.clone());
    let request = BatchRequest::new(items, output, destination)
        .with_archive(args.force_archive || config.download.force_archive);

    println!("Downloading {} item(s) as {}", request.items.len(), request.output);
    let handle = service.start_batch(request)?;

    let result = loop {
        if let Some(result) = handle.get_result() {
            break result;
        }
        let progress = handle.poll_progress();
        println!(
            "  [{:>5.1}%] {:?} {}",
            progress.percent, progress.phase, progress.message
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
    };

    print_result(&result?);
    Ok(())
}

fn parse_args(raw: Vec<String>) -> Result<Args> {
    let mut positional = Vec::new();
    let mut select = None;
    let mut out = None;
    let mut force_archive = false;

    let mut iter = raw.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--select" => {
                let value = iter.next().context("--select needs a list of positions")?;
                let positions = value
                    .split(',')
                    .map(|p| p.trim().parse::<usize>())
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .with_context(|| format!("Invalid selection: {}", value))?;
                select = Some(positions);
            }
            "--out" => {
                out = Some(PathBuf::from(
                    iter.next().context("--out needs a directory")?,
                ));
            }
            "--zip" => force_archive = true,
            "-h" | "--help" => bail!(USAGE),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let Some(url) = positional.next() else {
        bail!(USAGE);
    };

    Ok(Args {
        url,
        kind: positional.next(),
        choice: positional.next(),
        select,
        out,
        force_archive,
    })
}

fn print_preview(metadata: &Metadata) {
    match metadata {
        Metadata::Video(video) => {
            println!(
                "Video: {} ({}, {})",
                video.title,
                video.display_duration(),
                format_view_count(video.view_count)
            );
        }
        Metadata::Playlist(playlist) => {
            println!("Playlist: {} ({} videos)", playlist.title, playlist.entries.len());
            for (position, entry) in playlist.entries.iter().enumerate() {
                println!(
                    "  {:>3}. {} [{}]",
                    position,
                    entry.title,
                    format_duration(entry.duration_secs)
                );
            }
        }
    }
}

fn print_result(result: &BatchResult) {
    println!("{}", result.status_message());

    for item in &result.items {
        match &item.outcome {
            ItemOutcome::Success { file_name } => {
                println!("  ok    #{} {} -> {}", item.index, item.descriptor.title, file_name)
            }
            ItemOutcome::Failed { kind, reason } => {
                println!("  fail  #{} {}: {} ({})", item.index, item.descriptor.title, kind, reason)
            }
        }
    }

    if let Some(artifact) = &result.artifact {
        println!(
            "Saved {} ({})",
            artifact.path.display(),
            format_file_size(artifact.size_bytes)
        );
    }
}

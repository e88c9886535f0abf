use std::fs::{File, create_dir_all};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use sevenz_rust2::decompress_file;

#[derive(Parser)]
#[command(version, about = "Dataset helpers for speculo")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Downloads a face dataset archive
    DownloadDataset {
        url: String,
        #[arg(default_value = "dataset/faces.7z")]
        output: String,
    },
    /// Extracts a downloaded archive, expecting the split layout with a `Front` directory
    ExtractDataset {
        #[arg(default_value = "dataset/faces.7z")]
        archive: String,
        #[arg(default_value = "dataset")]
        dest: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::DownloadDataset { url, output } => {
            println!("downloading {} to {}", url, output);
            download(&url, Path::new(&output))?;
            println!("download finished: {}", output);
        }
        Commands::ExtractDataset { archive, dest } => {
            println!("extracting {} to {}", archive, dest);
            extract_7z(Path::new(&archive), Path::new(&dest))?;
            println!("extracted {} to {}", archive, dest);
        }
    }
    Ok(())
}

fn download(url: &str, output: &Path) -> anyhow::Result<()> {
    if let Some(parent) = output.parent() {
        create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let client = Client::builder().timeout(Duration::from_secs(300)).build()?;

    let mut response = client.get(url).send()?;
    if !response.status().is_success() {
        bail!("server answered {}", response.status());
    }

    let pb = ProgressBar::new(response.content_length().unwrap_or(0));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{wide_bar} {bytes}/{total_bytes} ({eta})")?
            .progress_chars("##-"),
    );

    let mut dest =
        File::create(output).with_context(|| format!("failed to create {}", output.display()))?;
    let mut buffer = [0; 8192];
    let mut downloaded = 0;
    loop {
        let n = response.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        dest.write_all(&buffer[..n])?;
        downloaded += n as u64;
        pb.set_position(downloaded);
    }

    pb.finish();
    Ok(())
}

fn extract_7z(archive: &Path, dest: &Path) -> anyhow::Result<()> {
    create_dir_all(dest)?;
    println!("this may take a while...");
    decompress_file(archive, dest)
        .with_context(|| format!("failed to extract {}", archive.display()))?;
    Ok(())
}

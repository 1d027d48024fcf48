use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;

use gif2ppm::image;
use gif2ppm::ppm_writer::{self, PpmFormat};
use gif2ppm::Decoder;

#[derive(Parser)]
#[command(name = "gif2ppm", about = "Convert a GIF image to PPM")]
struct Cli {
    /// Input file, must end in .gif
    input: PathBuf,
    /// Output file, must end in .ppm
    output: PathBuf,
    /// Write a plain text P3 file instead of a binary P6 one
    #[arg(long)]
    ascii: bool,
    /// Comment line to put in the PPM header
    #[arg(long)]
    comment: Option<String>,
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if !has_extension(&cli.input, "gif") {
        bail!("input file must be a .gif file");
    }
    if !has_extension(&cli.output, "ppm") {
        bail!("output file must be a .ppm file");
    }

    let file = File::open(&cli.input)
        .with_context(|| format!("cannot open input file {}", cli.input.display()))?;
    let mut reader = BufReader::new(file);

    let mut parser = Decoder::new(&mut reader);
    parser
        .parse()
        .with_context(|| format!("cannot decode {}", cli.input.display()))?;
    info!(
        "{} frame(s), version {:?}",
        parser.frames().len(),
        parser.version()
    );

    let canvas = image::render(&parser)?;

    let format = if cli.ascii {
        PpmFormat::Ascii
    } else {
        PpmFormat::Binary
    };
    ppm_writer::save_ppm(&cli.output, &canvas, format, cli.comment.as_deref())?;

    println!("Done!!");
    Ok(())
}

use clap::Parser;
use regex::Regex;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "flac2mp3")]
#[command(author, version, about = "Transcode FLAC files to MP3, preserving tags")]
pub struct Cli {
    /// Files and/or directories to transcode
    #[arg(value_name = "FILES", required = true)]
    pub files: Vec<PathBuf>,

    /// Directory to output transcoded files to
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Skip transcoding files if the output file already exists
    #[arg(short, long)]
    pub skip_existing: bool,

    /// Number of files to transcode at once (defaults to the number of CPUs)
    #[arg(short = 'n', long, value_parser = clap::value_parser!(u16).range(1..))]
    pub num_threads: Option<u16>,

    /// Log output to a file as well as to the console
    #[arg(short, long)]
    pub logfile: Option<PathBuf>,

    /// Disable console output
    #[arg(short, long)]
    pub quiet: bool,

    /// Copy files whose paths match this pattern into the output directory
    #[arg(short, long, value_parser = parse_pattern, requires = "output_dir")]
    pub copy_pattern: Option<Regex>,

    /// Follow symbolic links while looking for files
    #[arg(short, long)]
    pub follow_links: bool,

    /// lame VBR quality, 0 (best) to 9
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=9))]
    pub vbr_quality: Option<u8>,

    /// Path to settings file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

fn parse_pattern(s: &str) -> Result<Regex, regex::Error> {
    Regex::new(s)
}

//! kunquat CLI: render a composition directory to a WAV file.
//!
//! Usage:
//!   kq-cli path/to/composition -o out.wav
//!   kq-cli path/to/composition --song 1 --rate 44100 --max-length 30 -v

use std::fs;
use std::path::{Path, PathBuf};
use std::process::exit;

use clap::Parser;
use log::{debug, warn, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use walkdir::WalkDir;

use kq_handle::{Handle, Report, WavFormat};

#[derive(Parser, Debug)]
#[command(name = "kq-cli", about = "Render a kunquat composition to WAV")]
struct Args {
    /// Composition directory; file paths below it are store keys
    input: PathBuf,

    /// Output WAV file
    #[arg(short, long, default_value = "out.wav")]
    output: PathBuf,

    /// Album track to render
    #[arg(short, long, default_value_t = 0)]
    song: usize,

    /// Audio rate in Hz
    #[arg(short, long, default_value_t = 48000)]
    rate: u32,

    /// Frames rendered per call
    #[arg(long, default_value_t = 4096)]
    buffer_size: usize,

    /// Start position in seconds
    #[arg(long, default_value_t = 0.0)]
    start: f64,

    /// Stop after this many seconds
    #[arg(long, default_value_t = 600.0)]
    max_length: f64,

    /// Write 32-bit float samples instead of 16-bit integers
    #[arg(long)]
    float: bool,

    /// Log engine activity
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let _ = TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto);

    let mut handle = Handle::new(args.rate).unwrap_or_else(|e| fail(&e));
    handle.set_buffer_size(args.buffer_size).unwrap_or_else(|e| fail(&e));

    let loaded = load_dir(&mut handle, &args.input).unwrap_or_else(|e| fail(&e));
    println!("Loaded {} keys from {}", loaded, args.input.display());

    handle.validate().unwrap_or_else(|e| fail(&e));
    let duration = handle.get_duration(args.song).unwrap_or_else(|e| fail(&e));
    println!("Song {}: {:.3} s", args.song, duration as f64 / 1e9);

    let wav = render(&mut handle, &args).unwrap_or_else(|e| fail(&e));
    fs::write(&args.output, &wav).unwrap_or_else(|e| {
        eprintln!("Failed to write {}: {}", args.output.display(), e);
        exit(1);
    });
    println!("Wrote {} bytes to {}", wav.len(), args.output.display());
}

fn fail(e: &kq_ir::Error) -> ! {
    eprintln!("{}", e.report().to_json());
    exit(1);
}

/// Store every file below `dir` under its relative path, in one
/// transaction. Files whose paths are not store keys are skipped.
fn load_dir(handle: &mut Handle, dir: &Path) -> kq_ir::Result<usize> {
    if !dir.is_dir() {
        return Err(kq_ir::Error::resource(format!("{} is not a directory", dir.display())));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| kq_ir::Error::resource(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(dir) else { continue };
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if kq_store::validate_key(&key).is_err() {
            warn!("skipping {}: not a store key", key);
            continue;
        }
        if key.ends_with(".wv") {
            warn!("skipping {}: WavPack samples must be decoded by the caller", key);
            continue;
        }
        files.push((key, entry.into_path()));
    }

    handle.transaction(
        |p| {
            debug!("staged {} ({} so far)", p.key, p.staged);
            Ok(())
        },
        |tx| {
            for (key, path) in &files {
                let bytes = fs::read(path).map_err(|e| kq_ir::Error::resource(format!("{}: {}", path.display(), e)))?;
                tx.put(key, &bytes)?;
            }
            Ok(files.len())
        },
    )
}

fn render(handle: &mut Handle, args: &Args) -> kq_ir::Result<Vec<u8>> {
    let format = if args.float {
        WavFormat::Float32
    } else {
        WavFormat::Int16
    };
    if args.start <= 0.0 {
        println!("Rendering at {} Hz...", args.rate);
        return handle.render_to_wav(args.song, args.max_length, format);
    }

    let start = (args.start * 1e9) as i64;
    handle.set_position(args.song, start)?;
    println!("Rendering from {:.3} s at {} Hz...", args.start, args.rate);
    let max_frames = (args.max_length.max(0.0) * args.rate as f64) as usize;
    let (mut left, mut right) = (Vec::new(), Vec::new());
    while left.len() < max_frames {
        let want = (max_frames - left.len()).min(handle.buffer_size());
        if handle.play(want)? == 0 {
            break;
        }
        left.extend_from_slice(handle.get_buffer(0));
        right.extend_from_slice(handle.get_buffer(1));
    }
    let mut out = Vec::new();
    kq_handle::write_wav(&mut out, &left, &right, args.rate, format)
        .map_err(|e| kq_ir::Error::resource(e.to_string()))?;
    Ok(out)
}

//! seda CLI
//!
//! Pack a directory into a self-extracting archive, run one, or list it.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use seda::archive::{CommandSpec, EntryKind, Platform, TypeTag};
use seda::extract::resolve_passphrase;
use seda::{Decoder, ExtractOptions, IgnoreConfig, PackOptions, SedaError};
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "seda")]
#[command(version)]
#[command(about = "Self-extracting document archives")]
struct Cli {
    /// Verbose output (-v progress, -vv debug logging)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pack a directory into an archive
    Pack {
        /// Directory to pack
        source: PathBuf,

        /// Output base name; the type extension is appended (default: source name)
        output: Option<PathBuf>,

        /// Commit message (makes a commit or smartpatch archive)
        #[arg(short, long, conflicts_with = "message_file")]
        message: Option<String>,

        /// Read the commit message from a file
        #[arg(long)]
        message_file: Option<PathBuf>,

        /// Command to run after extraction (repeatable)
        #[arg(long = "command")]
        commands: Vec<String>,

        /// Command that only runs on POSIX hosts
        #[arg(long = "command-posix")]
        commands_posix: Vec<String>,

        /// Command that only runs on Windows hosts
        #[arg(long = "command-windows")]
        commands_windows: Vec<String>,

        /// Encrypt the payload (passphrase from SEDA_PASSPHRASE or prompt)
        #[arg(long)]
        vault: bool,

        /// Produce an HTML page with the archive embedded
        #[arg(long)]
        web: bool,

        /// Extra directory names to ignore, comma separated
        #[arg(long, value_delimiter = ',')]
        ignore_dirs: Vec<String>,

        /// Extra extensions to ignore, comma separated
        #[arg(long, value_delimiter = ',')]
        ignore_exts: Vec<String>,

        /// Extra extensions to always store as binary, comma separated
        #[arg(long, value_delimiter = ',')]
        binary_exts: Vec<String>,

        /// Include existing .seda archives in the payload
        #[arg(long)]
        recursive_pack_seda: bool,
    },

    /// Extract an archive and run its post-extraction behavior
    #[command(visible_alias = "x")]
    Run {
        /// Archive to run
        archive: PathBuf,

        /// Directory to extract to
        #[arg(short = 'C', long, default_value = ".")]
        directory: PathBuf,
    },

    /// List the contents of an archive
    #[command(visible_alias = "t")]
    List {
        /// Archive to list
        archive: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            let code = err
                .chain()
                .find_map(|cause| cause.downcast_ref::<SedaError>())
                .map(SedaError::exit_code)
                .unwrap_or(1);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let verbose = cli.verbose > 0;
    match cli.command {
        Commands::Pack {
            source,
            output,
            message,
            message_file,
            commands,
            commands_posix,
            commands_windows,
            vault,
            web,
            ignore_dirs,
            ignore_exts,
            binary_exts,
            recursive_pack_seda,
        } => {
            let message = match message_file {
                Some(path) => Some(
                    fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read message file: {}", path.display()))?,
                ),
                None => message,
            };

            let commands = commands
                .into_iter()
                .map(CommandSpec::new)
                .chain(commands_posix.into_iter().map(|c| CommandSpec::for_platform(c, Platform::Posix)))
                .chain(commands_windows.into_iter().map(|c| CommandSpec::for_platform(c, Platform::Windows)))
                .collect();

            let passphrase = if vault {
                Some(resolve_passphrase(TypeTag::Vault, None, std::io::stdin().is_terminal())?)
            } else {
                None
            };

            let options = PackOptions {
                message,
                commands,
                passphrase,
                web,
                ignore: IgnoreConfig::default()
                    .with_ignore_dirs(ignore_dirs)
                    .with_ignore_extensions(ignore_exts)
                    .with_binary_extensions(binary_exts)
                    .with_recursive_pack_seda(recursive_pack_seda),
            };
            pack_archive(&source, output, &options, verbose)
        }
        Commands::Run { archive, directory } => run_archive(&archive, directory, verbose),
        Commands::List { archive } => list_archive(&archive, verbose),
    }
}

fn pack_archive(source: &Path, output: Option<PathBuf>, options: &PackOptions, verbose: bool) -> Result<()> {
    let output = match output {
        Some(output) => output,
        None => {
            let source = fs::canonicalize(source)
                .with_context(|| format!("Failed to resolve source: {}", source.display()))?;
            PathBuf::from(source.file_name().unwrap_or(std::ffi::OsStr::new("archive")))
        }
    };

    let report = seda::pack(source, &output, options)
        .with_context(|| format!("Failed to pack {}", source.display()))?;

    if verbose {
        for (path, kind, size) in &report.added {
            if *kind == EntryKind::Directory {
                println!("Added: {}/", path);
            } else {
                println!("Added: {} ({} bytes)", path, size);
            }
        }
        for (path, reason) in &report.skipped {
            println!("Skipped: {} ({:?})", path, reason);
        }
    }
    println!(
        "Created: {} ({} archive, {} entries)",
        report.output.display(),
        report.kind,
        report.added.len()
    );

    Ok(())
}

fn run_archive(archive: &Path, directory: PathBuf, verbose: bool) -> Result<()> {
    let options = ExtractOptions::new(directory).with_interactive(std::io::stdin().is_terminal());
    let report = seda::extract_file(archive, &options)
        .with_context(|| format!("Failed to run {}", archive.display()))?;

    if verbose {
        for dir in &report.directories {
            println!("Extracted: {}/", dir);
        }
        for file in &report.files {
            println!("Extracted: {}", file);
        }
        for command in &report.commands_run {
            println!("Ran: {}", command);
        }
    }
    if let Some(path) = &report.message_path {
        println!("Commit message written to {}", path.display());
    }

    Ok(())
}

fn list_archive(archive: &Path, verbose: bool) -> Result<()> {
    let content =
        fs::read_to_string(archive).with_context(|| format!("Failed to read: {}", archive.display()))?;

    let info = Decoder::new()
        .read_header(&content)
        .with_context(|| format!("Failed to read header of {}", archive.display()))?;
    if info.header.kind == TypeTag::Vault {
        println!("type: {} (code {})", info.header.kind, info.header.kind.code());
        println!("(payload encrypted)");
        return Ok(());
    }

    let decoded = Decoder::new()
        .decode(&content)
        .with_context(|| format!("Failed to decode {}", archive.display()))?;
    let header = &decoded.header;

    println!("type: {} (code {})", header.kind, header.kind.code());
    if let Some(message) = &header.message {
        println!("message: {}", message.lines().next().unwrap_or_default());
    }
    for command in &header.commands {
        println!("{}: {}", command.header_key(), command.command);
    }

    for entry in &decoded.entries {
        if verbose {
            let kind = match entry.kind {
                EntryKind::Text => "text",
                EntryKind::Binary => "binary",
                EntryKind::Directory => "dir",
            };
            println!("{}  {}  {}", entry.path, kind, entry.data.len());
        } else {
            println!("{}", entry.path);
        }
    }

    Ok(())
}

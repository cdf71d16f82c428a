//! Extraction engine: runs the stage plan of an archive's type tag
//!
//! ```text
//! Start → AwaitPassphrase? → Decode → WriteFiles → EmitMessage? → RunCommands? → Validate? → Done
//! ```
//!
//! Every entry is decoded before the first file is written, so a corrupt
//! archive leaves the destination untouched. Files that already exist at the
//! destination are **overwritten unconditionally**; there is no merge or
//! conflict detection. Re-extracting the same archive is idempotent.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::archive::{Archive, CommandSpec, TypeTag, COMMIT_MESSAGE_FILE};
use crate::decoder::Decoder;
use crate::dispatch::{self, Behavior, Stage};
use crate::error::{Result, SedaError};
use crate::vault::PASSPHRASE_ENV;

/// Name the SmartPatch message is held under until validation passes
const PENDING_MESSAGE_FILE: &str = ".commit_msg.txt.pending";

/// Where and how to extract
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub dest: PathBuf,
    /// Vault passphrase; falls back to `SEDA_PASSPHRASE`, then a prompt
    pub passphrase: Option<String>,
    /// Prompt on the terminal when no passphrase is available
    pub interactive: bool,
}

impl ExtractOptions {
    pub fn new(dest: impl Into<PathBuf>) -> Self {
        Self {
            dest: dest.into(),
            passphrase: None,
            interactive: false,
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }
}

/// What an extraction did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionReport {
    pub kind: TypeTag,
    pub dest: PathBuf,
    pub files: Vec<String>,
    pub directories: Vec<String>,
    pub commands_run: Vec<String>,
    /// Published commit message, if any
    pub message_path: Option<PathBuf>,
    /// Stages that completed, in order
    pub stages: Vec<Stage>,
}

/// Extract the archive stored at `path`
pub fn extract_file(path: &Path, options: &ExtractOptions) -> Result<ExtractionReport> {
    let input = fs::read_to_string(path).map_err(|e| SedaError::io(path, e))?;
    log::info!("extracting '{}' into '{}'", path.display(), options.dest.display());
    extract(&input, options)
}

/// Extract an archive held in memory into `options.dest`
pub fn extract(input: &str, options: &ExtractOptions) -> Result<ExtractionReport> {
    let info = Decoder::new().read_header(input)?;
    let kind = info.header.kind;

    let mut run = Extraction {
        input,
        options,
        kind,
        passphrase: None,
        archive: None,
        pending_message: None,
        command_failure: None,
        report: ExtractionReport {
            kind,
            dest: options.dest.clone(),
            files: Vec::new(),
            directories: Vec::new(),
            commands_run: Vec::new(),
            message_path: None,
            stages: Vec::new(),
        },
    };

    for stage in dispatch::plan(kind) {
        log::debug!("{} archive: {:?}", kind, stage);
        run.step(stage)?;
        run.report.stages.push(stage);
    }

    log::info!(
        "extracted {} files and {} directories from {} archive",
        run.report.files.len(),
        run.report.directories.len(),
        kind
    );
    Ok(run.report)
}

struct Extraction<'a> {
    input: &'a str,
    options: &'a ExtractOptions,
    kind: TypeTag,
    passphrase: Option<String>,
    archive: Option<Archive>,
    pending_message: Option<PathBuf>,
    command_failure: Option<String>,
    report: ExtractionReport,
}

impl Extraction<'_> {
    fn step(&mut self, stage: Stage) -> Result<()> {
        match stage {
            Stage::Start | Stage::Done => Ok(()),
            Stage::AwaitPassphrase => {
                self.passphrase = Some(resolve_passphrase(
                    self.kind,
                    self.options.passphrase.as_deref(),
                    self.options.interactive,
                )?);
                Ok(())
            }
            Stage::Decode => {
                let mut decoder = Decoder::new();
                if let Some(passphrase) = &self.passphrase {
                    decoder = decoder.with_passphrase(passphrase.clone());
                }
                self.archive = Some(decoder.decode(self.input)?);
                Ok(())
            }
            Stage::WriteFiles => self.write_files(),
            Stage::EmitMessage => self.emit_message(),
            Stage::RunCommands => match self.run_commands() {
                Err(err) if dispatch::has_behavior(self.kind, Behavior::Validate) => {
                    log::warn!("{}", err);
                    self.command_failure = Some(err.to_string());
                    Ok(())
                }
                other => other,
            },
            Stage::Validate => self.validate(),
        }
    }

    fn archive(&self) -> Result<&Archive> {
        self.archive
            .as_ref()
            .ok_or_else(|| SedaError::corrupt("archive used before it was decoded"))
    }

    fn write_files(&mut self) -> Result<()> {
        let dest = self.options.dest.clone();
        fs::create_dir_all(&dest).map_err(|e| SedaError::io(&dest, e))?;

        let archive = self.archive()?;
        let mut files = Vec::new();
        let mut directories = Vec::new();

        for entry in &archive.entries {
            let target = dest.join(&entry.path);
            if entry.is_dir() {
                fs::create_dir_all(&target).map_err(|e| SedaError::io(&target, e))?;
                directories.push(entry.path.clone());
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| SedaError::io(parent, e))?;
            }
            fs::write(&target, &entry.data).map_err(|e| SedaError::io(&target, e))?;
            log::debug!("wrote {} ({} bytes)", entry.path, entry.data.len());
            files.push(entry.path.clone());
        }

        self.report.files = files;
        self.report.directories = directories;
        Ok(())
    }

    fn emit_message(&mut self) -> Result<()> {
        let message = match &self.archive()?.header.message {
            Some(message) => format!("{}\n", message),
            None => return Err(SedaError::corrupt(format!("{} archive without a message", self.kind))),
        };

        if dispatch::has_behavior(self.kind, Behavior::Validate) {
            let pending = self.options.dest.join(PENDING_MESSAGE_FILE);
            fs::write(&pending, message).map_err(|e| SedaError::io(&pending, e))?;
            self.pending_message = Some(pending);
        } else {
            let path = self.options.dest.join(COMMIT_MESSAGE_FILE);
            fs::write(&path, message).map_err(|e| SedaError::io(&path, e))?;
            log::info!("wrote commit message to '{}'", path.display());
            self.report.message_path = Some(path);
        }
        Ok(())
    }

    fn run_commands(&mut self) -> Result<()> {
        let commands: Vec<CommandSpec> = self.archive()?.header.current_commands().cloned().collect();
        for spec in commands {
            run_command(self.kind, &spec.command, &self.options.dest)?;
            self.report.commands_run.push(spec.command);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let reason = match self.command_failure.take() {
            Some(failure) => Some(failure),
            None => self.missing_entry()?.map(|path| format!("entry '{}' missing after commands", path)),
        };

        let pending = self.pending_message.take();
        if let Some(reason) = reason {
            if let Some(pending) = pending {
                remove_if_exists(&pending)?;
            }
            // A message published by an earlier run must not outlive this failure
            remove_if_exists(&self.options.dest.join(COMMIT_MESSAGE_FILE))?;
            return Err(SedaError::ValidationFailed {
                kind: self.kind,
                reason,
            });
        }

        if let Some(pending) = pending {
            let path = self.options.dest.join(COMMIT_MESSAGE_FILE);
            fs::rename(&pending, &path).map_err(|e| SedaError::io(&path, e))?;
            log::info!("validation passed, wrote commit message to '{}'", path.display());
            self.report.message_path = Some(path);
        }
        Ok(())
    }

    fn missing_entry(&self) -> Result<Option<String>> {
        let archive = self.archive()?;
        Ok(archive
            .entries
            .iter()
            .find(|entry| {
                let target = self.options.dest.join(&entry.path);
                if entry.is_dir() {
                    !target.is_dir()
                } else {
                    !target.is_file()
                }
            })
            .map(|entry| entry.path.clone()))
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(SedaError::io(path, e)),
        _ => Ok(()),
    }
}

/// Passphrase from the caller, then `SEDA_PASSPHRASE`, then the terminal
pub fn resolve_passphrase(kind: TypeTag, supplied: Option<&str>, interactive: bool) -> Result<String> {
    if let Some(passphrase) = supplied {
        return Ok(passphrase.to_string());
    }
    if let Ok(passphrase) = std::env::var(PASSPHRASE_ENV) {
        log::debug!("using passphrase from {}", PASSPHRASE_ENV);
        return Ok(passphrase);
    }
    if interactive {
        return rpassword::prompt_password(format!("Passphrase for {} archive: ", kind))
            .map_err(|e| SedaError::io("<terminal>", e));
    }
    Err(SedaError::PassphraseRequired { kind })
}

/// Run one command through the system shell inside `dir`
pub fn run_command(kind: TypeTag, command: &str, dir: &Path) -> Result<()> {
    log::info!("running `{}`", command);

    let mut process = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };

    let failure = |code| SedaError::CommandFailure {
        kind,
        command: command.to_string(),
        code,
    };

    let status = process.current_dir(dir).status().map_err(|e| {
        log::error!("failed to spawn `{}`: {}", command, e);
        failure(None)
    })?;
    if !status.success() {
        return Err(failure(status.code()));
    }
    Ok(())
}

//! Archive data structures

use std::fmt;

use crate::error::{Result, SedaError};

// Carrier format constants
pub const MARKER_PREFIX: &str = "-- ";
pub const MARKER_SUFFIX: &str = " --";
pub const BASE64_TAG: &str = "[.base64]";
pub const DIR_TAG: &str = "[.dir]";
pub const ESCAPED_TAG: &str = "[.escaped]";
pub const NOEOL_TAG: &str = "[.noeol]";
pub const VAULT_TAG: &str = "[.vault]";
/// Trailer tag prefix, completed by the entry count: `[.end:N]`
pub const END_TAG_PREFIX: &str = "[.end:";

/// Current carrier format version, written as `seda-format`
pub const FORMAT_VERSION: u32 = 2;

/// First line of every plain archive; makes the artifact directly executable
pub const SHEBANG: &str = "#!/usr/bin/env -S seda run";

/// File written by EmitMessage in the extraction directory
pub const COMMIT_MESSAGE_FILE: &str = "commit_msg.txt";

/// Declared behavior class of an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// Type 0: plain extraction
    Core,
    /// Type 1: extraction followed by setup commands
    Construct,
    /// Type 2: encrypted payload, passphrase required
    Vault,
    /// Type 3: HTML polyglot, readable by a browser and by the runtime
    Web,
    /// Type 5: extraction plus commit message file
    Commit,
    /// Type 1+5: Construct + Commit, message gated on validation
    SmartPatch,
}

impl TypeTag {
    pub const ALL: [TypeTag; 6] = [
        TypeTag::Core,
        TypeTag::Construct,
        TypeTag::Vault,
        TypeTag::Web,
        TypeTag::Commit,
        TypeTag::SmartPatch,
    ];

    /// Machine-readable name used in the `seda-type` header field
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Core => "core",
            TypeTag::Construct => "construct",
            TypeTag::Vault => "vault",
            TypeTag::Web => "web",
            TypeTag::Commit => "commit",
            TypeTag::SmartPatch => "smartpatch",
        }
    }

    /// Historical numeric type code
    pub fn code(self) -> &'static str {
        match self {
            TypeTag::Core => "0",
            TypeTag::Construct => "1",
            TypeTag::Vault => "2",
            TypeTag::Web => "3",
            TypeTag::Commit => "5",
            TypeTag::SmartPatch => "1+5",
        }
    }

    /// Functional file extension. The suffix predicts post-extraction behavior.
    pub fn extension(self) -> &'static str {
        match self {
            TypeTag::Core => ".seda",
            TypeTag::Construct => ".construct.seda",
            TypeTag::Vault => ".vault.seda",
            TypeTag::Web => ".seda.html",
            TypeTag::Commit => ".commit.seda",
            TypeTag::SmartPatch => ".smartpatch.seda",
        }
    }

    /// Parse a `seda-type` value. Accepts the name or the numeric code.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        TypeTag::ALL
            .iter()
            .copied()
            .find(|tag| tag.name() == value || tag.code() == value)
            .ok_or_else(|| SedaError::UnknownType(value.to_string()))
    }

    /// Tag implied by a file name's functional extension, if any
    pub fn from_file_name(name: &str) -> Option<Self> {
        // Longest suffixes first so `.commit.seda` is not read as `.seda`
        let mut tags = TypeTag::ALL;
        tags.sort_by_key(|tag| std::cmp::Reverse(tag.extension().len()));
        tags.into_iter().find(|tag| name.ends_with(tag.extension()))
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Platform a post-extraction command is restricted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Any,
    Posix,
    Windows,
}

impl Platform {
    /// Whether commands for this platform run on the current host
    pub fn is_current(self) -> bool {
        match self {
            Platform::Any => true,
            Platform::Posix => cfg!(unix),
            Platform::Windows => cfg!(windows),
        }
    }

    fn header_suffix(self) -> &'static str {
        match self {
            Platform::Any => "",
            Platform::Posix => "[posix]",
            Platform::Windows => "[windows]",
        }
    }
}

/// A post-extraction command declared in the header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub command: String,
    pub platform: Platform,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            platform: Platform::Any,
        }
    }

    pub fn for_platform(command: impl Into<String>, platform: Platform) -> Self {
        Self {
            command: command.into(),
            platform,
        }
    }

    /// Header field key for this command (`seda-command`, `seda-command[posix]`, ...)
    pub fn header_key(&self) -> String {
        format!("seda-command{}", self.platform.header_suffix())
    }

    /// Parse a header key back into a platform
    pub fn platform_from_key(key: &str) -> Option<Platform> {
        match key {
            "seda-command" => Some(Platform::Any),
            "seda-command[posix]" => Some(Platform::Posix),
            "seda-command[windows]" => Some(Platform::Windows),
            _ => None,
        }
    }
}

/// Header block: message, type tag, commands and format version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub format_version: u32,
    pub kind: TypeTag,
    /// Human-readable message (the "docstring"); trailing newlines are not kept
    pub message: Option<String>,
    pub commands: Vec<CommandSpec>,
}

impl ArchiveHeader {
    pub fn new(kind: TypeTag) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            kind,
            message: None,
            commands: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        let trimmed = message.trim_end_matches(['\n', '\r']);
        self.message = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        self
    }

    pub fn with_commands(mut self, commands: Vec<CommandSpec>) -> Self {
        self.commands = commands;
        self
    }

    /// Commands that apply to the current platform, in declaration order
    pub fn current_commands(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.iter().filter(|c| c.platform.is_current())
    }
}

/// What an entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Text,
    Binary,
    Directory,
}

/// A decoded archive entry: relative path plus exact bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Slash-separated relative path
    pub path: String,
    pub kind: EntryKind,
    /// Exact file content; always empty for directories
    pub data: Vec<u8>,
}

impl Entry {
    pub fn text(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Text,
            data: data.into(),
        }
    }

    pub fn binary(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Binary,
            data: data.into(),
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Directory,
            data: Vec::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// A SEDA archive: header plus ordered entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    pub header: ArchiveHeader,
    pub entries: Vec<Entry>,
}

impl Archive {
    pub fn new(kind: TypeTag) -> Self {
        Self::with_header(ArchiveHeader::new(kind))
    }

    pub fn with_header(header: ArchiveHeader) -> Self {
        Self {
            header,
            entries: Vec::new(),
        }
    }

    pub fn kind(&self) -> TypeTag {
        self.header.kind
    }

    /// Add an entry. Fails on an invalid path or a duplicate path.
    pub fn add_entry(&mut self, entry: Entry) -> Result<()> {
        validate_entry_path(&entry.path)?;
        if self.entries.iter().any(|e| e.path == entry.path) {
            return Err(SedaError::corrupt(format!("duplicate entry '{}'", entry.path)));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn files(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| !e.is_dir())
    }

    pub fn directories(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| e.is_dir())
    }

    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.path == path)
    }
}

/// Why `path` cannot be an entry path, if it cannot: empty, absolute,
/// drive-prefixed, or containing `.`/`..`/empty segments. A backslash is an
/// ordinary name character, but `.`/`..` between backslashes still count as
/// relative segments.
pub fn entry_path_problem(path: &str) -> Option<&'static str> {
    if path.is_empty() {
        return Some("empty");
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Some("absolute path");
    }
    let first = path.split('/').next().unwrap_or(path);
    if let [drive, b':'] = first.as_bytes() {
        if drive.is_ascii_alphabetic() {
            return Some("drive prefix");
        }
    }
    if path.split('/').any(str::is_empty) {
        return Some("empty segment");
    }
    if path.split(['/', '\\']).any(|seg| seg == "." || seg == "..") {
        return Some("relative segment");
    }
    None
}

/// Reject paths that could not have come from a packed tree
pub fn validate_entry_path(path: &str) -> Result<()> {
    match entry_path_problem(path) {
        Some(why) => Err(SedaError::corrupt(format!("invalid entry path '{}': {}", path, why))),
        None => Ok(()),
    }
}

/// Percent-encode the characters that are structural in a marker line
pub fn encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '%' | '[' | ']' | '<' | '>' | '\\' => push_escaped(&mut out, c),
            c if c.is_control() => push_escaped(&mut out, c),
            c => out.push(c),
        }
    }
    out
}

fn push_escaped(out: &mut String, c: char) {
    let mut buf = [0u8; 4];
    for b in c.encode_utf8(&mut buf).bytes() {
        out.push_str(&format!("%{:02X}", b));
    }
}

/// Inverse of [`encode_path`]
pub fn decode_path(encoded: &str) -> Result<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded
                .get(i + 1..i + 3)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| SedaError::corrupt(format!("bad escape in path '{}'", encoded)))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| SedaError::corrupt(format!("path '{}' is not UTF-8", encoded)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_extensions_are_distinct() {
        for a in TypeTag::ALL {
            for b in TypeTag::ALL {
                if a != b {
                    assert_ne!(a.extension(), b.extension());
                }
            }
        }
    }

    #[test]
    fn test_type_tag_parse_name_and_code() {
        assert_eq!(TypeTag::parse("smartpatch").unwrap(), TypeTag::SmartPatch);
        assert_eq!(TypeTag::parse("1+5").unwrap(), TypeTag::SmartPatch);
        assert_eq!(TypeTag::parse("5").unwrap(), TypeTag::Commit);
        assert!(matches!(TypeTag::parse("4"), Err(SedaError::UnknownType(_))));
        assert!(matches!(TypeTag::parse("Commit"), Err(SedaError::UnknownType(_))));
    }

    #[test]
    fn test_type_tag_from_file_name() {
        assert_eq!(TypeTag::from_file_name("fix.commit.seda"), Some(TypeTag::Commit));
        assert_eq!(TypeTag::from_file_name("fix.smartpatch.seda"), Some(TypeTag::SmartPatch));
        assert_eq!(TypeTag::from_file_name("site.seda.html"), Some(TypeTag::Web));
        assert_eq!(TypeTag::from_file_name("project.seda"), Some(TypeTag::Core));
        assert_eq!(TypeTag::from_file_name("notes.txt"), None);
    }

    #[test]
    fn test_header_message_drops_trailing_newlines() {
        let header = ArchiveHeader::new(TypeTag::Commit).with_message("Fix bug\n\nDetails\n\n");
        assert_eq!(header.message.as_deref(), Some("Fix bug\n\nDetails"));

        let header = ArchiveHeader::new(TypeTag::Core).with_message("\n");
        assert!(header.message.is_none());
    }

    #[test]
    fn test_command_header_keys() {
        assert_eq!(CommandSpec::new("make").header_key(), "seda-command");
        let posix = CommandSpec::for_platform("./x.sh", Platform::Posix);
        assert_eq!(posix.header_key(), "seda-command[posix]");
        assert_eq!(CommandSpec::platform_from_key("seda-command[windows]"), Some(Platform::Windows));
        assert_eq!(CommandSpec::platform_from_key("seda-commands"), None);
    }

    #[test]
    fn test_add_entry_rejects_duplicates_and_bad_paths() {
        let mut archive = Archive::new(TypeTag::Core);
        archive.add_entry(Entry::text("a.txt", "x")).unwrap();
        assert!(archive.add_entry(Entry::text("a.txt", "y")).is_err());
        assert!(archive.add_entry(Entry::text("../evil", "y")).is_err());
        assert!(archive.add_entry(Entry::text("/etc/passwd", "y")).is_err());
        assert!(archive.add_entry(Entry::text("a//b", "y")).is_err());
        assert!(archive.add_entry(Entry::text("C:/x", "y")).is_err());
        assert!(archive.add_entry(Entry::text("c:", "y")).is_err());
        assert!(archive.add_entry(Entry::text("\\\\server\\share", "y")).is_err());
        assert!(archive.add_entry(Entry::text("a\\..\\b", "y")).is_err());
        assert_eq!(archive.entries.len(), 1);
    }

    #[test]
    fn test_colon_and_backslash_names_are_valid() {
        for path in ["a:b.txt", "dir/a:b", "a\\b.txt", "notes/x:", "1:/y"] {
            assert_eq!(entry_path_problem(path), None, "{}", path);
        }

        let encoded = encode_path("a\\b.txt");
        assert_eq!(encoded, "a%5Cb.txt");
        assert_eq!(decode_path(&encoded).unwrap(), "a\\b.txt");
    }

    #[test]
    fn test_path_codec_escapes_structural_characters() {
        let path = "pages/[id]/100%<b>.tsx";
        let encoded = encode_path(path);
        assert_eq!(encoded, "pages/%5Bid%5D/100%25%3Cb%3E.tsx");
        assert_eq!(decode_path(&encoded).unwrap(), path);

        let unicode = "docs/файл 文件.md";
        assert_eq!(encode_path(unicode), unicode);

        let control = "odd\nname";
        assert_eq!(decode_path(&encode_path(control)).unwrap(), control);
    }

    #[test]
    fn test_decode_path_rejects_bad_escape() {
        assert!(decode_path("a%zz").is_err());
        assert!(decode_path("a%4").is_err());
    }
}

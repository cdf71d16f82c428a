//! SEDA archive decoder
//!
//! The artifact only names its format version; the matching payload decoder
//! lives here, selected by [`Format::from_version`].

use base64::Engine;

use crate::archive::{
    decode_path, Archive, ArchiveHeader, CommandSpec, Entry, TypeTag, BASE64_TAG,
    DIR_TAG, END_TAG_PREFIX, ESCAPED_TAG, MARKER_PREFIX, MARKER_SUFFIX, NOEOL_TAG, VAULT_TAG,
};
use crate::encoder::{WEB_PAYLOAD_CLOSE, WEB_PAYLOAD_OPEN};
use crate::error::{Result, SedaError};
use crate::escape;
use crate::vault::{self, VaultParams};

/// Carrier format versions this runtime can decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Marker-line payload with escaped text, base64 binaries and a counted trailer
    V2,
}

impl Format {
    pub fn from_version(version: &str) -> Result<Self> {
        match version.trim() {
            "2" => Ok(Format::V2),
            other => Err(SedaError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Decode the payload block (first marker through the trailer)
    pub fn decode_payload(self, payload: &str) -> Result<Vec<Entry>> {
        match self {
            Format::V2 => decode_payload_v2(payload),
        }
    }
}

/// Parsed header block, before the payload is touched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderInfo {
    pub format: Format,
    pub header: ArchiveHeader,
    /// Present for vault archives
    pub vault: Option<VaultParams>,
}

/// Decodes a SEDA archive
pub struct Decoder {
    passphrase: Option<String>,
}

impl Decoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self { passphrase: None }
    }

    /// Passphrase for vault archives
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Read only the header block. The type tag of a vault archive stays
    /// legible, so this works without a passphrase.
    pub fn read_header(&self, input: &str) -> Result<HeaderInfo> {
        let (info, _) = split_archive(input)?;
        Ok(info)
    }

    /// Decode a complete archive. Nothing is returned unless every entry
    /// decodes, so a corrupt archive never yields partial content.
    pub fn decode(&self, input: &str) -> Result<Archive> {
        let (info, body) = split_archive(input)?;
        let HeaderInfo {
            format,
            header,
            vault: vault_params,
        } = info;

        let entries = match (header.kind, vault_params) {
            (TypeTag::Vault, Some(params)) => {
                let passphrase = self
                    .passphrase
                    .as_deref()
                    .ok_or(SedaError::PassphraseRequired { kind: TypeTag::Vault })?;
                let sealed = decode_vault_block(body.payload)?;
                let plaintext = vault::open(passphrase, &params, &sealed)?;
                let payload = String::from_utf8(plaintext)
                    .map_err(|_| SedaError::corrupt("decrypted payload is not UTF-8"))?;
                format.decode_payload(&payload)?
            }
            (TypeTag::Vault, None) => {
                return Err(SedaError::corrupt("vault archive without seda-vault header"));
            }
            (_, Some(_)) => {
                return Err(SedaError::corrupt(format!(
                    "seda-vault header on a {} archive",
                    header.kind
                )));
            }
            (_, None) => format.decode_payload(body.payload)?,
        };

        let mut archive = Archive::with_header(header);
        if let Some(message) = body.message {
            archive.header.message = Some(message);
        }
        check_header_matches_kind(&archive.header)?;

        for entry in entries {
            archive.add_entry(entry)?;
        }
        Ok(archive)
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Text after the header block, split at the first marker line
struct Body<'a> {
    message: Option<String>,
    payload: &'a str,
}

fn split_archive(input: &str) -> Result<(HeaderInfo, Body<'_>)> {
    let input = unwrap_web_envelope(input)?;

    let mut rest = input;
    if rest.starts_with("#!") {
        rest = rest.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
    }

    let mut fields = Vec::new();
    loop {
        let (line, tail) = rest
            .split_once('\n')
            .ok_or_else(|| SedaError::corrupt("header block is not terminated by a blank line"))?;
        rest = tail;
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            break;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| SedaError::corrupt(format!("malformed header line '{}'", line)))?;
        fields.push((key.trim(), value.trim()));
    }

    let info = parse_header_fields(&fields)?;
    let body = split_body(rest)?;
    if info.header.kind == TypeTag::Vault && body.message.is_some() {
        return Err(SedaError::corrupt("vault archive carries a plaintext message"));
    }
    Ok((info, body))
}

/// Web archives keep the carrier inside a `<script type="text/plain">` element
fn unwrap_web_envelope(input: &str) -> Result<&str> {
    if !input.trim_start().starts_with('<') {
        return Ok(input);
    }
    let start = input
        .find(WEB_PAYLOAD_OPEN)
        .ok_or_else(|| SedaError::corrupt("HTML file without a seda-payload element"))?;
    let inner = &input[start + WEB_PAYLOAD_OPEN.len()..];
    let inner = inner.strip_prefix('\n').unwrap_or(inner);
    let end = inner
        .find(WEB_PAYLOAD_CLOSE)
        .ok_or_else(|| SedaError::corrupt("seda-payload element is not closed"))?;
    Ok(&inner[..end])
}

fn parse_header_fields(fields: &[(&str, &str)]) -> Result<HeaderInfo> {
    let mut format = None;
    let mut kind = None;
    let mut commands = Vec::new();
    let mut vault_params = None;

    for &(key, value) in fields {
        match key {
            "seda-format" => {
                if format.replace(Format::from_version(value)?).is_some() {
                    return Err(SedaError::corrupt("duplicate seda-format header"));
                }
            }
            "seda-type" => {
                if kind.replace(TypeTag::parse(value)?).is_some() {
                    return Err(SedaError::corrupt("duplicate seda-type header"));
                }
            }
            "seda-vault" => {
                vault_params = Some(VaultParams::parse_header_value(value)?);
            }
            _ => match CommandSpec::platform_from_key(key) {
                Some(platform) => commands.push(CommandSpec::for_platform(value, platform)),
                None => log::warn!("ignoring unknown header field '{}'", key),
            },
        }
    }

    let format = format.ok_or_else(|| SedaError::corrupt("missing seda-format header (not a SEDA archive?)"))?;
    let kind = kind.ok_or_else(|| SedaError::UnknownType(String::new()))?;

    let header = ArchiveHeader {
        format_version: match format {
            Format::V2 => 2,
        },
        kind,
        message: None,
        commands,
    };
    Ok(HeaderInfo {
        format,
        header,
        vault: vault_params,
    })
}

fn split_body(text: &str) -> Result<Body<'_>> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.starts_with(MARKER_PREFIX) {
            break;
        }
        offset += line.len();
    }
    if offset == text.len() {
        return Err(SedaError::corrupt("archive has no payload (truncated?)"));
    }

    let raw_message = &text[..offset];
    let message = if raw_message.is_empty() {
        None
    } else {
        let raw = raw_message.strip_suffix('\n').unwrap_or(raw_message);
        Some(escape::unescape(raw))
    };
    Ok(Body {
        message,
        payload: &text[offset..],
    })
}

fn check_header_matches_kind(header: &ArchiveHeader) -> Result<()> {
    let kind = header.kind;
    let wants_message = matches!(kind, TypeTag::Commit | TypeTag::SmartPatch);
    let wants_commands = matches!(kind, TypeTag::Construct | TypeTag::SmartPatch);

    if wants_message && header.message.is_none() {
        return Err(SedaError::corrupt(format!("{} archive without a message", kind)));
    }
    if !wants_message && header.message.is_some() {
        return Err(SedaError::corrupt(format!("{} archive carries a message", kind)));
    }
    if wants_commands != !header.commands.is_empty() {
        return Err(SedaError::corrupt(format!(
            "{} archive {} commands",
            kind,
            if wants_commands { "declares no" } else { "declares" }
        )));
    }
    Ok(())
}

/// A parsed marker line
#[derive(Debug, Default, PartialEq, Eq)]
struct Marker {
    /// Empty for tag-only markers (trailer, vault block)
    path: String,
    binary: bool,
    dir: bool,
    escaped: bool,
    noeol: bool,
    vault: bool,
    end: Option<usize>,
}

/// Parse `-- name[.tag]... --`. Paths are percent-encoded, so the first
/// `[` always starts the tag list.
fn parse_marker(line: &str) -> Result<Marker> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let line = line.strip_suffix('\r').unwrap_or(line);
    let inner = line
        .strip_prefix(MARKER_PREFIX)
        .and_then(|l| l.strip_suffix(MARKER_SUFFIX))
        .ok_or_else(|| SedaError::corrupt(format!("malformed marker line '{}'", line)))?;

    let (name, mut tags) = match inner.find('[') {
        Some(i) => (&inner[..i], &inner[i..]),
        None => (inner, ""),
    };

    let mut marker = Marker {
        path: decode_path(name)?,
        ..Default::default()
    };

    while !tags.is_empty() {
        let end = tags
            .find(']')
            .ok_or_else(|| SedaError::corrupt(format!("unterminated tag in marker '{}'", line)))?;
        let tag = &tags[..=end];
        match tag {
            BASE64_TAG => marker.binary = true,
            DIR_TAG => marker.dir = true,
            ESCAPED_TAG => marker.escaped = true,
            NOEOL_TAG => marker.noeol = true,
            VAULT_TAG => marker.vault = true,
            _ => {
                let count = tag
                    .strip_prefix(END_TAG_PREFIX)
                    .and_then(|t| t.strip_suffix(']'))
                    .and_then(|n| n.parse::<usize>().ok())
                    .ok_or_else(|| SedaError::corrupt(format!("unknown tag '{}' in marker", tag)))?;
                marker.end = Some(count);
            }
        }
        tags = &tags[end + 1..];
    }

    let is_tag_only = marker.vault || marker.end.is_some();
    if is_tag_only != marker.path.is_empty() {
        return Err(SedaError::corrupt(format!("malformed marker line '{}'", line)));
    }
    if (marker.binary as u8 + marker.dir as u8 + (marker.escaped || marker.noeol) as u8) > 1 {
        return Err(SedaError::corrupt(format!("conflicting tags in marker '{}'", line)));
    }
    Ok(marker)
}

fn decode_vault_block(payload: &str) -> Result<Vec<u8>> {
    let (first, rest) = payload.split_once('\n').unwrap_or((payload, ""));
    let marker = parse_marker(first)?;
    if !marker.vault {
        return Err(SedaError::corrupt("vault archive without a [.vault] block"));
    }
    decode_base64(rest, "vault payload")
}

fn decode_base64(body: &str, what: &str) -> Result<Vec<u8>> {
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| SedaError::corrupt(format!("bad base64 in {}: {}", what, e)))
}

fn decode_payload_v2(payload: &str) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut current: Option<(Marker, String)> = None;
    let mut expected = None;

    for line in payload.split_inclusive('\n') {
        if expected.is_some() {
            if line.trim().is_empty() {
                continue;
            }
            return Err(SedaError::corrupt("content after the archive trailer"));
        }

        if line.starts_with(MARKER_PREFIX) {
            if let Some((marker, body)) = current.take() {
                entries.push(finish_entry(marker, body)?);
            }
            let marker = parse_marker(line)?;
            if marker.vault {
                return Err(SedaError::corrupt("unexpected [.vault] block in payload"));
            }
            match marker.end {
                Some(count) => expected = Some(count),
                None => current = Some((marker, String::new())),
            }
            continue;
        }

        match current {
            Some((_, ref mut body)) => body.push_str(line),
            None => return Err(SedaError::corrupt("payload does not start with a marker line")),
        }
    }

    let expected = expected.ok_or_else(|| SedaError::corrupt("missing archive trailer (truncated?)"))?;
    if expected != entries.len() {
        return Err(SedaError::corrupt(format!(
            "trailer declares {} entries but {} were found",
            expected,
            entries.len()
        )));
    }
    Ok(entries)
}

fn finish_entry(marker: Marker, body: String) -> Result<Entry> {
    if marker.dir {
        if !body.trim().is_empty() {
            return Err(SedaError::corrupt(format!("directory entry '{}' has content", marker.path)));
        }
        return Ok(Entry::directory(marker.path));
    }

    if marker.binary {
        let data = decode_base64(&body, &format!("'{}'", marker.path))?;
        return Ok(Entry::binary(marker.path, data));
    }

    let mut text = body;
    if marker.noeol {
        if !text.ends_with('\n') {
            return Err(SedaError::corrupt(format!("text entry '{}' is truncated", marker.path)));
        }
        text.pop();
    }
    if marker.escaped {
        text = escape::unescape(&text);
    }
    Ok(Entry::text(marker.path, text.into_bytes()))
}

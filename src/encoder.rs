//! SEDA archive encoder

use base64::Engine;

use crate::archive::{
    encode_path, Archive, Entry, EntryKind, TypeTag, BASE64_TAG, DIR_TAG, END_TAG_PREFIX,
    ESCAPED_TAG, MARKER_PREFIX, MARKER_SUFFIX, NOEOL_TAG, SHEBANG, VAULT_TAG,
};
use crate::error::{Result, SedaError};
use crate::escape;
use crate::vault::{self, VaultParams};

/// Column width of wrapped base64 blocks
pub const BASE64_LINE_WIDTH: usize = 76;

/// Suffixes stripped from a caller-supplied base name before the functional
/// extension is appended. `.py` covers archives from the v1 tooling.
const KNOWN_SUFFIXES: &[&str] = &[
    ".smartpatch.seda",
    ".construct.seda",
    ".commit.seda",
    ".vault.seda",
    ".seda.html",
    ".seda",
    ".py",
];

/// An entry ready for the carrier: escaped text, base64, or nothing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedEntry {
    pub path: String,
    pub kind: EntryKind,
    /// Carrier body without the trailing newline the block adds
    pub body: String,
    /// Reversal directive: body must be unescaped on decode
    pub escaped: bool,
    /// Original text had no final newline
    pub noeol: bool,
}

impl EncodedEntry {
    /// Marker line without its newline, e.g. `-- img/a.png[.base64] --`
    pub fn marker(&self) -> String {
        let mut marker = String::from(MARKER_PREFIX);
        marker.push_str(&encode_path(&self.path));
        match self.kind {
            EntryKind::Directory => marker.push_str(DIR_TAG),
            EntryKind::Binary => marker.push_str(BASE64_TAG),
            EntryKind::Text => {
                if self.escaped {
                    marker.push_str(ESCAPED_TAG);
                }
                if self.noeol {
                    marker.push_str(NOEOL_TAG);
                }
            }
        }
        marker.push_str(MARKER_SUFFIX);
        marker
    }
}

/// Encodes an archive into the SEDA carrier format
pub struct Encoder {
    passphrase: Option<String>,
    vault_params: Option<VaultParams>,
    /// File name shown in the web envelope's instructions
    display_name: Option<String>,
}

impl Encoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self {
            passphrase: None,
            vault_params: None,
            display_name: None,
        }
    }

    /// Passphrase used when the archive is a vault
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Fix the vault salt/nonce instead of drawing fresh random ones
    pub fn with_vault_params(mut self, params: VaultParams) -> Self {
        self.vault_params = Some(params);
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Encode one entry. Web archives store every file as base64 so nothing
    /// in the payload can close the surrounding `<script>` element.
    pub fn encode_entry(&self, entry: &Entry, force_base64: bool) -> Result<EncodedEntry> {
        let encoded = match entry.kind {
            EntryKind::Directory => EncodedEntry {
                path: entry.path.clone(),
                kind: EntryKind::Directory,
                body: String::new(),
                escaped: false,
                noeol: false,
            },
            EntryKind::Text if !force_base64 => match std::str::from_utf8(&entry.data) {
                Ok(text) => self.encode_text(&entry.path, text)?,
                Err(_) => {
                    log::debug!("'{}' is not valid UTF-8, storing as base64", entry.path);
                    self.encode_binary(&entry.path, &entry.data)
                }
            },
            EntryKind::Text | EntryKind::Binary => self.encode_binary(&entry.path, &entry.data),
        };
        Ok(encoded)
    }

    fn encode_text(&self, path: &str, text: &str) -> Result<EncodedEntry> {
        let result = escape::escape_if_needed(text);
        if escape::contains_delimiter(&result.text) {
            return Err(SedaError::DelimiterCollision {
                path: path.to_string(),
            });
        }
        if result.escaped {
            log::debug!("delimiter found in '{}', escaping", path);
        }
        Ok(EncodedEntry {
            path: path.to_string(),
            kind: EntryKind::Text,
            noeol: !text.is_empty() && !text.ends_with('\n'),
            body: result.text.into_owned(),
            escaped: result.escaped,
        })
    }

    fn encode_binary(&self, path: &str, data: &[u8]) -> EncodedEntry {
        EncodedEntry {
            path: path.to_string(),
            kind: EntryKind::Binary,
            body: wrap_base64(&base64::engine::general_purpose::STANDARD.encode(data)),
            escaped: false,
            noeol: false,
        }
    }

    /// Payload block: every entry followed by the `[.end:N]` trailer
    pub fn encode_payload(&self, archive: &Archive) -> Result<String> {
        let force_base64 = archive.kind() == TypeTag::Web;
        let mut output = String::new();

        for entry in &archive.entries {
            let encoded = self.encode_entry(entry, force_base64)?;
            output.push_str(&encoded.marker());
            output.push('\n');
            output.push_str(&encoded.body);
            if !encoded.body.is_empty() && !encoded.body.ends_with('\n') {
                output.push('\n');
            }
        }

        output.push_str(&format!(
            "{}{}{}]{}\n",
            MARKER_PREFIX,
            END_TAG_PREFIX,
            archive.entries.len(),
            MARKER_SUFFIX
        ));
        Ok(output)
    }

    /// Header fields, one `key: value` per line, ending with a blank line
    fn encode_header_fields(&self, archive: &Archive, extra: &[(String, String)]) -> String {
        let header = &archive.header;
        let mut output = String::new();
        output.push_str(&format!("seda-format: {}\n", header.format_version));
        output.push_str(&format!("seda-type: {}\n", header.kind));
        for command in &header.commands {
            output.push_str(&format!("{}: {}\n", command.header_key(), command.command));
        }
        for (key, value) in extra {
            output.push_str(&format!("{}: {}\n", key, value));
        }
        output.push('\n');
        output
    }

    fn encode_message(&self, archive: &Archive) -> String {
        match &archive.header.message {
            Some(message) => {
                let mut out = escape::escape(message);
                out.push('\n');
                out
            }
            None => String::new(),
        }
    }

    /// Encode an archive to a string
    pub fn encode(&self, archive: &Archive) -> Result<String> {
        self.check_header(archive)?;
        match archive.kind() {
            TypeTag::Vault => self.encode_vault(archive),
            TypeTag::Web => self.encode_web(archive),
            _ => {
                let mut output = format!("{}\n", SHEBANG);
                output.push_str(&self.encode_header_fields(archive, &[]));
                output.push_str(&self.encode_message(archive));
                output.push_str(&self.encode_payload(archive)?);
                Ok(output)
            }
        }
    }

    /// Header contents must agree with the tag before anything is rendered
    fn check_header(&self, archive: &Archive) -> Result<()> {
        let header = &archive.header;
        let kind = header.kind;
        let has_message = header.message.is_some();
        let has_commands = !header.commands.is_empty();

        let (needs_message, needs_commands) = match kind {
            TypeTag::Core | TypeTag::Vault | TypeTag::Web => (false, false),
            TypeTag::Commit => (true, false),
            TypeTag::Construct => (false, true),
            TypeTag::SmartPatch => (true, true),
        };
        if has_message != needs_message || has_commands != needs_commands {
            return Err(SedaError::UnsupportedCombination(format!(
                "{} archive with{} message and{} commands",
                kind,
                if has_message { "" } else { "out" },
                if has_commands { "" } else { "out" },
            )));
        }
        for command in &header.commands {
            if command.command.trim().is_empty() || command.command.contains(['\n', '\r']) {
                return Err(SedaError::UnsupportedCombination(format!(
                    "command {:?} must be a single non-empty line",
                    command.command
                )));
            }
        }
        Ok(())
    }

    fn encode_vault(&self, archive: &Archive) -> Result<String> {
        let passphrase = self
            .passphrase
            .as_deref()
            .ok_or(SedaError::PassphraseRequired { kind: TypeTag::Vault })?;
        let params = self.vault_params.clone().unwrap_or_else(VaultParams::generate);

        let payload = self.encode_payload(archive)?;
        let sealed = vault::seal(passphrase, &params, payload.as_bytes())?;

        let mut output = format!("{}\n", SHEBANG);
        output.push_str(&self.encode_header_fields(
            archive,
            &[("seda-vault".to_string(), params.to_header_value())],
        ));
        output.push_str(&format!("{}{}{}\n", MARKER_PREFIX, VAULT_TAG, MARKER_SUFFIX));
        output.push_str(&wrap_base64(&base64::engine::general_purpose::STANDARD.encode(sealed)));
        output.push('\n');
        Ok(output)
    }

    fn encode_web(&self, archive: &Archive) -> Result<String> {
        let mut payload = self.encode_header_fields(archive, &[]);
        payload.push_str(&self.encode_payload(archive)?);

        let run_hint = match &self.display_name {
            Some(name) => format!("seda run {}", html_text(name)),
            None => "seda run &lt;this file&gt;".to_string(),
        };

        let mut output = String::new();
        output.push_str(WEB_HEAD);
        output.push_str(&format!(
            "<p>Extract with <code>{}</code>, or download the files below.</p>\n",
            run_hint
        ));
        output.push_str("<ul id=\"seda-files\"></ul>\n");
        output.push_str(WEB_PAYLOAD_OPEN);
        output.push('\n');
        output.push_str(&payload);
        output.push_str(WEB_PAYLOAD_CLOSE);
        output.push('\n');
        output.push_str(WEB_SCRIPT);
        output.push_str("</body>\n</html>\n");
        Ok(output)
    }

    /// Encode an archive directly to a writer
    pub fn encode_to_writer<W: std::io::Write>(&self, archive: &Archive, mut writer: W) -> Result<()> {
        let encoded = self.encode(archive)?;
        writer
            .write_all(encoded.as_bytes())
            .map_err(|e| SedaError::io("<writer>", e))?;
        Ok(())
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Opening tag of the element that carries the payload in web archives
pub const WEB_PAYLOAD_OPEN: &str = "<script type=\"text/plain\" id=\"seda-payload\">";
pub const WEB_PAYLOAD_CLOSE: &str = "</script>";

const WEB_HEAD: &str = "<!DOCTYPE html>
<html lang=\"en\">
<head>
<meta charset=\"utf-8\">
<title>SEDA archive</title>
<style>body{font-family:sans-serif;max-width:48em;margin:2em auto}li{margin:.2em 0}</style>
</head>
<body>
<h1>SEDA archive</h1>
";

const WEB_SCRIPT: &str = r#"<script>
(function () {
  var text = document.getElementById("seda-payload").textContent;
  var list = document.getElementById("seda-files");
  var lines = text.split("\n");
  var current = null;
  var entries = [];
  function close() { if (current) { entries.push(current); current = null; } }
  for (var i = 0; i < lines.length; i++) {
    var m = /^-- (.*) --$/.exec(lines[i]);
    if (m) {
      close();
      var spec = m[1];
      var cut = spec.indexOf("[");
      var name = cut < 0 ? spec : spec.slice(0, cut);
      var tags = cut < 0 ? "" : spec.slice(cut);
      if (name === "") { continue; }
      current = { name: decodeURIComponent(name), dir: tags.indexOf("[.dir]") >= 0, body: [] };
    } else if (current) {
      current.body.push(lines[i]);
    }
  }
  close();
  entries.forEach(function (e) {
    var li = document.createElement("li");
    if (e.dir) {
      li.textContent = e.name + "/";
    } else {
      var raw = atob(e.body.join(""));
      var bytes = new Uint8Array(raw.length);
      for (var j = 0; j < raw.length; j++) { bytes[j] = raw.charCodeAt(j); }
      var a = document.createElement("a");
      a.href = URL.createObjectURL(new Blob([bytes]));
      a.download = e.name.split("/").pop();
      a.textContent = e.name + " (" + bytes.length + " bytes)";
      li.appendChild(a);
    }
    list.appendChild(li);
  });
})();
</script>
"#;

fn html_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn wrap_base64(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE_WIDTH + 1);
    // base64 output is ASCII, so byte chunks are char boundaries
    for chunk in encoded.as_bytes().chunks(BASE64_LINE_WIDTH) {
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push('\n');
    }
    out
}

/// Final archive file name for a base name and tag. Any known SEDA suffix
/// (case-insensitive) is stripped first so names never stack, e.g.
/// `fix.seda` with a commit tag becomes `fix.commit.seda`.
pub fn functional_name(base: &str, kind: TypeTag) -> String {
    let lower = base.to_ascii_lowercase();
    let stem = KNOWN_SUFFIXES
        .iter()
        .find(|suffix| lower.ends_with(*suffix) && lower.len() > suffix.len())
        .map(|suffix| &base[..base.len() - suffix.len()])
        .unwrap_or(base);
    format!("{}{}", stem, kind.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveHeader, CommandSpec, Platform};

    #[test]
    fn test_encode_simple_text() {
        let mut archive = Archive::new(TypeTag::Core);
        archive.add_entry(Entry::text("file1.txt", "Hello, world!\n")).unwrap();

        let result = Encoder::new().encode(&archive).unwrap();

        assert!(result.starts_with("#!/usr/bin/env -S seda run\n"));
        assert!(result.contains("seda-format: 2\n"));
        assert!(result.contains("seda-type: core\n"));
        assert!(result.contains("-- file1.txt --\nHello, world!\n"));
        assert!(result.ends_with("-- [.end:1] --\n"));
    }

    #[test]
    fn test_encode_binary() {
        let mut archive = Archive::new(TypeTag::Core);
        archive.add_entry(Entry::binary("image.jpg", vec![0xFF, 0xD8, 0xFF])).unwrap();

        let result = Encoder::new().encode(&archive).unwrap();

        assert!(result.contains("-- image.jpg[.base64] --\n/9j/\n"));
    }

    #[test]
    fn test_encode_text_without_trailing_newline() {
        let encoded = Encoder::new().encode_entry(&Entry::text("a.txt", "no eol"), false).unwrap();
        assert!(encoded.noeol);
        assert_eq!(encoded.marker(), "-- a.txt[.noeol] --");

        let empty = Encoder::new().encode_entry(&Entry::text("e.txt", ""), false).unwrap();
        assert!(!empty.noeol);
        assert_eq!(empty.marker(), "-- e.txt --");
    }

    #[test]
    fn test_encode_escapes_delimiter_lines() {
        let content = "This file looks like an archive:\n-- file1.txt --\nSome content\n";
        let encoded = Encoder::new().encode_entry(&Entry::text("tricky.md", content), false).unwrap();
        assert!(encoded.escaped);
        assert_eq!(encoded.marker(), "-- tricky.md[.escaped] --");
        assert!(encoded.body.contains("\n>-- file1.txt --\n"));
    }

    #[test]
    fn test_encode_directory() {
        let encoded = Encoder::new().encode_entry(&Entry::directory("empty/dir"), false).unwrap();
        assert_eq!(encoded.marker(), "-- empty/dir[.dir] --");
        assert!(encoded.body.is_empty());
    }

    #[test]
    fn test_long_binary_is_wrapped() {
        let data = vec![7u8; 200];
        let encoded = Encoder::new().encode_entry(&Entry::binary("b.bin", data), false).unwrap();
        assert!(encoded.body.lines().all(|l| l.len() <= BASE64_LINE_WIDTH));
        assert!(encoded.body.lines().count() > 1);
    }

    #[test]
    fn test_encode_commit_header_and_message() {
        let header = ArchiveHeader::new(TypeTag::Commit).with_message("feat: add parser\n\n-- not a marker --");
        let mut archive = Archive::with_header(header);
        archive.add_entry(Entry::text("src/lib.rs", "pub fn parse() {}\n")).unwrap();

        let result = Encoder::new().encode(&archive).unwrap();
        assert!(result.contains("seda-type: commit\n\nfeat: add parser\n\n>-- not a marker --\n-- src/lib.rs --\n"));
    }

    #[test]
    fn test_encode_commands_in_header() {
        let header = ArchiveHeader::new(TypeTag::Construct).with_commands(vec![
            CommandSpec::new("cargo build"),
            CommandSpec::for_platform("./check.sh", Platform::Posix),
        ]);
        let result = Encoder::new().encode(&Archive::with_header(header)).unwrap();
        assert!(result.contains("seda-command: cargo build\nseda-command[posix]: ./check.sh\n"));
        assert!(result.ends_with("-- [.end:0] --\n"));
    }

    #[test]
    fn test_header_must_match_tag() {
        let commit_without_message = Archive::new(TypeTag::Commit);
        assert!(matches!(
            Encoder::new().encode(&commit_without_message),
            Err(SedaError::UnsupportedCombination(_))
        ));

        let core_with_message = Archive::with_header(ArchiveHeader::new(TypeTag::Core).with_message("hi"));
        assert!(Encoder::new().encode(&core_with_message).is_err());

        let multiline_command = Archive::with_header(
            ArchiveHeader::new(TypeTag::Construct).with_commands(vec![CommandSpec::new("a\nb")]),
        );
        assert!(Encoder::new().encode(&multiline_command).is_err());
    }

    #[test]
    fn test_vault_requires_passphrase_and_hides_payload() {
        let mut archive = Archive::new(TypeTag::Vault);
        archive.add_entry(Entry::text("secret.txt", "The eagle has landed.")).unwrap();

        assert!(matches!(
            Encoder::new().encode(&archive),
            Err(SedaError::PassphraseRequired { .. })
        ));

        let params = VaultParams {
            rounds: 10,
            ..VaultParams::generate()
        };
        let result = Encoder::new()
            .with_passphrase("pw")
            .with_vault_params(params)
            .encode(&archive)
            .unwrap();
        assert!(result.contains("seda-type: vault\n"));
        assert!(result.contains("seda-vault: 10 "));
        assert!(result.contains("-- [.vault] --\n"));
        assert!(!result.contains("secret.txt"));
        assert!(!result.contains("eagle"));
    }

    #[test]
    fn test_web_envelope_forces_base64() {
        let mut archive = Archive::new(TypeTag::Web);
        archive.add_entry(Entry::text("page.html", "<script>alert(1)</script>\n")).unwrap();
        archive.add_entry(Entry::directory("img")).unwrap();

        let result = Encoder::new().with_display_name("site.seda.html").encode(&archive).unwrap();
        assert!(result.starts_with("<!DOCTYPE html>"));
        assert!(result.contains("seda run site.seda.html"));
        assert!(result.contains("-- page.html[.base64] --"));
        assert!(result.contains("-- img[.dir] --"));
        // Only the envelope's own script elements may close
        assert_eq!(result.matches("</script>").count(), 2);
    }

    #[test]
    fn test_functional_name() {
        assert_eq!(functional_name("project", TypeTag::Core), "project.seda");
        assert_eq!(functional_name("fix.seda", TypeTag::Commit), "fix.commit.seda");
        assert_eq!(functional_name("fix.commit.seda", TypeTag::SmartPatch), "fix.smartpatch.seda");
        assert_eq!(functional_name("Installer.PY", TypeTag::Construct), "Installer.construct.seda");
        assert_eq!(functional_name("site", TypeTag::Web), "site.seda.html");
        assert_eq!(functional_name("keys", TypeTag::Vault), "keys.vault.seda");
        assert_eq!(functional_name(".seda", TypeTag::Core), ".seda.seda");
    }
}

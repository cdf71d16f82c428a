//! # seda
//!
//! Self-extracting document archives: a directory tree packed into one text
//! artifact that carries its files, an optional commit message and optional
//! post-extraction commands, and is run with `seda run <archive>`.
//!
//! ## Carrier Format
//!
//! ```text
//! #!/usr/bin/env -S seda run
//! seda-format: 2
//! seda-type: commit
//!
//! Fix the parser
//! -- src/lib.rs --
//! pub fn parse() {}
//! -- logo.png[.base64] --
//! iVBORw0KGgo=
//! -- assets[.dir] --
//! -- [.end:3] --
//! ```
//!
//! Text is stored verbatim, binaries as base64. Lines of a text entry that
//! would read as a marker are quoted with a leading `>` (see [`escape`]) and
//! the entry is tagged `[.escaped]`, so no content can forge a delimiter.
//! The trailer counts the entries, which makes truncation detectable.
//!
//! ## Archive Types
//!
//! The `seda-type` header selects post-extraction behavior ([`dispatch`]):
//!
//! | Type | Extension | Behavior |
//! |---|---|---|
//! | core | `.seda` | files only |
//! | construct | `.construct.seda` | run commands |
//! | vault | `.vault.seda` | payload encrypted under a passphrase |
//! | web | `.seda.html` | HTML page with the payload embedded |
//! | commit | `.commit.seda` | write `commit_msg.txt` |
//! | smartpatch | `.smartpatch.seda` | commands, then the message if they pass |

pub mod archive;
pub mod classify;
pub mod decoder;
pub mod dispatch;
pub mod encoder;
pub mod error;
pub mod escape;
pub mod extract;
pub mod pack;
pub mod vault;

pub use archive::{Archive, ArchiveHeader, CommandSpec, Entry, EntryKind, Platform, TypeTag};
pub use classify::{Classification, IgnoreConfig};
pub use decoder::Decoder;
pub use encoder::Encoder;
pub use error::{Result, SedaError};
pub use extract::{extract, extract_file, ExtractOptions, ExtractionReport};
pub use pack::{pack, PackOptions, PackReport};

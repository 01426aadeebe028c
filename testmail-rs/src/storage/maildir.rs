//! Mailbox projection of a maildir-style directory tree
//!
//! Every regular file below the base directory is one message. Messages are
//! numbered 1..=n in ascending modification time; the numbering is fixed for
//! the lifetime of a snapshot.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Maildir info delimiter: `unique:2,FLAGS`
const MAILDIR_INFO_DELIMITER: &str = ":2,";

/// One message file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxEntry {
    pub path: PathBuf,
    /// File size in bytes (0 if it could not be read)
    pub size: u64,
    /// File name without the maildir info suffix
    pub uid: String,
    /// Full file name
    pub name: String,
}

/// Ordered, 1-indexed view of a mailbox
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxSnapshot {
    entries: Vec<MailboxEntry>,
}

/// Result of reading a message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    /// CRLF-normalized bytes, always ending in exactly one trailing CRLF
    Loaded(Vec<u8>),
    /// The file could not be read; served as empty content
    Unreadable,
}

impl MessageContent {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Loaded(data) => data,
            Self::Unreadable => &[],
        }
    }
}

impl MailboxSnapshot {
    /// Scan `base` recursively, ignoring dot files. Entries that cannot be
    /// enumerated are skipped; a missing base directory yields an empty
    /// snapshot.
    pub fn load<P: AsRef<Path>>(base: P) -> Self {
        let base = base.as_ref();
        let mut files: Vec<(SystemTime, MailboxEntry)> = Vec::new();

        for entry in WalkDir::new(base).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping maildir entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            // Hidden files, including in-flight spool writes
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }

            let (mtime, size) = match entry.metadata() {
                Ok(meta) => (meta.modified().unwrap_or(UNIX_EPOCH), meta.len()),
                Err(e) => {
                    warn!("Cannot stat {}: {}", entry.path().display(), e);
                    (UNIX_EPOCH, 0)
                }
            };

            let name = entry.file_name().to_string_lossy().to_string();
            files.push((
                mtime,
                MailboxEntry {
                    path: entry.path().to_path_buf(),
                    size,
                    uid: uid_from_name(&name).to_string(),
                    name,
                },
            ));
        }

        // stable: equal mtimes keep enumeration order
        files.sort_by_key(|(mtime, _)| *mtime);

        let entries: Vec<MailboxEntry> = files.into_iter().map(|(_, entry)| entry).collect();
        debug!("Loaded {} message(s) from {}", entries.len(), base.display());
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at 1-based position `index`
    pub fn get(&self, index: usize) -> Option<&MailboxEntry> {
        index.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    /// `(index, entry)` pairs, 1-based, skipping `excluded` indices
    pub fn visible<'a>(
        &'a self,
        excluded: &'a HashSet<usize>,
    ) -> impl Iterator<Item = (usize, &'a MailboxEntry)> + 'a {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i + 1, entry))
            .filter(move |(n, _)| !excluded.contains(n))
    }
}

/// Strip the maildir info suffix so flag changes keep the uid stable
pub fn uid_from_name(name: &str) -> &str {
    match name.find(MAILDIR_INFO_DELIMITER) {
        Some(pos) => &name[..pos],
        None => name,
    }
}

/// Read a message and normalize all line endings to CRLF.
pub fn read_message<P: AsRef<Path>>(path: P) -> MessageContent {
    match fs::read(path.as_ref()) {
        Ok(data) => MessageContent::Loaded(normalize_crlf(&data)),
        Err(e) => {
            warn!("Cannot read message {}: {}", path.as_ref().display(), e);
            MessageContent::Unreadable
        }
    }
}

/// Convert CRLF, lone CR and lone LF to CRLF; guarantee a trailing CRLF.
pub fn normalize_crlf(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 32 + 2);
    let mut i = 0;

    while i < data.len() {
        match data[i] {
            b'\r' => {
                out.extend_from_slice(b"\r\n");
                if data.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
            }
            b'\n' => out.extend_from_slice(b"\r\n"),
            b => out.push(b),
        }
        i += 1;
    }

    if !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Split normalized content at the first empty line into (headers, body).
/// Without an empty line everything is header.
pub fn split_headers_body(content: &[u8]) -> (&[u8], &[u8]) {
    match content.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(pos) => (&content[..pos], &content[pos + 4..]),
        None => (content, &[]),
    }
}

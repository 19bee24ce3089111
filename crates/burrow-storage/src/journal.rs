//! Line format of the append-log backend.
//!
//! One record per line, newline-terminated:
//!
//! ```text
//! NEW,<id>,<owner uuid>,<base64 url>
//! DELETE,<id>,<owner uuid>
//! ```
//!
//! URLs are base64-encoded (standard alphabet, padded) so they can never
//! contain the field separator or a line break.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use burrow_core::{CoreError, LinkId, Owner};
use thiserror::Error;

const NEW: &str = "NEW";
const DELETE: &str = "DELETE";
const SEPARATOR: char = ',';

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JournalError {
    #[error("empty line")]
    Empty,
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),
    #[error("{operation} expects {expected} fields, got {got}")]
    FieldCount {
        operation: &'static str,
        expected: usize,
        got: usize,
    },
    #[error(transparent)]
    Malformed(#[from] CoreError),
    #[error("url is not valid base64: {0}")]
    UrlEncoding(String),
    #[error("url is not valid utf-8")]
    UrlUtf8,
}

/// A single journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    New {
        id: LinkId,
        owner: Owner,
        url: String,
    },
    Delete {
        id: LinkId,
        owner: Owner,
    },
}

impl JournalEntry {
    /// Renders the entry as one newline-terminated line.
    pub fn encode(&self) -> String {
        match self {
            JournalEntry::New { id, owner, url } => {
                format!("{NEW},{id},{owner},{}\n", STANDARD.encode(url))
            }
            JournalEntry::Delete { id, owner } => format!("{DELETE},{id},{owner}\n"),
        }
    }

    /// Parses one line, without its trailing newline.
    pub fn decode(line: &str) -> Result<Self, JournalError> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            return Err(JournalError::Empty);
        }

        let fields: Vec<&str> = line.split(SEPARATOR).collect();
        match fields[0] {
            NEW => {
                expect_fields(NEW, &fields, 4)?;
                let bytes = STANDARD
                    .decode(fields[3])
                    .map_err(|e| JournalError::UrlEncoding(e.to_string()))?;
                let url = String::from_utf8(bytes).map_err(|_| JournalError::UrlUtf8)?;

                Ok(JournalEntry::New {
                    id: LinkId::new(fields[1])?,
                    owner: fields[2].parse()?,
                    url,
                })
            }
            DELETE => {
                expect_fields(DELETE, &fields, 3)?;

                Ok(JournalEntry::Delete {
                    id: LinkId::new(fields[1])?,
                    owner: fields[2].parse()?,
                })
            }
            other => Err(JournalError::UnknownOperation(other.to_string())),
        }
    }
}

fn expect_fields(
    operation: &'static str,
    fields: &[&str],
    expected: usize,
) -> Result<(), JournalError> {
    if fields.len() != expected {
        return Err(JournalError::FieldCount {
            operation,
            expected,
            got: fields.len(),
        });
    }
    Ok(())
}

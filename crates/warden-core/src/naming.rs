//! Backup record naming.
//!
//! A real path is normalised, letter-rotated, escaped, and flattened into a
//! single file name inside the backup root. `_` never appears literally in an
//! encoded name, so the separator marker `._.` cannot be forged by a path
//! component and distinct paths always get distinct names.

use sha2::{Digest, Sha256};

use crate::model::ObjectKind;

pub const SEPARATOR_MARKER: &str = "._.";
pub const DIRECTORY_SUFFIX: &str = "._.";
const HASHED_PREFIX: char = '~';
const MAX_NAME_LEN: usize = 255 - DIRECTORY_SUFFIX.len();

/// Lexical normalisation: repeated separators, trailing separators and `.`
/// components are dropped. Backslashes are left alone.
pub fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let parts: Vec<&str> = path
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();
    let mut out = String::with_capacity(path.len());
    if absolute {
        out.push('/');
    }
    out.push_str(&parts.join("/"));
    out
}

/// File name (not path) of the backup record for `path`.
pub fn record_name(path: &str, kind: ObjectKind) -> String {
    let encoded = encode(&normalize(path));
    let mut name = if encoded.len() > MAX_NAME_LEN {
        let digest = Sha256::digest(encoded.as_bytes());
        format!("{HASHED_PREFIX}{}", hex::encode(digest))
    } else {
        encoded
    };
    if kind == ObjectKind::Directory {
        name.push_str(DIRECTORY_SUFFIX);
    }
    name
}

fn encode(normalized: &str) -> String {
    let mut out = String::with_capacity(normalized.len() + 8);
    for c in normalized.chars().map(rot13) {
        match c {
            '%' => out.push_str("%25"),
            '_' => out.push_str("%5F"),
            '~' => out.push_str("%7E"),
            '\\' => out.push_str("%5C"),
            '/' => out.push_str(SEPARATOR_MARKER),
            c => out.push(c),
        }
    }
    out
}

/// Recover the normalised path from a record name produced by
/// [`record_name`] for a content object. Hashed names and malformed input
/// yield `None`.
pub fn decode(name: &str) -> Option<String> {
    if name.starts_with(HASHED_PREFIX) {
        return None;
    }
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '%' => {
                let code: String = chars.get(i + 1..i + 3)?.iter().collect();
                out.push(match code.as_str() {
                    "25" => '%',
                    "5F" => '_',
                    "7E" => '~',
                    "5C" => '\\',
                    _ => return None,
                });
                i += 3;
            }
            '.' if chars.get(i + 1) == Some(&'_') => {
                if chars.get(i + 2) != Some(&'.') {
                    return None;
                }
                out.push('/');
                i += 3;
            }
            '_' => return None,
            c => {
                out.push(rot13(c));
                i += 1;
            }
        }
    }
    Some(out)
}

fn rot13(c: char) -> char {
    match c {
        'a'..='z' => (((c as u8 - b'a') + 13) % 26 + b'a') as char,
        'A'..='Z' => (((c as u8 - b'A') + 13) % 26 + b'A') as char,
        c => c,
    }
}

//! Per-file context derived from file names
//!
//! Snapshot files are named `<date>_<seq> <chain> <store>.csv`, for example
//! `20250105_002 Miss Glam Pekanbaru.csv`.

use chrono::NaiveDate;
use std::fmt::Write;
use std::path::Path;

use crate::error::{PipelineError, Result};

fn base_name(file_name: &str) -> &str {
    Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(file_name)
}

/// Width of a date rendered with `layout`, or `None` for an invalid layout.
fn date_token_width(layout: &str) -> Option<usize> {
    let sample = NaiveDate::from_ymd_opt(2000, 12, 31)?;
    let mut rendered = String::new();
    write!(rendered, "{}", sample.format(layout)).ok()?;
    Some(rendered.len()).filter(|w| *w > 0)
}

/// Parse the snapshot date from the leading date token of `file_name`.
pub fn snapshot_date(file_name: &str, layout: &str) -> Result<NaiveDate> {
    let name = base_name(file_name);
    let fail = |reason: String| PipelineError::SnapshotDate {
        file: name.to_string(),
        reason,
    };

    let width = date_token_width(layout).ok_or_else(|| fail(format!("invalid date layout '{}'", layout)))?;
    let token = name
        .get(..width)
        .ok_or_else(|| fail(format!("name is shorter than the '{}' date prefix", layout)))?;

    NaiveDate::parse_from_str(token, layout).map_err(|e| fail(format!("'{}': {}", token, e)))
}

fn strip_date_prefix<'a>(stem: &'a str, layout: &str) -> &'a str {
    let Some(width) = date_token_width(layout) else {
        return stem;
    };
    match (stem.get(..width), stem.get(width..)) {
        (Some(token), Some(rest)) if NaiveDate::parse_from_str(token, layout).is_ok() => {
            rest.strip_prefix(['_', '-', ' ']).unwrap_or(rest)
        },
        _ => stem,
    }
}

fn chain_tokens(chain_prefix: &str) -> Vec<&str> {
    chain_prefix.split_whitespace().collect()
}

fn starts_with_chain(tokens: &[&str], chain: &[&str]) -> bool {
    !chain.is_empty()
        && tokens.len() >= chain.len()
        && tokens.iter().zip(chain).all(|(t, c)| t.eq_ignore_ascii_case(c))
}

fn is_sequence_token(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

/// Store name encoded in a snapshot file name, uppercased.
///
/// After the extension and `<date>_` prefix are removed:
/// `002 Miss Glam Pekanbaru` and `Miss Glam Pekanbaru` both give `PEKANBARU`,
/// `007 Toko Baru` gives `TOKO BARU`.
pub fn store_name_from_filename(file_name: &str, layout: &str, chain_prefix: &str) -> String {
    let base = base_name(file_name);
    let stem = Path::new(base)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(base);
    let rest = strip_date_prefix(stem, layout);

    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let chain = chain_tokens(chain_prefix);

    let kept: &[&str] = match tokens.as_slice() {
        [first, tail @ ..] if is_sequence_token(first) && starts_with_chain(tail, &chain) => {
            &tail[chain.len()..]
        },
        all if starts_with_chain(all, &chain) => &all[chain.len()..],
        [first, tail @ ..] if is_sequence_token(first) && !tail.is_empty() => tail,
        all => all,
    };

    kept.join(" ").to_uppercase()
}

/// Canonical store key: trimmed, uppercased, chain prefix removed when a
/// store name follows it (`Miss Glam Padang` -> `PADANG`).
pub fn normalize_store_name(name: &str, chain_prefix: &str) -> String {
    let upper = name.trim().to_uppercase();
    let tokens: Vec<&str> = upper.split_whitespace().collect();
    let chain = chain_tokens(chain_prefix);

    if tokens.len() > chain.len() && starts_with_chain(&tokens, &chain) {
        tokens[chain.len()..].join(" ")
    } else {
        tokens.join(" ")
    }
}

//! Changeset blob naming and newline-delimited JSON codec.

use crate::Event;
use tracing::error;

const NAME_PREFIX: &str = "events_";
const NAME_SUFFIX: &str = ".jsonl";

/// Returns the blob name (relative to the store prefix) for a changeset index.
///
/// Indices are zero-padded to ten digits so that lexicographic listing order
/// matches numeric order.
#[must_use]
pub fn changeset_name(index: u64) -> String {
    format!("{NAME_PREFIX}{index:010}{NAME_SUFFIX}")
}

/// Parses a changeset index out of a blob name relative to the store prefix.
///
/// Returns `None` for anything that is not exactly `events_<digits>.jsonl`.
#[must_use]
pub fn parse_changeset_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(NAME_PREFIX)?.strip_suffix(NAME_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Encodes events as one JSON object per line, each line newline-terminated.
pub fn encode_changeset(events: &[Event]) -> crate::Result<Vec<u8>> {
    let mut out = Vec::new();
    for event in events {
        out.extend_from_slice(event.to_json()?.as_bytes());
        out.push(b'\n');
    }
    Ok(out)
}

/// Decodes a changeset blob, preserving line order.
///
/// Blank lines are ignored. A malformed line is logged and dropped; the
/// remaining lines are still decoded.
#[must_use]
pub fn decode_changeset(bytes: &[u8]) -> Vec<Event> {
    let text = String::from_utf8_lossy(bytes);
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(line_no, line)| match Event::from_json(line) {
            Ok(event) => Some(event),
            Err(e) => {
                error!("Dropping malformed event on line {}: {}", line_no + 1, e);
                None
            }
        })
        .collect()
}

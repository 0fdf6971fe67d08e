//! Resumption cursor codec.
//!
//! A consumer's resumption token is an ordered list of cursors, one per
//! topic it is interested in, serialized to a single opaque string. The wire
//! format is interop-sensitive and must round-trip bit-exactly: `id,key`
//! pairs joined by `|`, with any literal `\`, `|` or `,` inside a field
//! escaped by a leading `\`.

/// One resumption position: the last-seen message id for one topic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    /// Last-seen message id as the consumer knows it.
    pub id: String,
    /// Topic/stream identifier the id belongs to.
    pub key: String,
}

impl Cursor {
    pub fn new(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
        }
    }
}

/// Serialize a cursor list to its wire form.
pub fn format_cursors(cursors: &[Cursor]) -> String {
    let mut out = String::new();
    for (i, cursor) in cursors.iter().enumerate() {
        if i > 0 {
            out.push('|');
        }
        escape_into(&cursor.id, &mut out);
        out.push(',');
        escape_into(&cursor.key, &mut out);
    }
    out
}

/// Parse a wire token back into a cursor list.
///
/// Tolerant inverse of [`format_cursors`]: an empty token is an empty list,
/// and a bare fragment without `,` parses as a cursor with that id and an
/// empty key (single-topic callers pass bare ids).
pub fn parse_cursors(token: &str) -> Vec<Cursor> {
    if token.is_empty() {
        return Vec::new();
    }

    let mut cursors = Vec::new();
    let mut id = String::new();
    let mut key = String::new();
    let mut in_key = false;
    let mut escaped = false;

    for ch in token.chars() {
        if escaped {
            if in_key { &mut key } else { &mut id }.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            ',' if !in_key => in_key = true,
            '|' => {
                cursors.push(Cursor {
                    id: std::mem::take(&mut id),
                    key: std::mem::take(&mut key),
                });
                in_key = false;
            }
            _ => {
                if in_key { &mut key } else { &mut id }.push(ch);
            }
        }
    }
    cursors.push(Cursor { id, key });
    cursors
}

fn escape_into(field: &str, out: &mut String) {
    for ch in field.chars() {
        if matches!(ch, '\\' | '|' | ',') {
            out.push('\\');
        }
        out.push(ch);
    }
}

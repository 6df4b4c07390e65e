//! Sql string operation.

/// Returns the highest `$N` placeholder index in `sql`.
///
/// Placeholders inside string literals, quoted identifiers,
/// dollar quoted strings and comments are ignored.
///
/// ```
/// use postwire::sql::param_count;
///
/// assert_eq!(param_count("SELECT $1, '$2', $3::int4"), 3);
/// assert_eq!(param_count("SELECT 1 -- $1"), 0);
/// ```
pub fn param_count(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                // E'' string allows backslash escape
                let escape = i > 0
                    && matches!(bytes[i - 1], b'E' | b'e')
                    && (i < 2 || !is_ident(bytes[i - 2]));
                i = skip_quoted(bytes, i + 1, b'\'', escape);
            },
            b'"' => i = skip_quoted(bytes, i + 1, b'"', false),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = match bytes[i..].iter().position(|&b| b == b'\n') {
                    Some(nl) => i + nl + 1,
                    None => bytes.len(),
                };
            },
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i + 2),
            // part of identifier, e.g. `foo$1`
            b'$' if i > 0 && is_ident(bytes[i - 1]) => i += 1,
            b'$' => {
                let start = i + 1;
                let digits = bytes[start..].iter().take_while(|b| b.is_ascii_digit()).count();
                if digits > 0 {
                    let n = bytes[start..start + digits]
                        .iter()
                        .fold(0usize, |n, b| n.saturating_mul(10).saturating_add((b - b'0') as usize));
                    max = max.max(n);
                    i = start + digits;
                    continue;
                }

                match dollar_tag(&bytes[start..]) {
                    Some(tag_len) => {
                        let tag = &bytes[i..start + tag_len + 1];
                        let body = start + tag_len + 1;
                        i = match find(&bytes[body..], tag) {
                            Some(end) => body + end + tag.len(),
                            None => bytes.len(),
                        };
                    },
                    None => i += 1,
                }
            },
            _ => i += 1,
        }
    }

    max
}

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Returns index after the closing quote.
fn skip_quoted(bytes: &[u8], mut i: usize, quote: u8, backslash: bool) -> usize {
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if backslash => i += 2,
            // doubled quote is an escaped quote
            b if b == quote && bytes.get(i + 1) == Some(&quote) => i += 2,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Block comments nest.
fn skip_block_comment(bytes: &[u8], mut i: usize) -> usize {
    let mut depth = 1;
    while i < bytes.len() {
        match (bytes[i], bytes.get(i + 1)) {
            (b'/', Some(b'*')) => {
                depth += 1;
                i += 2;
            },
            (b'*', Some(b'/')) => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            },
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Length of dollar quote tag if `bytes` starts with `tag$`.
fn dollar_tag(bytes: &[u8]) -> Option<usize> {
    let len = bytes
        .iter()
        .enumerate()
        .take_while(|(i, b)| b.is_ascii_alphabetic() || **b == b'_' || (*i > 0 && b.is_ascii_digit()))
        .count();
    match bytes.get(len) {
        Some(b'$') => Some(len),
        _ => None,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

//! Query text normalization.

fn is_structural(c: char) -> bool {
    matches!(c, '{' | '}' | '[' | ']' | '(' | ')' | ',')
}

/// Minify a query so that formatting differences map to one cache key.
///
/// Strips `//` comments, collapses whitespace to single spaces, removes
/// whitespace next to brackets, parentheses and commas, and trims the
/// result. String literals are copied verbatim.
pub fn minify_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut chars = query.chars().peekable();
    let mut pending_space = false;

    while let Some(c) = chars.next() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }

        if c == '/' && chars.peek() == Some(&'/') {
            for skipped in chars.by_ref() {
                if skipped == '\n' {
                    break;
                }
            }
            pending_space = true;
            continue;
        }

        if pending_space {
            let after_structural = out.chars().last().is_some_and(is_structural);
            if !out.is_empty() && !after_structural && !is_structural(c) {
                out.push(' ');
            }
            pending_space = false;
        }

        out.push(c);

        if c == '"' || c == '\'' {
            let mut escaped = false;
            for inner in chars.by_ref() {
                out.push(inner);
                if escaped {
                    escaped = false;
                } else if inner == '\\' {
                    escaped = true;
                } else if inner == c {
                    break;
                }
            }
        }
    }

    out
}

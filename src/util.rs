//! Shared utility functions for the generator crate.

/// Extract the outermost JSON object from text that may contain other content.
pub fn extract_json_object(text: &str) -> Option<String> {
    extract_balanced(text, '{', '}')
}

/// Extract the outermost JSON array from text that may contain other content.
pub fn extract_json_array(text: &str) -> Option<String> {
    extract_balanced(text, '[', ']')
}

/// Bracket-counting scan starting at the first `open`.
///
/// Brackets inside JSON string literals are ignored so file contents that
/// contain `{` or `}` do not end the block early.
fn extract_balanced(text: &str, open: char, close: char) -> Option<String> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + i + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

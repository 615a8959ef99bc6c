//! String cleaning shared by every field.

/// List entries shorter than this (in characters) are splitting artifacts.
pub const MIN_ITEM_CHARS: usize = 3;

/// Longest list kept for `properties` and `symptoms`.
pub const MAX_ITEMS: usize = 5;

/// Separators for herb property lists.
pub const PROPERTY_SEPARATORS: &[char] = &[',', ';', '|'];

/// Separators for symptom lists.
pub const SYMPTOM_SEPARATORS: &[char] = &['\n', '\r', '◦', '•'];

/// Trim and collapse every whitespace run to one space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapse each line on its own and drop empty lines, keeping line breaks.
pub fn clean_lines(text: &str) -> String {
    text.lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split on any of `separators`, clean each piece, drop short pieces and
/// repeats, and keep at most [`MAX_ITEMS`].
pub fn split_list(text: &str, separators: &[char]) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();

    for piece in text.split(|c| separators.contains(&c)) {
        let piece = collapse_whitespace(piece);
        if piece.chars().count() < MIN_ITEM_CHARS || items.contains(&piece) {
            continue;
        }
        items.push(piece);
        if items.len() == MAX_ITEMS {
            break;
        }
    }

    items
}

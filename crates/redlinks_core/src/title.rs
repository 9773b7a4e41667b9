pub const NS_MAIN: i32 = 0;
pub const NS_CATEGORY: i32 = 14;

const CATEGORY_PREFIX: &str = "Category:";

/// Existence key for a page title: lowercased with surrounding whitespace removed.
///
/// Both the known-title set and every candidate link target go through this
/// function, so it must stay idempotent.
pub fn normalize_title(raw: &str) -> String {
    raw.to_lowercase().trim().to_string()
}

/// Convert a display title (`Foo bar`) into the database key form (`Foo_bar`).
pub fn db_title(title: &str) -> String {
    title.trim().replace(' ', "_")
}

/// Convert a database key (`Foo_bar`) back to its display form.
pub fn display_title(key: &str) -> String {
    key.replace('_', " ")
}

/// Strip an optional `Category:` prefix, matching it case-insensitively.
pub fn bare_category_name(name: &str) -> &str {
    let trimmed = name.trim();
    match trimmed.get(..CATEGORY_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(CATEGORY_PREFIX) => {
            trimmed[CATEGORY_PREFIX.len()..].trim_start()
        }
        _ => trimmed,
    }
}

pub fn category_title(name: &str) -> String {
    format!("{CATEGORY_PREFIX}{}", bare_category_name(name))
}

/// Canonical display form of a wiki title: underscores as spaces, surrounding
/// whitespace removed, first letter uppercased. The rest of the title keeps its
/// case, since only the first letter is case-insensitive on a wiki.
pub fn canonical_title(title: &str) -> String {
    let spaced = display_title(title);
    let trimmed = spaced.trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Visited-set key for a category, independent of prefix and first-letter case.
pub fn category_key(name: &str) -> String {
    canonical_title(bare_category_name(name))
}

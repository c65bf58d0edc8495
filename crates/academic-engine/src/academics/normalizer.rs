/// Strip invisible characters, collapse whitespace and fold case.
pub(crate) fn normalize_label(value: &str) -> String {
    let cleaned = value.replace(['\u{feff}', '\u{200b}'], "");
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.to_lowercase()
}

/// Case-insensitive key used for uniqueness checks on human-entered names.
pub(crate) fn name_key(value: &str) -> String {
    normalize_label(value)
}

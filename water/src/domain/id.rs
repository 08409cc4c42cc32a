//! Run and update ID generation
//!
//! All IDs use the format: `{12-char-hex}-{kind}`,
//! e.g. `0194c3d2a91f-prop` or `0194c3d2a91f-update`.

/// Generate an ID for the given kind
///
/// The hex prefix comes from a v7 UUID so IDs sort roughly by creation time.
pub fn generate_id(kind: &str) -> String {
    let uuid = uuid::Uuid::now_v7().simple().to_string();
    // v7 puts the millisecond timestamp first; keep the random tail for uniqueness
    format!("{}{}-{}", &uuid[..4], &uuid[uuid.len() - 8..], kind)
}

/// Slugify a component name for use in file names
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() || c == '_' {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' || c == '\u{2018}' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

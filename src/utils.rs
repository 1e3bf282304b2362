//! Shared utility helpers.

/// Default config file location: `<herald_home>/config.yaml`.
pub fn default_config_path() -> std::path::PathBuf {
    crate::herald_home().join("config.yaml")
}

/// Truncate a string to `max` bytes (on a char boundary), appending `…`
/// if trimmed.
pub fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

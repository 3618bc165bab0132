//! Output file naming.
//!
//! Names are built from a template and cleaned so they are valid on
//! Windows, Linux and macOS alike. Non-ASCII text is kept as is.

/// Characters Windows refuses in file names.
const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Device names Windows reserves, compared case-insensitively.
const RESERVED: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

pub const DEFAULT_TEMPLATE: &str = "{title}";

/// Replaces forbidden and control characters with `_` (one per run),
/// trims spaces and dots from both ends and prefixes reserved device names.
/// An empty result becomes `unnamed`.
pub fn sanitize_filename(input: &str) -> String {
    let mut cleaned = String::with_capacity(input.len());
    let mut replaced = false;
    for c in input.chars() {
        if c.is_control() || FORBIDDEN.contains(&c) {
            if !replaced {
                cleaned.push('_');
            }
            replaced = true;
        } else {
            cleaned.push(c);
            replaced = false;
        }
    }

    let trimmed = cleaned.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    let stem = trimmed.split('.').next().unwrap_or(trimmed);
    if RESERVED.iter().any(|name| stem.eq_ignore_ascii_case(name)) {
        return format!("_{trimmed}");
    }
    trimmed.to_string()
}

/// Expands `{title}` and `{id}` in `template` and sanitizes the result.
pub fn render(template: &str, title: &str, id: &str) -> String {
    sanitize_filename(&template.replace("{title}", title).replace("{id}", id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replaces_forbidden_characters() {
        assert_eq!(sanitize_filename("S01E02: Pilot?"), "S01E02_ Pilot_");
        assert_eq!(sanitize_filename("a<>:\"b"), "a_b");
        assert_eq!(sanitize_filename("tab\there"), "tab_here");
    }

    #[test]
    fn test_trims_and_defaults() {
        assert_eq!(sanitize_filename(" .episode. "), "episode");
        assert_eq!(sanitize_filename("..."), "unnamed");
        assert_eq!(sanitize_filename(""), "unnamed");
    }

    #[test]
    fn test_reserved_device_names() {
        assert_eq!(sanitize_filename("con"), "_con");
        assert_eq!(sanitize_filename("LPT1.mp4"), "_LPT1.mp4");
        assert_eq!(sanitize_filename("CONCERT"), "CONCERT");
    }

    #[test]
    fn test_keeps_unicode() {
        assert_eq!(sanitize_filename("Épisode 三"), "Épisode 三");
    }

    #[test]
    fn test_render_template() {
        assert_eq!(render("{title} [{id}]", "Pilot/Part 1", "ep-1"), "Pilot_Part 1 [ep-1]");
        assert_eq!(render(DEFAULT_TEMPLATE, "Pilot", "x"), "Pilot");
    }

    #[test]
    fn test_sanitizing_is_idempotent() {
        for input in ["what?", "con", " x ", "a//b"] {
            let once = sanitize_filename(input);
            assert_eq!(sanitize_filename(&once), once, "{input}");
        }
    }
}

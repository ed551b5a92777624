use uuid::Uuid;

pub const PROMPT_SLUG_MAX_CHARS: usize = 80;
pub const NEWLINE_MARKER: &str = "-n-";
const OBJECT_NAME_PREFIX: &str = "user01";
const PATH_UNSAFE: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Turns free text into something safe to embed in an object or file name.
pub fn sanitize_filename_component(value: &str, max_chars: usize) -> String {
    let mut sanitized = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch == '\n' || ch == '\r' {
            sanitized.push_str(NEWLINE_MARKER);
            continue;
        }
        if (ch as u32) < 0x20 || PATH_UNSAFE.contains(&ch) {
            continue;
        }
        if ch.is_whitespace() {
            sanitized.push('_');
            continue;
        }
        sanitized.push(ch);
    }

    let trimmed = sanitized.trim_matches('_');
    if trimmed.is_empty() {
        return "prompt".to_string();
    }
    trimmed.chars().take(max_chars).collect()
}

/// `user01_<prompt slug>_<random hex>.png`
pub fn build_prompt_based_filename(prompt: &str) -> String {
    let slug = sanitize_filename_component(prompt, PROMPT_SLUG_MAX_CHARS);
    format!(
        "{OBJECT_NAME_PREFIX}_{slug}_{}.png",
        Uuid::new_v4().simple()
    )
}

#[cfg(test)]
mod tests {
    use super::{build_prompt_based_filename, sanitize_filename_component, NEWLINE_MARKER};

    #[test]
    fn unsafe_characters_are_stripped_and_newlines_marked() {
        let slug = sanitize_filename_component("a/b\\c:d*e?f\nnext line\r\n<x>|\"y\"", 80);
        for forbidden in ['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\n', '\r'] {
            assert!(!slug.contains(forbidden), "{forbidden:?} left in {slug}");
        }
        assert!(slug.contains(NEWLINE_MARKER));
        assert_eq!(slug, "abcdef-n-next_line-n--n-xy");
    }

    #[test]
    fn long_prompts_are_truncated_by_characters() {
        let slug = sanitize_filename_component(&"猫".repeat(200), 80);
        assert_eq!(slug.chars().count(), 80);
    }

    #[test]
    fn empty_or_blank_prompt_falls_back() {
        assert_eq!(sanitize_filename_component("", 80), "prompt");
        assert_eq!(sanitize_filename_component("  \t ///", 80), "prompt");
    }

    #[test]
    fn control_characters_are_dropped_and_edges_trimmed() {
        assert_eq!(sanitize_filename_component(" a\u{7}b\tc ", 80), "abc");
    }

    #[test]
    fn filename_has_prefix_slug_suffix_and_extension() {
        let name = build_prompt_based_filename("a/b\\c:d*e?f\nsecond");
        assert!(name.starts_with("user01_abcdef-n-second_"));
        assert!(name.ends_with(".png"));
        let suffix = name
            .trim_start_matches("user01_abcdef-n-second_")
            .trim_end_matches(".png");
        assert_eq!(suffix.len(), 32);
    }
}

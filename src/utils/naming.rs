use once_cell::sync::Lazy;
use regex::Regex;

// " copy" or " copy (n)", case-insensitive, at the end of the name.
static COPY_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.*?)\s+copy(?:\s*\(\d+\))?\s*$").unwrap());

/// Strip an existing copy suffix so clones of clones don't stack suffixes:
/// "Blends copy (2)" → "Blends".
pub fn strip_copy_suffix(name: &str) -> String {
    match COPY_SUFFIX.captures(name) {
        Some(caps) => caps[1].trim().to_string(),
        None => name.trim().to_string(),
    }
}

/// Clone naming convention: "Blends copy", "Blends copy (2)", "Blends copy (3)", …
pub fn clone_name(base_name: &str, attempt: u32) -> String {
    if attempt == 0 {
        format!("{base_name} copy")
    } else {
        format!("{} copy ({})", base_name, attempt + 1)
    }
}

/// Server-owned creation naming: "New Category", "New Category (2)", …
pub fn new_item_name(entity_kind: &str, attempt: u32) -> String {
    if attempt == 0 {
        format!("New {entity_kind}")
    } else {
        format!("New {} ({})", entity_kind, attempt + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_copy_suffixes_case_insensitively() {
        assert_eq!(strip_copy_suffix("Blends"), "Blends");
        assert_eq!(strip_copy_suffix("Blends copy"), "Blends");
        assert_eq!(strip_copy_suffix("Blends Copy (2)"), "Blends");
        assert_eq!(strip_copy_suffix("Blends copy (10)"), "Blends");
    }

    #[test]
    fn clone_names_count_from_the_second_attempt() {
        assert_eq!(clone_name("Blends", 0), "Blends copy");
        assert_eq!(clone_name("Blends", 1), "Blends copy (2)");
        assert_eq!(clone_name("Blends", 2), "Blends copy (3)");
    }

    #[test]
    fn new_item_names_follow_the_same_convention() {
        assert_eq!(new_item_name("Category", 0), "New Category");
        assert_eq!(new_item_name("Label", 1), "New Label (2)");
    }
}

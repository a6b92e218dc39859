/// Derive a URL slug from a display name: lowercase, whitespace and
/// underscores become hyphens, other punctuation is dropped, hyphen runs
/// collapse.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_hyphen = true; // suppress a leading hyphen

    for ch in name.trim().chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
            last_hyphen = false;
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            if !last_hyphen {
                slug.push('-');
                last_hyphen = true;
            }
        }
        // everything else is dropped
    }

    if slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::slugify;

    #[test]
    fn lowercases_and_hyphenates() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("too    many     spaces"), "too-many-spaces");
        assert_eq!(slugify("  padded text  "), "padded-text");
    }

    #[test]
    fn drops_punctuation_and_collapses_hyphens() {
        assert_eq!(slugify("hello@world!"), "helloworld");
        assert_eq!(slugify("snake_case_text"), "snake-case-text");
        assert_eq!(slugify("already-has--hyphens"), "already-has-hyphens");
    }

    #[test]
    fn empty_and_symbol_only_names_yield_empty_slugs() {
        assert_eq!(slugify(""), "");
        assert_eq!(slugify("!!!"), "");
    }
}

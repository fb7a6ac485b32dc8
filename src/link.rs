//! LinkParser — recognizes wiki, markdown, and hashtag references in note
//! content and resolves them against a lookup of known notes.

use std::sync::LazyLock;

use regex::Regex;

use crate::id::Identifier;

static WIKI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\[\]]+)\]\]").expect("valid regex"));
static MARKDOWN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\(([^)]+)\)").expect("valid regex"));
static HASHTAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#([A-Za-z0-9_-]+)").expect("valid regex"));

/// What kind of syntax produced a [`Link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Wiki,
    Markdown,
    Hashtag,
}

/// A directed reference extracted from a note's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub source_id: Identifier,
    pub target_id: Option<Identifier>,
    pub link_text: String,
    pub position: usize,
    pub link_type: LinkType,
    pub is_valid: bool,
}

/// Looks up a link target by title, identifier, or storage-relative path.
/// Implemented by the graph/vault glue, which holds the note registry this
/// parser needs in order to resolve references.
pub trait Resolver {
    fn resolve_by_title(&self, title: &str) -> Option<Identifier>;
    fn resolve_by_id(&self, id: &str) -> Option<Identifier>;
    fn resolve_by_path(&self, path: &str) -> Option<Identifier>;
}

/// Extracts every recognized link from `content`, attributing each to
/// `source_id`, and resolves targets against `resolver`.
///
/// Resolution order per target: title, then identifier, then path. Hashtags
/// are deduplicated by tag text within a single note; wiki and markdown
/// links are not deduplicated (each occurrence carries its own position).
pub fn parse_links(source_id: Identifier, content: &str, resolver: &dyn Resolver) -> Vec<Link> {
    let mut links = Vec::new();
    let mut seen_tags = std::collections::HashSet::new();

    for caps in WIKI_RE.captures_iter(content) {
        let whole = caps.get(0).unwrap();
        let target = caps.get(1).unwrap().as_str().trim();
        let target_id = resolve_target(target, resolver);
        links.push(Link {
            source_id,
            target_id,
            link_text: target.to_string(),
            position: whole.start(),
            link_type: LinkType::Wiki,
            is_valid: target_id.is_some(),
        });
    }

    for caps in MARKDOWN_RE.captures_iter(content) {
        let whole = caps.get(0).unwrap();
        let text = caps.get(1).map(|m| m.as_str()).unwrap_or("").to_string();
        let target = caps.get(2).unwrap().as_str().trim();
        if is_external_url(target) {
            continue;
        }
        let target_id = resolve_target(target, resolver);
        links.push(Link {
            source_id,
            target_id,
            link_text: text,
            position: whole.start(),
            link_type: LinkType::Markdown,
            is_valid: target_id.is_some(),
        });
    }

    for caps in HASHTAG_RE.captures_iter(content) {
        let whole = caps.get(0).unwrap();
        let tag = caps.get(1).unwrap().as_str();
        if !seen_tags.insert(tag.to_string()) {
            continue;
        }
        // Hashtags are not an addressable target; they never resolve to a
        // note, so target_id/is_valid mirror an always-unresolved link.
        links.push(Link {
            source_id,
            target_id: None,
            link_text: tag.to_string(),
            position: whole.start(),
            link_type: LinkType::Hashtag,
            is_valid: false,
        });
    }

    links.sort_by_key(|l| l.position);
    links
}

fn is_external_url(target: &str) -> bool {
    let lower = target.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn resolve_target(target: &str, resolver: &dyn Resolver) -> Option<Identifier> {
    resolver
        .resolve_by_title(target)
        .or_else(|| resolver.resolve_by_id(target))
        .or_else(|| resolver.resolve_by_path(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapResolver {
        by_title: HashMap<String, Identifier>,
        by_path: HashMap<String, Identifier>,
    }

    impl Resolver for MapResolver {
        fn resolve_by_title(&self, title: &str) -> Option<Identifier> {
            self.by_title.get(title).copied()
        }
        fn resolve_by_id(&self, id: &str) -> Option<Identifier> {
            Identifier::parse(id).ok()
        }
        fn resolve_by_path(&self, path: &str) -> Option<Identifier> {
            self.by_path.get(path).copied()
        }
    }

    fn resolver() -> MapResolver {
        let mut by_title = HashMap::new();
        by_title.insert("Target Note".to_string(), Identifier::generate_at(1));
        MapResolver {
            by_title,
            by_path: HashMap::new(),
        }
    }

    #[test]
    fn parses_wiki_link_and_resolves_by_title() {
        let r = resolver();
        let source = Identifier::generate_at(2);
        let links = parse_links(source, "see [[Target Note]] for context", &r);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].link_type, LinkType::Wiki);
        assert!(links[0].is_valid);
    }

    #[test]
    fn markdown_external_url_is_not_a_link() {
        let r = resolver();
        let source = Identifier::generate_at(2);
        let links = parse_links(source, "[docs](https://example.com)", &r);
        assert!(links.is_empty());
    }

    #[test]
    fn unresolved_target_is_recorded_invalid() {
        let r = resolver();
        let source = Identifier::generate_at(2);
        let links = parse_links(source, "[[Nonexistent]]", &r);
        assert_eq!(links.len(), 1);
        assert!(!links[0].is_valid);
        assert!(links[0].target_id.is_none());
    }

    #[test]
    fn hashtags_are_deduplicated_per_note() {
        let r = resolver();
        let source = Identifier::generate_at(2);
        let links = parse_links(source, "#rust and #rust again, also #async", &r);
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn links_are_returned_in_source_position_order() {
        let r = resolver();
        let source = Identifier::generate_at(2);
        let links = parse_links(source, "#second comes [[Target Note]] first in text", &r);
        // "[[Target Note]]" starts before "#second"? No: #second appears first textually.
        assert!(links[0].position < links[1].position);
    }
}

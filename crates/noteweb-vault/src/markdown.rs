//! Metadata extraction from note text: tags, links and excerpts.
//!
//! Parsing is line-oriented and forgiving. Fenced code blocks and inline
//! code spans never contribute tags or links.

use std::sync::LazyLock;

use regex::Regex;

static INLINE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s(\[,;])#([\p{L}\p{N}_/\-]+)").unwrap()
});

static WIKILINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!?\[\[([^\]\|#\^]*)(?:[#\^][^\]\|]*)?(?:\|[^\]]*)?\]\]").unwrap()
});

static MD_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!?\[[^\]]*\]\(\s*<?([^)\s>]+)>?(?:\s+[^)]*)?\)").unwrap()
});

static CODE_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`[^`]*`").unwrap());

/// Split leading YAML front matter from the body.
///
/// Returns `(Some(front_matter), body)` when the text opens with a `---`
/// line that is closed by a later `---` (or `...`) line.
pub fn split_front_matter(content: &str) -> (Option<&str>, &str) {
    let Some(rest) = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    else {
        return (None, content);
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            let front = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return (Some(front), body);
        }
        offset += line.len();
    }
    (None, content)
}

/// Tags declared in the front matter and inline in the body.
///
/// Front-matter tags come first; the result is de-duplicated keeping first
/// occurrence, with any leading `#` stripped.
pub fn extract_tags(content: &str) -> Vec<String> {
    let (front, body) = split_front_matter(content);
    let mut tags = Vec::new();
    if let Some(front) = front {
        for tag in front_matter_tags(front) {
            push_unique(&mut tags, tag);
        }
    }
    for line in prose_lines(body) {
        let line = CODE_SPAN.replace_all(line, "");
        for cap in INLINE_TAG.captures_iter(&line) {
            let tag = cap[1].trim_end_matches(['/', '-']);
            if tag.is_empty() || tag.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            push_unique(&mut tags, tag.to_owned());
        }
    }
    tags
}

/// Raw link targets, one per occurrence.
///
/// Lines are scanned in order; within a line wikilinks come before Markdown
/// links. Wikilinks yield the page part (no heading or alias), Markdown
/// links the URL without its `#fragment`. External URLs are skipped.
pub fn extract_links(content: &str) -> Vec<String> {
    let (_, body) = split_front_matter(content);
    let mut links = Vec::new();
    for line in prose_lines(body) {
        let line = CODE_SPAN.replace_all(line, "");
        for cap in WIKILINK.captures_iter(&line) {
            let target = cap[1].trim();
            if !target.is_empty() {
                links.push(target.to_owned());
            }
        }
        for cap in MD_LINK.captures_iter(&line) {
            if let Some(target) = local_link_target(&cap[1]) {
                links.push(target);
            }
        }
    }
    links
}

/// The first `lines` lines of the note.
pub fn excerpt(content: &str, lines: usize) -> String {
    content.lines().take(lines).collect::<Vec<_>>().join("\n")
}

fn local_link_target(raw: &str) -> Option<String> {
    if raw.starts_with('#') || raw.contains("://") || raw.starts_with("mailto:") {
        return None;
    }
    let path = raw.split('#').next().unwrap_or(raw).replace("%20", " ");
    let path = path.trim();
    (!path.is_empty()).then(|| path.to_owned())
}

fn front_matter_tags(front: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut in_block = false;
    for line in front.lines() {
        if in_block {
            if let Some(item) = line.trim_start().strip_prefix("- ") {
                tags.extend(clean_tag(item));
                continue;
            }
            if line.starts_with(' ') || line.trim().is_empty() {
                continue;
            }
            in_block = false;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if !matches!(key.trim(), "tags" | "tag") {
            continue;
        }
        let value = value.trim();
        if value.is_empty() {
            in_block = true;
            continue;
        }
        let list = value
            .strip_prefix('[')
            .and_then(|v| v.strip_suffix(']'))
            .unwrap_or(value);
        for item in list.split([',', ' ']) {
            tags.extend(clean_tag(item));
        }
    }
    tags
}

fn clean_tag(raw: &str) -> Option<String> {
    let tag = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'')
        .trim_start_matches('#')
        .trim();
    (!tag.is_empty()).then(|| tag.to_owned())
}

fn push_unique(tags: &mut Vec<String>, tag: String) {
    if !tags.contains(&tag) {
        tags.push(tag);
    }
}

/// Lines outside fenced code blocks.
fn prose_lines(body: &str) -> impl Iterator<Item = &str> {
    let mut fence: Option<&str> = None;
    body.lines().filter(move |line| {
        let trimmed = line.trim_start();
        let marker = if trimmed.starts_with("```") {
            Some("```")
        } else if trimmed.starts_with("~~~") {
            Some("~~~")
        } else {
            None
        };
        match (fence, marker) {
            (None, Some(m)) => {
                fence = Some(m);
                false
            }
            (Some(open), Some(m)) if open == m => {
                fence = None;
                false
            }
            (Some(_), _) => false,
            (None, None) => true,
        }
    })
}

use serde::Serialize;

const TEMPLATE_TITLE: &str = "template";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexEntry {
    pub title: String,
    pub slug: String,
}

/// Parses the compatibility index page into catalog entries.
///
/// Two link styles are recognized per line: wiki links (`[[Title]]`) and
/// AsciiDoc links (`link:path/to/Slug[Title]`). Lines matching neither are
/// skipped. Order is preserved and duplicates are kept.
pub fn parse_index(body: &str) -> Vec<IndexEntry> {
    let mut entries = Vec::new();
    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("//") {
            continue;
        }

        if let Some(start) = trimmed.find("[[")
            && let Some(length) = trimmed[start + 2..].find("]]")
        {
            let title = &trimmed[start + 2..start + 2 + length];
            if !title.is_empty() && !is_template_title(title) {
                entries.push(IndexEntry {
                    title: title.to_string(),
                    slug: slug_from_title(title),
                });
            }
            continue;
        }

        if let Some(entry) = parse_asciidoc_link(trimmed) {
            entries.push(entry);
        }
    }
    entries
}

pub fn slug_from_title(title: &str) -> String {
    title
        .chars()
        .filter_map(|ch| match ch {
            ' ' => Some('-'),
            '-' | '_' => Some(ch),
            _ if ch.is_alphanumeric() => Some(ch),
            _ => None,
        })
        .collect()
}

fn parse_asciidoc_link(line: &str) -> Option<IndexEntry> {
    let link = line.find("link:")?;
    let target_start = link + "link:".len();
    let open = target_start + line[target_start..].find('[')?;
    let close = open + line[open..].find(']')?;

    let target = &line[target_start..open];
    let title = &line[open + 1..close];
    if target.is_empty() || is_template_title(title) {
        return None;
    }
    let slug = target.rsplit('/').next().unwrap_or(target);
    Some(IndexEntry {
        title: title.to_string(),
        slug: slug.to_string(),
    })
}

fn is_template_title(title: &str) -> bool {
    title.to_lowercase() == TEMPLATE_TITLE
}

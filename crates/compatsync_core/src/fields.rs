use std::collections::BTreeMap;

const TABLE_FENCE: &str = "|===";
pub const EMPTY_TABLE_WARNING: &str = "Table parse produced no fields.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableParse {
    pub fields: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

/// Reads a two-column pipe table (AsciiDoc `|===` fenced or markdown style)
/// into a key/value mapping. Lines that do not start a new row continue the
/// previous row's value.
pub fn parse_table(body: &str) -> TableParse {
    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    let mut current_key: Option<String> = None;

    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(TABLE_FENCE) {
            continue;
        }

        let Some(payload) = trimmed.strip_prefix('|') else {
            append_continuation(&mut fields, current_key.as_deref(), trimmed);
            continue;
        };
        let payload = payload.trim();

        let Some((key, value)) = payload.split_once('|') else {
            append_continuation(&mut fields, current_key.as_deref(), payload);
            continue;
        };
        let key = key.trim();
        if is_separator_row(key) {
            continue;
        }
        if key.is_empty() {
            current_key = None;
            continue;
        }

        let value = strip_closing_pipe(value.trim());
        fields
            .entry(key.to_string())
            .and_modify(|existing| {
                existing.push('\n');
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
        current_key = Some(key.to_string());
    }

    let mut warnings = Vec::new();
    if fields.is_empty() {
        warnings.push(EMPTY_TABLE_WARNING.to_string());
    }
    TableParse { fields, warnings }
}

/// Non-empty lines with a leading `* ` or `- ` marker removed.
pub fn parse_bullet_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .map(|line| {
            line.strip_prefix("* ")
                .or_else(|| line.strip_prefix("- "))
                .unwrap_or(line)
                .trim()
        })
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// INI-style `key = value` lines. Later keys overwrite earlier ones.
pub fn parse_key_values(text: &str) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();
    for line in text.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        result.insert(key.to_string(), value.trim().to_string());
    }
    result
}

/// Serializes a field mapping back into a fenced table that `parse_table`
/// reads into the same mapping.
pub fn render_table(fields: &BTreeMap<String, String>) -> String {
    let mut output = String::new();
    output.push_str(TABLE_FENCE);
    output.push('\n');
    for (key, value) in fields {
        let mut lines = value.lines();
        let first = lines.next().unwrap_or_default().trim();
        output.push_str(&format!("| {key} | {first} |\n"));
        for line in lines {
            let line = line.trim();
            if !line.is_empty() {
                output.push_str(line);
                output.push('\n');
            }
        }
    }
    output.push_str(TABLE_FENCE);
    output.push('\n');
    output
}

fn append_continuation(fields: &mut BTreeMap<String, String>, key: Option<&str>, text: &str) {
    if let Some(key) = key
        && let Some(existing) = fields.get_mut(key)
    {
        existing.push('\n');
        existing.push_str(text);
    }
}

fn strip_closing_pipe(value: &str) -> &str {
    value
        .strip_suffix('|')
        .map(str::trim_end)
        .unwrap_or(value)
}

fn is_separator_row(key: &str) -> bool {
    key.contains('-') && key.chars().all(|ch| matches!(ch, '-' | ':' | ' '))
}

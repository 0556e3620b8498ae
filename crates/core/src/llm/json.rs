use anyhow::Context;
use serde::Deserialize;

pub const MAX_TAKEAWAYS: usize = 7;

/// Removes a surrounding Markdown code fence (```html ... ``` or ``` ... ```), if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let mut inner = trimmed;
    if let Some((_, after_first)) = inner.split_once('\n') {
        inner = after_first;
    } else {
        return "";
    }
    if let Some(end) = inner.rfind("```") {
        inner = &inner[..end];
    }
    inner.trim()
}

/// Best-effort JSON extraction: fenced block, else the outermost `{...}` or `[...]` span.
pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        return Some(strip_code_fences(trimmed).to_string());
    }

    let start = trimmed.find(['{', '['])?;
    let close = if trimmed[start..].starts_with('{') { '}' } else { ']' };
    let end = trimmed.rfind(close)?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].trim().to_string())
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TakeawaysPayload {
    Object { items: Vec<String> },
    List(Vec<String>),
}

/// Accepts `{"items": [...]}` or a bare `[...]`.
pub fn parse_takeaways(text: &str) -> anyhow::Result<Vec<String>> {
    let json_str = extract_json(text).unwrap_or_else(|| text.trim().to_string());
    let payload = serde_json::from_str::<TakeawaysPayload>(&json_str)
        .with_context(|| format!("takeaways output is not valid JSON: {json_str}"))?;
    let items = match payload {
        TakeawaysPayload::Object { items } => items,
        TakeawaysPayload::List(items) => items,
    };
    validate_takeaways(items)
}

pub fn validate_takeaways(items: Vec<String>) -> anyhow::Result<Vec<String>> {
    let items: Vec<String> = items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    anyhow::ensure!(
        (1..=MAX_TAKEAWAYS).contains(&items.len()),
        "takeaways must have 1..={MAX_TAKEAWAYS} non-empty items (got {})",
        items.len()
    );
    Ok(items)
}

//! Maps a raw product-detail payload into a [`ProductRecord`].
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::model::ProductRecord;

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static MARKUP_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(p|img|id|style|src)\b").expect("valid regex"));
static DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[^a-zA-Z0-9À-ỹ\s.,!?():;"'\-]"#).expect("valid regex"));

/// Strip markup and stray symbols, lowercase, and collapse whitespace.
pub fn clean_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let text = HTML_TAG.replace_all(text, " ");
    let text = MARKUP_WORD.replace_all(&text, " ");
    let text = DISALLOWED.replace_all(&text, " ");
    let lowered = text.to_lowercase();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub record: ProductRecord,
    /// Every non-id field is null.
    pub fully_empty: bool,
}

/// Build the destination record for `id` from a 200 response body.
pub fn normalize(id: i64, payload: &Value) -> Normalized {
    let name = text_field(payload, "name").map(|s| clean_text(&s));
    let url_key = text_field(payload, "url_key");
    let price = payload.get("price").and_then(Value::as_f64);
    let description = text_field(payload, "description").map(|s| clean_text(&s));
    let image_url = payload
        .get("images")
        .and_then(Value::as_array)
        .and_then(|images| images.first())
        .and_then(|first| first.get("base_url"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let name = name.filter(|s| !s.is_empty());
    let description = description.filter(|s| !s.is_empty());
    let image_url = image_url.filter(|s| !s.is_empty());

    let present = [
        ("name", name.is_some()),
        ("url_key", url_key.is_some()),
        ("price", price.is_some()),
        ("description", description.is_some()),
        ("image_url", image_url.is_some()),
    ];
    let missing: Vec<&str> = present
        .iter()
        .filter(|(_, is_set)| !is_set)
        .map(|(field, _)| *field)
        .collect();
    let fully_empty = missing.len() == present.len();

    Normalized {
        record: ProductRecord {
            id,
            name,
            url_key,
            price,
            description,
            image_url,
            missing_fields: missing.join(","),
        },
        fully_empty,
    }
}

fn text_field(payload: &Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

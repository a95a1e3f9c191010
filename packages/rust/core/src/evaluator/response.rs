//! Tolerant parsing of model responses.
//!
//! Models wrap JSON in prose or code fences; [`extract_json`] digs out the
//! payload. Dimension fields that are missing default to 5, present values
//! are clamped to [0,10], and anything non-numeric is a parse error.

use serde_json::Value;

use curator_shared::{CuratorError, DimensionScores, PlatformFitScores, Result};

use super::{ScreenResult, clamp_score};

/// Score assumed for a dimension the model left out.
const MISSING_DIMENSION: f64 = 5.0;

/// Pull the JSON payload out of a model reply.
///
/// Tries, in order: a ```json fenced block, any fenced block, the whole
/// text, then the outermost `[...]` or `{...}` span.
pub fn extract_json(text: &str) -> Result<Value> {
    let mut candidates: Vec<&str> = Vec::new();
    if let Some(block) = fenced_block(text, "```json") {
        candidates.push(block);
    }
    if let Some(block) = fenced_block(text, "```") {
        candidates.push(block);
    }
    candidates.push(text.trim());
    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) {
            if start < end {
                candidates.push(&text[start..=end]);
            }
        }
    }

    candidates
        .into_iter()
        .find_map(|c| serde_json::from_str::<Value>(c.trim()).ok())
        .ok_or_else(|| {
            let preview: String = text.chars().take(200).collect();
            CuratorError::parse(format!("no JSON found in model reply: {preview}"))
        })
}

fn fenced_block<'a>(text: &'a str, fence: &str) -> Option<&'a str> {
    let start = text.find(fence)? + fence.len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(&rest[..end])
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}

fn dimension(obj: &serde_json::Map<String, Value>, name: &str) -> Result<f64> {
    match obj.get(name) {
        None | Some(Value::Null) => Ok(MISSING_DIMENSION),
        Some(value) => as_number(value)
            .map(clamp_score)
            .ok_or_else(|| CuratorError::parse(format!("dimension '{name}' is not a number: {value}"))),
    }
}

fn object(value: &Value) -> Result<&serde_json::Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| CuratorError::parse("expected a JSON object of dimension scores"))
}

/// Parse the seven-dimension reply.
pub fn parse_dimension_scores(text: &str) -> Result<DimensionScores> {
    let value = extract_json(text)?;
    let obj = object(&value)?;
    Ok(DimensionScores {
        curiosity: Some(dimension(obj, "curiosity")?),
        insight: Some(dimension(obj, "insight")?),
        relevance: Some(dimension(obj, "relevance")?),
        timeliness: Some(dimension(obj, "timeliness")?),
        discussion: Some(dimension(obj, "discussion")?),
        shareability: Some(dimension(obj, "shareability")?),
        depth: Some(dimension(obj, "depth")?),
    })
}

/// Parse the platform-fit reply.
pub fn parse_platform_fit(text: &str) -> Result<PlatformFitScores> {
    let value = extract_json(text)?;
    let obj = object(&value)?;
    Ok(PlatformFitScores {
        timeliness: dimension(obj, "timeliness")?,
        discussion_trigger: dimension(obj, "discussion_trigger")?,
        shareability: dimension(obj, "shareability")?,
        explainability: dimension(obj, "explainability")?,
        unique_angle: dimension(obj, "unique_angle")?,
    })
}

/// Parse a batch screening reply for a batch of `batch_len` items.
///
/// Entries with an out-of-range index or no usable score are skipped, so
/// the affected items come back unscored. A reply that is not a JSON array
/// at all is an error.
pub fn parse_screen_results(text: &str, batch_len: usize) -> Result<Vec<ScreenResult>> {
    let value = extract_json(text)?;
    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(mut obj) => match obj.remove("results").or_else(|| obj.remove("items")) {
            Some(Value::Array(entries)) => entries,
            _ => return Err(CuratorError::parse("expected a JSON array of screening results")),
        },
        _ => return Err(CuratorError::parse("expected a JSON array of screening results")),
    };

    let mut results: Vec<ScreenResult> = Vec::with_capacity(entries.len());
    for entry in &entries {
        let Some(index) = entry.get("index").and_then(Value::as_u64).map(|i| i as usize) else {
            continue;
        };
        if index >= batch_len || results.iter().any(|r| r.index == index) {
            continue;
        }
        let Some(score) = entry.get("score").and_then(as_number) else {
            continue;
        };
        let reason = entry
            .get("reason")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        results.push(ScreenResult {
            index,
            score: clamp_score(score),
            reason,
        });
    }
    Ok(results)
}

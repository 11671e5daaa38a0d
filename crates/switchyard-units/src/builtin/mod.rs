pub mod feedback;
pub mod greeting;
pub mod hello_agent;
pub mod recall;
pub mod reflection;

/// Current UTC time as RFC 3339.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Pull a JSON object out of LLM text that may wrap it in prose or code fences.
pub(crate) fn extract_json(raw: &str) -> Option<serde_json::Value> {
    let text = raw.trim();
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(text) {
        return v.is_object().then_some(v);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<serde_json::Value>(&text[start..=end])
        .ok()
        .filter(|v| v.is_object())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json() {
        assert_eq!(
            extract_json(r#"{"a": 1}"#),
            Some(serde_json::json!({"a": 1}))
        );
        assert_eq!(
            extract_json("```json\n{\"decision\": \"ok\"}\n```"),
            Some(serde_json::json!({"decision": "ok"}))
        );
        assert!(extract_json("not json at all").is_none());
        assert!(extract_json("[1, 2]").is_none());
    }
}

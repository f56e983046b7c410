// Generation request parameters
// The config arrives as an untyped dictionary from the collaborator layer;
// bad fields fall back to defaults instead of failing the request

use serde_json::{Map, Value};

pub const DEFAULT_MAX_TOKENS: u32 = 96;
pub const DEFAULT_TEMPERATURE: f32 = 0.4;
pub const DEFAULT_MAX_WALL_CLOCK_MS: u64 = 2000;
pub const DEFAULT_THREAD_COUNT: u32 = 2;
pub const DEFAULT_CONTEXT_SIZE: u32 = 512;

/// A bounded text-generation request
///
/// Generation stops at whichever budget is exhausted first: the token count
/// or the wall clock.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Input text to rewrite
    pub text: String,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Wall-clock budget for the whole generation
    pub max_wall_clock_ms: u64,
    /// Worker threads handed to the engine
    pub thread_count: u32,
    /// Context window size in tokens
    pub context_size: u32,
}

impl GenerationRequest {
    /// A request with default budgets for the given input
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            max_wall_clock_ms: DEFAULT_MAX_WALL_CLOCK_MS,
            thread_count: DEFAULT_THREAD_COUNT,
            context_size: DEFAULT_CONTEXT_SIZE,
        }
    }

    /// Build a request from an untyped config map
    ///
    /// Missing, non-numeric, or out-of-range fields fall back to their
    /// defaults rather than rejecting the request; the map comes from an
    /// external caller that cannot be trusted to be well typed.
    pub fn from_config(text: impl Into<String>, config: &Map<String, Value>) -> Self {
        let defaults = Self::new(text);
        Self {
            max_tokens: positive_u32(config.get("maxTokens"), defaults.max_tokens),
            temperature: non_negative_f32(config.get("temperature"), defaults.temperature),
            max_wall_clock_ms: positive_u64(
                config.get("maxWallClockMs"),
                defaults.max_wall_clock_ms,
            ),
            thread_count: positive_u32(config.get("threadCount"), defaults.thread_count),
            context_size: positive_u32(config.get("contextSize"), defaults.context_size),
            ..defaults
        }
    }
}

fn positive_u32(value: Option<&Value>, default: u32) -> u32 {
    match value.and_then(Value::as_i64) {
        Some(n) if n > 0 && n <= u32::MAX as i64 => n as u32,
        _ => default,
    }
}

fn positive_u64(value: Option<&Value>, default: u64) -> u64 {
    match value.and_then(Value::as_i64) {
        Some(n) if n > 0 => n as u64,
        _ => default,
    }
}

fn non_negative_f32(value: Option<&Value>, default: f32) -> f32 {
    match value.and_then(Value::as_f64) {
        Some(t) if t >= 0.0 && t.is_finite() => t as f32,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_from(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_new_uses_defaults() {
        let request = GenerationRequest::new("hi");
        assert_eq!(request.text, "hi");
        assert_eq!(request.max_tokens, 96);
        assert_eq!(request.temperature, 0.4);
        assert_eq!(request.max_wall_clock_ms, 2000);
        assert_eq!(request.thread_count, 2);
        assert_eq!(request.context_size, 512);
    }

    #[test]
    fn test_from_config_reads_all_fields() {
        let config = config_from(json!({
            "maxTokens": 32,
            "temperature": 0.9,
            "maxWallClockMs": 500,
            "threadCount": 4,
            "contextSize": 1024,
        }));
        let request = GenerationRequest::from_config("rewrite me", &config);
        assert_eq!(request.max_tokens, 32);
        assert_eq!(request.temperature, 0.9);
        assert_eq!(request.max_wall_clock_ms, 500);
        assert_eq!(request.thread_count, 4);
        assert_eq!(request.context_size, 1024);
    }

    #[test]
    fn test_from_config_empty_map_uses_defaults() {
        let request = GenerationRequest::from_config("hi", &Map::new());
        assert_eq!(request, GenerationRequest::new("hi"));
    }

    #[test]
    fn test_non_numeric_fields_fall_back() {
        let config = config_from(json!({
            "maxTokens": "lots",
            "temperature": null,
            "maxWallClockMs": true,
            "threadCount": [2],
            "contextSize": {"n": 512},
        }));
        let request = GenerationRequest::from_config("hi", &config);
        assert_eq!(request, GenerationRequest::new("hi"));
    }

    #[test]
    fn test_out_of_range_fields_fall_back() {
        let config = config_from(json!({
            "maxTokens": 0,
            "temperature": -1.0,
            "maxWallClockMs": -50,
            "threadCount": -2,
            "contextSize": 0,
        }));
        let request = GenerationRequest::from_config("hi", &config);
        assert_eq!(request, GenerationRequest::new("hi"));
    }

    #[test]
    fn test_zero_temperature_is_respected() {
        let config = config_from(json!({ "temperature": 0.0 }));
        let request = GenerationRequest::from_config("hi", &config);
        assert_eq!(request.temperature, 0.0);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let config = config_from(json!({ "beamWidth": 5 }));
        let request = GenerationRequest::from_config("hi", &config);
        assert_eq!(request, GenerationRequest::new("hi"));
    }
}

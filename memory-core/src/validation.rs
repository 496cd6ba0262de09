//! Numeric response validation.
//!
//! LLM answers about health data must only contain numbers that actually
//! came from tool output. The validator extracts numeric claims (value +
//! unit + surrounding words) from the free-form response, collects ground
//! truth from the structured tool outputs, and scores the overlap.
//!
//! Unit conversion is deliberately not done here; callers convert before
//! validating.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ValidatorConfig;

const EPSILON: f64 = 1e-9;

/// A numeric claim found in text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericClaim {
    /// The numeric value
    pub value: f64,
    /// Canonical unit, when one was adjacent to the number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Up to `context_window_words` words on each side
    pub context_words: Vec<String>,
}

/// Outcome of validating a response against tool ground truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Whether the response passes the configured threshold
    pub valid: bool,
    /// Verified share in `[0, 1]`
    pub score: f64,
    /// Claims that matched some ground-truth number
    pub verified: Vec<NumericClaim>,
    /// Claims with no matching ground truth - likely hallucinations
    pub unverified: Vec<NumericClaim>,
}

/// Map a raw token to its canonical unit, if it is one we know.
pub(crate) fn canonical_unit(token: &str) -> Option<&'static str> {
    match token.to_lowercase().as_str() {
        "lb" | "lbs" | "pound" | "pounds" => Some("lbs"),
        "kg" | "kgs" | "kilogram" | "kilograms" => Some("kg"),
        "bpm" => Some("bpm"),
        "%" | "percent" => Some("percent"),
        "min" | "mins" | "minute" | "minutes" => Some("minutes"),
        "kcal" | "cal" | "calorie" | "calories" => Some("kcal"),
        "step" | "steps" => Some("steps"),
        "km" | "kilometer" | "kilometers" => Some("km"),
        "mi" | "mile" | "miles" => Some("miles"),
        "hr" | "hrs" | "hour" | "hours" => Some("hours"),
        _ => None,
    }
}

/// Extracts and checks numeric claims.
pub struct NumericValidator {
    config: ValidatorConfig,
    token_re: Regex,
}

impl NumericValidator {
    /// Build a validator with the given knobs.
    ///
    /// # Panics
    ///
    /// Never: the token pattern is a literal and always compiles.
    #[must_use]
    #[allow(clippy::missing_panics_doc)]
    pub fn new(config: ValidatorConfig) -> Self {
        #[allow(clippy::unwrap_used)]
        let token_re = Regex::new(r"^(-?\d+(?:,\d{3})*(?:\.\d+)?)([a-zA-Z%]+)?$").unwrap();
        Self { config, token_re }
    }

    /// Scan free text for numeric claims.
    ///
    /// A claim is a number with an optional unit taken from, in order of
    /// preference: letters attached to the number ("150bpm"), the next
    /// word, or the previous word - each only when it is in the unit
    /// vocabulary. Up to `context_window_words` words on each side are
    /// captured alongside.
    #[must_use]
    pub fn extract(&self, text: &str) -> Vec<NumericClaim> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let window = self.config.context_window_words;
        let mut claims = Vec::new();

        for (i, raw) in words.iter().enumerate() {
            let cleaned = raw.trim_matches(|c: char| matches!(c, '.' | ',' | '!' | '?' | ';' | ':' | '(' | ')' | '"' | '\''));
            let Some(caps) = self.token_re.captures(cleaned) else {
                continue;
            };
            let Ok(value) = caps[1].replace(',', "").parse::<f64>() else {
                continue;
            };

            // Attached unit first ("150bpm", "45%")
            let mut unit = caps
                .get(2)
                .and_then(|m| canonical_unit(m.as_str()))
                .map(String::from);

            // Then the following word, then the preceding one
            if unit.is_none() {
                unit = words
                    .get(i + 1)
                    .and_then(|next| canonical_unit(clean_word(next)))
                    .map(String::from);
            }
            if unit.is_none() && i > 0 {
                unit = canonical_unit(clean_word(words[i - 1])).map(String::from);
            }

            let start = i.saturating_sub(window);
            let end = (i + window + 1).min(words.len());
            let context_words = words[start..end]
                .iter()
                .enumerate()
                .filter(|(j, _)| start + j != i)
                .map(|(_, w)| clean_word(w).to_lowercase())
                .filter(|w| !w.is_empty())
                .collect();

            claims.push(NumericClaim {
                value,
                unit,
                context_words,
            });
        }

        claims
    }

    /// Collect ground-truth numbers from structured tool outputs.
    ///
    /// JSON numbers arrive unitless; strings are scanned with
    /// [`extract`](Self::extract) so `"72.5 bpm"` keeps its unit.
    #[must_use]
    pub fn ground_truth(&self, tool_outputs: &[serde_json::Value]) -> Vec<NumericClaim> {
        let mut truths = Vec::new();
        for output in tool_outputs {
            self.collect_truths(output, &mut truths);
        }
        truths
    }

    fn collect_truths(&self, value: &serde_json::Value, out: &mut Vec<NumericClaim>) {
        match value {
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_f64() {
                    out.push(NumericClaim {
                        value: v,
                        unit: None,
                        context_words: Vec::new(),
                    });
                }
            }
            serde_json::Value::String(s) => {
                out.extend(self.extract(s));
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    self.collect_truths(item, out);
                }
            }
            serde_json::Value::Object(map) => {
                for item in map.values() {
                    self.collect_truths(item, out);
                }
            }
            serde_json::Value::Bool(_) | serde_json::Value::Null => {}
        }
    }

    /// Validate a response against tool outputs.
    ///
    /// A claim `r` is verified iff some truth `t` satisfies
    /// `|r - t| / max(|t|, ε) <= tolerance` with equal, compatible or
    /// one-sided-absent units. Score is the verified share; an entirely
    /// numeric-free response scores 0 under the `max(1, …)` denominator.
    #[must_use]
    pub fn validate(
        &self,
        response_text: &str,
        tool_outputs: &[serde_json::Value],
    ) -> ValidationReport {
        let claims = self.extract(response_text);
        let truths = self.ground_truth(tool_outputs);

        let mut verified = Vec::new();
        let mut unverified = Vec::new();
        for claim in claims {
            let matched = truths.iter().any(|truth| self.matches(&claim, truth));
            if matched {
                verified.push(claim);
            } else {
                unverified.push(claim);
            }
        }

        let total = verified.len() + unverified.len();
        let score = verified.len() as f64 / (total.max(1)) as f64;
        ValidationReport {
            valid: score >= self.config.valid_threshold,
            score,
            verified,
            unverified,
        }
    }

    fn matches(&self, claim: &NumericClaim, truth: &NumericClaim) -> bool {
        let denom = truth.value.abs().max(EPSILON);
        if (claim.value - truth.value).abs() / denom > self.config.tolerance {
            return false;
        }
        match (&claim.unit, &truth.unit) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

fn clean_word(word: &str) -> &str {
    word.trim_matches(|c: char| !c.is_alphanumeric() && c != '%')
}

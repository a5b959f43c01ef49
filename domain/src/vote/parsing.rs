//! Vote response parsing.
//!
//! Vote prompts demand JSON `{score: 0..100, pass: bool, rationale?}`, but
//! providers sometimes wrap the object in prose or return something else
//! entirely. Parsing is conservative: anything that does not yield both a
//! score and a pass flag becomes the neutral substitute vote.

use serde_json::Value;

/// A vote extracted from a completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedVote {
    pub score: u32,
    pub pass: bool,
    pub rationale: Option<String>,
}

impl ParsedVote {
    /// The substitute recorded when a response cannot be parsed.
    pub fn parse_failure() -> Self {
        Self {
            score: 50,
            pass: false,
            rationale: Some("Failed to parse vote response".to_string()),
        }
    }
}

/// Parse a vote completion, substituting `{score: 50, pass: false}` on any
/// failure. The substitute is still persisted (unless the stage-version
/// check drops it) so a broken provider cannot silently inflate the mean.
pub fn parse_vote_response(response: &str) -> ParsedVote {
    let Some(object) = extract_json_object(response) else {
        return ParsedVote::parse_failure();
    };

    let score = object.get("score").and_then(Value::as_f64);
    let pass = object.get("pass").and_then(Value::as_bool);

    match (score, pass) {
        (Some(score), Some(pass)) => ParsedVote {
            score: score.clamp(0.0, 100.0).round() as u32,
            pass,
            rationale: object
                .get("rationale")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        _ => ParsedVote::parse_failure(),
    }
}

/// Find the first `{` and last `}` and try to parse the span as JSON.
pub(crate) fn extract_json_object(response: &str) -> Option<Value> {
    let start = response.find('{')?;
    let end = response[start..].rfind('}')?;
    let candidate = &response[start..start + end + 1];
    serde_json::from_str::<Value>(candidate)
        .ok()
        .filter(Value::is_object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let vote = parse_vote_response(r#"{"score": 85, "pass": true, "rationale": "Solid plan"}"#);
        assert_eq!(vote.score, 85);
        assert!(vote.pass);
        assert_eq!(vote.rationale.as_deref(), Some("Solid plan"));
    }

    #[test]
    fn parses_json_wrapped_in_prose() {
        let vote = parse_vote_response("Here is my vote:\n{\"score\": 60, \"pass\": false}\nThanks!");
        assert_eq!(vote.score, 60);
        assert!(!vote.pass);
    }

    #[test]
    fn non_json_becomes_substitute() {
        let vote = parse_vote_response("I think this is great, 9/10");
        assert_eq!(vote, ParsedVote::parse_failure());
        assert_eq!(vote.score, 50);
        assert!(!vote.pass);
    }

    #[test]
    fn missing_pass_becomes_substitute() {
        let vote = parse_vote_response(r#"{"score": 90}"#);
        assert_eq!(vote, ParsedVote::parse_failure());
    }

    #[test]
    fn out_of_range_score_is_clamped() {
        let vote = parse_vote_response(r#"{"score": 150, "pass": true}"#);
        assert_eq!(vote.score, 100);
        let vote = parse_vote_response(r#"{"score": -3, "pass": false}"#);
        assert_eq!(vote.score, 0);
    }

    #[test]
    fn fractional_score_is_rounded() {
        let vote = parse_vote_response(r#"{"score": 79.6, "pass": true}"#);
        assert_eq!(vote.score, 80);
    }
}

//! Parsing of semi-structured distill responses.
//!
//! The endpoint is expected to answer with `<ideablock>` fragments, but
//! models drift: tag aliases, truncated output, and bare or fenced JSON all
//! occur in practice and are accepted here.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::warn;

use alembic_protocol::types::BlockContent;

fn ideablock_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<ideablock[^>]*>(.*?)</ideablock>").expect("static regex"))
}

fn truncated_ideablock_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<ideablock[^>]*>(.*?)(?:</ideablock>|$)").expect("static regex")
    })
}

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<(?:name|n)>(.*?)</(?:name|n)>").expect("static regex"))
}

fn question_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?is)<(?:critical_question|criticalQuestion|question)>(.*?)</(?:critical_question|criticalQuestion|question)>",
        )
        .expect("static regex")
    })
}

fn answer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?is)<(?:trusted_answer|trustedAnswer|answer)>(.*?)</(?:trusted_answer|trustedAnswer|answer)>",
        )
        .expect("static regex")
    })
}

fn fenced_json_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)```(?:json)?\s*(\{.*?\})\s*```").expect("static regex"))
}

/// JSON fallback shape, with tag-style aliases tolerated.
#[derive(Debug, Deserialize)]
struct JsonIdeaBlock {
    name: String,
    #[serde(rename = "criticalQuestion", alias = "critical_question", alias = "question")]
    critical_question: String,
    #[serde(rename = "trustedAnswer", alias = "trusted_answer", alias = "answer")]
    trusted_answer: String,
}

/// Extract every ideablock from a distill response.
///
/// Complete `<ideablock>` regions win; a truncated trailing block is
/// accepted when no complete one exists; bare and fenced JSON objects and a
/// tag soup without the `<ideablock>` wrapper are final fallbacks. Returns
/// an empty vector when nothing valid is found.
pub fn parse_ideablocks(content: &str) -> Vec<BlockContent> {
    if content.trim().is_empty() {
        return Vec::new();
    }

    let complete: Vec<BlockContent> = ideablock_re()
        .captures_iter(content)
        .filter_map(|caps| extract_fields(caps.get(1).map_or("", |m| m.as_str())))
        .collect();
    if !complete.is_empty() {
        return complete;
    }

    let truncated: Vec<BlockContent> = truncated_ideablock_re()
        .captures_iter(content)
        .filter_map(|caps| extract_fields(caps.get(1).map_or("", |m| m.as_str())))
        .collect();
    if !truncated.is_empty() {
        warn!(count = truncated.len(), "parsed truncated ideablock response");
        return truncated;
    }

    if let Some(block) = parse_json_block(content) {
        return vec![block];
    }
    if let Some(caps) = fenced_json_re().captures(content) {
        if let Some(block) = parse_json_block(caps.get(1).map_or("", |m| m.as_str())) {
            return vec![block];
        }
    }

    extract_fields(content).map_or_else(Vec::new, |block| vec![block])
}

fn extract_fields(fragment: &str) -> Option<BlockContent> {
    let name = name_re().captures(fragment)?.get(1)?.as_str().trim();
    let question = question_re().captures(fragment)?.get(1)?.as_str().trim();
    let answer = answer_re().captures(fragment)?.get(1)?.as_str().trim();
    if name.is_empty() || question.is_empty() || answer.is_empty() {
        return None;
    }
    Some(BlockContent {
        name: name.to_string(),
        critical_question: question.to_string(),
        trusted_answer: answer.to_string(),
    })
}

fn parse_json_block(raw: &str) -> Option<BlockContent> {
    let parsed: JsonIdeaBlock = serde_json::from_str(raw.trim()).ok()?;
    let block = BlockContent {
        name: parsed.name.trim().to_string(),
        critical_question: parsed.critical_question.trim().to_string(),
        trusted_answer: parsed.trusted_answer.trim().to_string(),
    };
    if block.name.is_empty() || block.critical_question.is_empty() || block.trusted_answer.is_empty()
    {
        return None;
    }
    Some(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_complete_blocks() {
        let content = "prefix <ideablock><name>A</name><critical_question>Q1</critical_question>\
                       <trusted_answer>T1</trusted_answer></ideablock>\
                       <ideablock><name>B</name><critical_question>Q2</critical_question>\
                       <trusted_answer>T2</trusted_answer></ideablock> suffix";
        let blocks = parse_ideablocks(content);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].name, "A");
        assert_eq!(blocks[1].trusted_answer, "T2");
    }

    #[test]
    fn accepts_tag_aliases_case_insensitively() {
        let content = "<IdeaBlock><n>Short</n><Question>Why?</Question>\
                       <ANSWER>Because.</ANSWER></IdeaBlock>";
        let blocks = parse_ideablocks(content);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].name, "Short");
        assert_eq!(blocks[0].critical_question, "Why?");
        assert_eq!(blocks[0].trusted_answer, "Because.");
    }

    #[test]
    fn fields_span_newlines() {
        let content = "<ideablock><name>Multi\nline</name>\n<critical_question>Q</critical_question>\n<trusted_answer>A\nB</trusted_answer></ideablock>";
        let blocks = parse_ideablocks(content);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].trusted_answer, "A\nB");
    }

    #[test]
    fn recovers_truncated_trailing_block() {
        let content = "<ideablock><name>Cut</name><critical_question>Q</critical_question>\
                       <trusted_answer>partial answer</trusted_answer>";
        let blocks = parse_ideablocks(content);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].name, "Cut");
    }

    #[test]
    fn blocks_with_missing_or_empty_fields_are_dropped() {
        assert!(parse_ideablocks("<ideablock><name>OnlyName</name></ideablock>").is_empty());
        let empty_name = "<ideablock><name>  </name><critical_question>Q</critical_question>\
                          <trusted_answer>A</trusted_answer></ideablock>";
        assert!(parse_ideablocks(empty_name).is_empty());
    }

    #[test]
    fn invalid_blocks_are_skipped_but_valid_siblings_survive() {
        let content = "<ideablock><name>NoAnswer</name><critical_question>Q</critical_question>\
                       </ideablock>\
                       <ideablock><name>Good</name><critical_question>Q</critical_question>\
                       <trusted_answer>A</trusted_answer></ideablock>";
        let blocks = parse_ideablocks(content);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].name, "Good");
    }

    #[test]
    fn falls_back_to_bare_json() {
        let content = r#"{"name": "J", "criticalQuestion": "Q", "trustedAnswer": "A"}"#;
        let blocks = parse_ideablocks(content);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].name, "J");
    }

    #[test]
    fn falls_back_to_fenced_json_with_snake_case_keys() {
        let content = "Here you go:\n```json\n{\"name\": \"F\", \"critical_question\": \"Q\", \"trusted_answer\": \"A\"}\n```";
        let blocks = parse_ideablocks(content);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].critical_question, "Q");
    }

    #[test]
    fn accepts_tags_without_ideablock_wrapper() {
        let content = "<name>Loose</name><critical_question>Q</critical_question>\
                       <trusted_answer>A</trusted_answer>";
        let blocks = parse_ideablocks(content);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].name, "Loose");
    }

    #[test]
    fn garbage_yields_nothing() {
        assert!(parse_ideablocks("").is_empty());
        assert!(parse_ideablocks("the model rambled with no structure").is_empty());
        assert!(parse_ideablocks("{\"name\": \"only name\"}").is_empty());
    }
}

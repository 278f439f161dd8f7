//! Three-stage deterministic text pipeline: normalize → macro expand →
//! replacement rules.
//!
//! The normalize stage and the ASR-artifact fixups are ported from the
//! reference `postprocess.py`. The replacement engine's word-boundary /
//! case-aware literal substitution is adapted from the reference
//! application's dictionary/snippet transform (`transform.rs`), generalized
//! to support regex rules and single-pass (non-chaining) semantics.

use chrono::Local;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{DictateError, Result};

pub const MAX_OUTPUT_BYTES: usize = 10_000;
pub const MAX_RULES: usize = 200;
pub const MAX_PATTERN_BYTES: usize = 256;
pub const MAX_REPLACEMENT_BYTES: usize = 256;

/// Collapses all Unicode whitespace to a single ASCII space, strips ends,
/// and collapses runs.
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for ch in text.chars() {
        let is_space = ch.is_whitespace()
            || matches!(
                ch,
                '\u{00a0}'
                    | '\u{2000}'..='\u{200a}'
                    | '\u{202f}'
                    | '\u{205f}'
                    | '\u{3000}'
            );
        if is_space {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

/// Fixes common ASR output artifacts: space-before-punctuation, missing
/// space after sentence-enders, and runs of terminal punctuation.
pub fn fix_asr_artifacts(text: &str) -> String {
    static SPACE_BEFORE_PUNCT: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    static MISSING_SPACE_AFTER_SENTENCE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    static ELLIPSIS_RUN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    static BANG_RUN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    static QUESTION_RUN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();

    let space_before_punct =
        SPACE_BEFORE_PUNCT.get_or_init(|| Regex::new(r" +([,.!?;:])").unwrap());
    let missing_space_after_sentence =
        MISSING_SPACE_AFTER_SENTENCE.get_or_init(|| Regex::new(r"([.!?])([A-Z])").unwrap());
    let ellipsis_run = ELLIPSIS_RUN.get_or_init(|| Regex::new(r"\.{4,}").unwrap());
    let bang_run = BANG_RUN.get_or_init(|| Regex::new(r"!{2,}").unwrap());
    let question_run = QUESTION_RUN.get_or_init(|| Regex::new(r"\?{2,}").unwrap());

    let mut out = space_before_punct.replace_all(text, "$1").into_owned();
    out = missing_space_after_sentence
        .replace_all(&out, "$1 $2")
        .into_owned();
    out = ellipsis_run.replace_all(&out, "...").into_owned();
    out = bang_run.replace_all(&out, "!").into_owned();
    out = question_run.replace_all(&out, "?").into_owned();
    out
}

/// Stage 1: whitespace collapse, artifact fixup, whitespace collapse again
/// (artifact fixes can introduce fresh runs of spaces).
pub fn normalize(text: &str) -> String {
    let collapsed = normalize_whitespace(text);
    let fixed = fix_asr_artifacts(&collapsed);
    normalize_whitespace(&fixed)
}

/// Stage 2: expand `{{date}}`, `{{time}}`, `{{datetime}}`. Not recursive —
/// expansions are not themselves rescanned for macros.
pub fn expand_macros(text: &str) -> String {
    let now = Local::now();
    let date = now.format("%Y-%m-%d").to_string();
    let time = now.format("%H:%M").to_string();
    let datetime = format!("{date} {time}");
    text.replace("{{date}}", &date)
        .replace("{{time}}", &time)
        .replace("{{datetime}}", &datetime)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Literal,
    Regex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplacementRule {
    pub id: String,
    pub enabled: bool,
    pub kind: RuleKind,
    pub pattern: String,
    pub replacement: String,
    #[serde(default)]
    pub word_boundary: bool,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub description: String,
    pub rules: Vec<ReplacementRule>,
}

impl Preset {
    /// Namespaces every rule id as `<preset_id>:<rule_id>`.
    pub fn namespaced_rules(&self) -> Vec<ReplacementRule> {
        self.rules
            .iter()
            .cloned()
            .map(|mut rule| {
                rule.id = format!("{}:{}", self.id, rule.id);
                rule.origin = Some(self.id.clone());
                rule
            })
            .collect()
    }
}

pub fn validate_rule_set(rules: &[ReplacementRule]) -> Result<()> {
    if rules.len() > MAX_RULES {
        return Err(DictateError::Other(anyhow::anyhow!(
            "rule set exceeds the maximum of {MAX_RULES} rules"
        )));
    }
    for rule in rules {
        if rule.id.is_empty() {
            return Err(DictateError::Other(anyhow::anyhow!(
                "replacement rule id must not be empty"
            )));
        }
        if rule.pattern.is_empty() || rule.pattern.len() > MAX_PATTERN_BYTES {
            return Err(DictateError::Other(anyhow::anyhow!(
                "replacement rule '{}' has an invalid pattern length",
                rule.id
            )));
        }
        if rule.replacement.len() > MAX_REPLACEMENT_BYTES {
            return Err(DictateError::Other(anyhow::anyhow!(
                "replacement rule '{}' replacement exceeds {MAX_REPLACEMENT_BYTES} bytes",
                rule.id
            )));
        }
        if rule.kind == RuleKind::Regex {
            compile_regex(rule)?;
        }
    }
    Ok(())
}

fn compile_regex(rule: &ReplacementRule) -> Result<Regex> {
    let pattern = if rule.word_boundary {
        format!(r"\b(?:{})\b", rule.pattern)
    } else {
        rule.pattern.clone()
    };
    let pattern = if rule.case_sensitive {
        pattern
    } else {
        format!("(?i){pattern}")
    };
    Regex::new(&pattern).map_err(|e| {
        DictateError::Other(anyhow::anyhow!(
            "replacement rule '{}' failed to compile: {e}",
            rule.id
        ))
    })
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '\''
}

/// Applies one literal rule, honoring word-boundary and case-sensitivity
/// options. Scans `text` left to right; matches never overlap.
fn apply_literal(text: &str, rule: &ReplacementRule) -> String {
    if rule.pattern.is_empty() || text.is_empty() {
        return text.to_string();
    }
    let needle_cmp = if rule.case_sensitive {
        rule.pattern.clone()
    } else {
        rule.pattern.to_ascii_lowercase()
    };
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0usize;
    while i < chars.len() {
        let rem: String = chars[i..].iter().collect();
        let rem_cmp = if rule.case_sensitive {
            rem.clone()
        } else {
            rem.to_ascii_lowercase()
        };
        if rem_cmp.starts_with(&needle_cmp) {
            let end_idx = i + rule.pattern.chars().count();
            let boundary_ok = if !rule.word_boundary {
                true
            } else {
                let start_ok = i == 0 || !is_word_char(chars[i - 1]);
                let end_ok = end_idx >= chars.len() || !is_word_char(chars[end_idx]);
                start_ok && end_ok
            };
            if boundary_ok {
                out.push_str(&rule.replacement);
                i = end_idx;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn apply_regex(text: &str, rule: &ReplacementRule) -> Result<String> {
    let re = compile_regex(rule)?;
    Ok(re.replace_all(text, rule.replacement.as_str()).into_owned())
}

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub text: String,
    pub truncated: bool,
}

/// Stage 3: single left-to-right pass over `rules`. Each rule scans the
/// text as it stood *before this rule ran*; substitutions it introduces
/// are invisible to subsequent rules (P7 — no chaining). Clamps the final
/// output to `MAX_OUTPUT_BYTES`.
pub fn apply_rules(text: &str, rules: &[ReplacementRule]) -> Result<ProcessOutcome> {
    let mut current = text.to_string();
    for rule in rules.iter().filter(|r| r.enabled) {
        let next = match rule.kind {
            RuleKind::Literal => apply_literal(&current, rule),
            RuleKind::Regex => apply_regex(&current, rule)?,
        };
        current = next;
    }
    Ok(clamp_output(current))
}

fn clamp_output(text: String) -> ProcessOutcome {
    if text.len() <= MAX_OUTPUT_BYTES {
        return ProcessOutcome {
            text,
            truncated: false,
        };
    }
    let mut end = MAX_OUTPUT_BYTES;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    ProcessOutcome {
        text: text[..end].to_string(),
        truncated: true,
    }
}

/// Runs all three stages in order: normalize, expand macros, apply rules.
pub fn process(text: &str, rules: &[ReplacementRule]) -> Result<ProcessOutcome> {
    let normalized = normalize(text);
    let expanded = expand_macros(&normalized);
    apply_rules(&expanded, rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal_rule(id: &str, pattern: &str, replacement: &str) -> ReplacementRule {
        ReplacementRule {
            id: id.to_string(),
            enabled: true,
            kind: RuleKind::Literal,
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
            word_boundary: false,
            case_sensitive: true,
            description: None,
            origin: None,
        }
    }

    #[test]
    fn normalize_collapses_unicode_whitespace() {
        assert_eq!(normalize_whitespace("a\u{00a0}\u{2003}b   c"), "a b c");
    }

    #[test]
    fn normalize_fixes_space_before_punct() {
        assert_eq!(fix_asr_artifacts("hello , world !"), "hello, world!");
    }

    #[test]
    fn normalize_clamps_punctuation_runs() {
        assert_eq!(fix_asr_artifacts("wait....."), "wait...");
        assert_eq!(fix_asr_artifacts("really???"), "really?");
        assert_eq!(fix_asr_artifacts("no!!!"), "no!");
    }

    #[test]
    fn macros_are_not_recursive() {
        // The literal text "{{date}}" injected via a rule must not itself
        // be expanded by a second pass.
        let expanded = expand_macros("meeting at {{time}}");
        assert!(!expanded.contains("{{time}}"));
    }

    #[test]
    fn single_pass_no_chaining() {
        // P7: rules [a->b, b->c] applied to "a" yield "b", not "c".
        let rules = vec![literal_rule("r1", "a", "b"), literal_rule("r2", "b", "c")];
        let out = apply_rules("a", &rules).unwrap();
        assert_eq!(out.text, "b");
    }

    #[test]
    fn scenario_seven_single_pass() {
        let rules = vec![
            literal_rule("r1", "abc", "x"),
            literal_rule("r2", "bc", "y"),
        ];
        let out = apply_rules("abc", &rules).unwrap();
        assert_eq!(out.text, "x");
    }

    #[test]
    fn idempotence_property() {
        let rules = vec![literal_rule("r1", "teh", "the")];
        let once = apply_rules("teh quick fox", &rules).unwrap().text;
        let twice = apply_rules(&once, &rules).unwrap().text;
        assert_eq!(once, twice);
    }

    #[test]
    fn word_boundary_respected() {
        let mut rule = literal_rule("r1", "cat", "dog");
        rule.word_boundary = true;
        assert_eq!(apply_literal("category", &rule), "category");
        assert_eq!(apply_literal("the cat sat", &rule), "the dog sat");
    }

    #[test]
    fn case_insensitive_literal_match() {
        let mut rule = literal_rule("r1", "hello", "hi");
        rule.case_sensitive = false;
        assert_eq!(apply_literal("HELLO there", &rule), "hi there");
    }

    #[test]
    fn output_is_bounded() {
        let long = "a".repeat(MAX_OUTPUT_BYTES + 500);
        let out = apply_rules(&long, &[]).unwrap();
        assert!(out.truncated);
        assert!(out.text.len() <= MAX_OUTPUT_BYTES);
    }

    #[test]
    fn rule_set_over_limit_is_rejected() {
        let rules: Vec<_> = (0..(MAX_RULES + 1))
            .map(|i| literal_rule(&format!("r{i}"), "x", "y"))
            .collect();
        assert!(validate_rule_set(&rules).is_err());
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let mut rule = literal_rule("r1", "(unclosed", "y");
        rule.kind = RuleKind::Regex;
        assert!(validate_rule_set(&[rule]).is_err());
    }

    #[test]
    fn preset_rules_are_namespaced() {
        let preset = Preset {
            id: "coding".to_string(),
            name: "Coding".to_string(),
            description: "".to_string(),
            rules: vec![literal_rule("semicolon", ";", ".")],
        };
        let rules = preset.namespaced_rules();
        assert_eq!(rules[0].id, "coding:semicolon");
        assert_eq!(rules[0].origin.as_deref(), Some("coding"));
    }
}

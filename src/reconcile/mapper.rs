use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::reconcile::QuestionSet;

/// Placeholder for a question the response did not answer.
pub const NOT_FOUND: &str = "Not found";

static JSON_OBJECT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\{.*\}").expect("Invalid JSON object regex pattern")
});
static JSON_ARRAY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\[.*\]").expect("Invalid JSON array regex pattern")
});
static JSON_PAIR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""((?:[^"\\]|\\.)*)"\s*:\s*("(?:[^"\\]|\\.)*"|-?\d+(?:\.\d+)?|true|false|null)"#)
        .expect("Invalid JSON pair regex pattern")
});
static POSITIONAL_KEY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:q|question|answer)?[\s_#-]*(\d{1,2})$").expect("Invalid positional key regex pattern")
});
static NUMBERED_LINE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:\*\*)?(?:q(?:uestion)?\s*)?(\d{1,2})\s*[.):]\s*(?:\*\*)?\s*(.*)$")
        .expect("Invalid numbered line regex pattern")
});
static ANSWER_PREFIX_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:\*\*)?(?:answer|a)\s*:\s*(?:\*\*)?\s*").expect("Invalid answer prefix regex pattern")
});

/// Which parsing strategy produced the answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerShape {
    JsonArray,
    JsonObject,
    JsonFragment,
    Numbered,
    Sections,
    FreeText,
    Unparsed,
}

/// Answers for one paper, positionally aligned to a question set.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerRecord {
    pub paper_id: String,
    pub answers: Vec<String>,
    pub shape: AnswerShape,
}

impl AnswerRecord {
    /// Every question answered with the sentinel.
    pub fn sentinel(paper_id: impl Into<String>, questions: &QuestionSet) -> Self {
        Self {
            paper_id: paper_id.into(),
            answers: vec![NOT_FOUND.to_string(); questions.len()],
            shape: AnswerShape::Unparsed,
        }
    }

    pub fn from_response(paper_id: impl Into<String>, raw: &str, questions: &QuestionSet) -> Self {
        let (answers, shape) = parse_answers(raw, questions);
        Self {
            paper_id: paper_id.into(),
            answers,
            shape,
        }
    }

    pub fn answer(&self, index: usize) -> &str {
        self.answers.get(index).map(String::as_str).unwrap_or(NOT_FOUND)
    }

    /// Number of questions that received a real answer.
    pub fn found(&self) -> usize {
        self.answers.iter().filter(|a| a.as_str() != NOT_FOUND).count()
    }

    /// The first `n` answers, for when the analysis set extends the table set.
    pub fn truncated(&self, n: usize) -> Vec<String> {
        (0..n).map(|i| self.answer(i).to_string()).collect()
    }
}

/// Build the prompt sent to the LLM for one paper.
pub fn build_prompt(content: &str, questions: &QuestionSet) -> String {
    format!(
        "{}\n\nPaper Content:\n{}\n\nQuestions:\n{}\n\nAnswer with the JSON object only.",
        prompt_instructions(questions),
        content,
        questions
            .iter()
            .enumerate()
            .map(|(i, q)| format!("{}. {}", i + 1, q))
            .collect::<Vec<_>>()
            .join("\n")
    )
}

/// Instructions shared by the in-process prompt and the hand-off prompt file.
pub fn prompt_instructions(questions: &QuestionSet) -> String {
    let example: Map<String, Value> = questions
        .iter()
        .map(|q| (q.to_string(), Value::String("<concise answer>".to_string())))
        .collect();
    let example = serde_json::to_string_pretty(&Value::Object(example)).unwrap_or_default();
    format!(
        "You are analyzing physics research papers. Answer the specific questions based on the paper's content.\n\n\
Please respond with a JSON object where each key is the question and each value is your concise answer. \
Use \"{}\" or \"Not applicable\" if the information is not available in the paper.\n\nExample format:\n{}",
        NOT_FOUND, example
    )
}

type Strategy = fn(&str, &QuestionSet) -> Option<Vec<Option<String>>>;

const STRATEGIES: [(AnswerShape, Strategy); 6] = [
    (AnswerShape::JsonArray, parse_json_array),
    (AnswerShape::JsonObject, parse_json_object),
    (AnswerShape::JsonFragment, parse_json_fragment),
    (AnswerShape::Numbered, parse_numbered),
    (AnswerShape::Sections, parse_sections),
    (AnswerShape::FreeText, parse_free_text),
];

/// Parse raw LLM output into exactly `questions.len()` answers.
///
/// Strategies are tried in order and the first one that finds at least one
/// answer wins. Unanswered questions get [`NOT_FOUND`] in their own slot.
pub fn parse_answers(raw: &str, questions: &QuestionSet) -> (Vec<String>, AnswerShape) {
    if questions.is_empty() {
        return (Vec::new(), AnswerShape::Unparsed);
    }
    if raw.trim().is_empty() {
        warn!("Empty LLM output, using placeholder answers");
        return (vec![NOT_FOUND.to_string(); questions.len()], AnswerShape::Unparsed);
    }

    for (shape, strategy) in STRATEGIES.iter() {
        if let Some(slots) = strategy(raw, questions) {
            if slots.iter().any(Option::is_some) {
                debug!("Parsed LLM output as {:?}", shape);
                return (align(slots, questions.len()), *shape);
            }
        }
    }

    warn!("Could not find any answers in LLM output");
    (vec![NOT_FOUND.to_string(); questions.len()], AnswerShape::Unparsed)
}

/// Pad or cut to exactly `len` answers, filling gaps with the sentinel.
fn align(mut slots: Vec<Option<String>>, len: usize) -> Vec<String> {
    slots.resize(len, None);
    slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| NOT_FOUND.to_string()))
        .collect()
}

fn value_to_answer(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(value_to_answer)
            .collect::<Vec<_>>()
            .join("; "),
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// A bracketed array that comes before any object: positional answers.
fn parse_json_array(raw: &str, questions: &QuestionSet) -> Option<Vec<Option<String>>> {
    let first_bracket = raw.find('[')?;
    if raw.find('{').is_some_and(|brace| brace < first_bracket) {
        return None;
    }
    let span = JSON_ARRAY_REGEX.find(raw)?.as_str();
    let items = match serde_json::from_str::<Value>(span).ok()? {
        Value::Array(items) => items,
        _ => return None,
    };

    match items.as_slice() {
        [Value::Object(map)] => Some(match_keys(object_entries(map), questions)),
        _ if items.iter().any(Value::is_object) => None,
        _ => Some(items.iter().map(value_to_answer).collect()),
    }
}

fn parse_json_object(raw: &str, questions: &QuestionSet) -> Option<Vec<Option<String>>> {
    let span = JSON_OBJECT_REGEX.find(raw)?.as_str();
    match serde_json::from_str::<Value>(span) {
        Ok(Value::Object(map)) => Some(match_keys(object_entries(&map), questions)),
        Ok(_) => None,
        Err(e) => {
            debug!("Could not parse LLM output as JSON object: {}", e);
            None
        }
    }
}

/// Salvage complete `"key": value` pairs from truncated or malformed JSON.
fn parse_json_fragment(raw: &str, questions: &QuestionSet) -> Option<Vec<Option<String>>> {
    if !raw.contains('{') {
        return None;
    }
    let entries: Vec<(String, Option<String>)> = JSON_PAIR_REGEX
        .captures_iter(raw)
        .filter_map(|cap| {
            let key: String = serde_json::from_str(&format!("\"{}\"", cap.get(1)?.as_str())).ok()?;
            let value: Value = serde_json::from_str(cap.get(2)?.as_str()).ok()?;
            Some((key, value_to_answer(&value)))
        })
        .collect();
    if entries.is_empty() {
        return None;
    }
    Some(match_keys(entries, questions))
}

/// Numbered answers such as `1. ...` or `Q2: ...`, continuation lines joined.
fn parse_numbered(raw: &str, questions: &QuestionSet) -> Option<Vec<Option<String>>> {
    let mut entries: Vec<(usize, String)> = Vec::new();
    for line in raw.lines() {
        if let Some(cap) = NUMBERED_LINE_REGEX.captures(line) {
            let number: usize = cap[1].parse().ok()?;
            entries.push((number, cap[2].trim().to_string()));
        } else if let Some((_, text)) = entries.last_mut() {
            let line = line.trim();
            if !line.is_empty() {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(line);
            }
        }
    }

    let mut slots = vec![None; questions.len()];
    let mut matched = false;
    for (number, text) in entries {
        if number == 0 || number > questions.len() || slots[number - 1].is_some() {
            continue;
        }
        let question = questions.get(number - 1).unwrap_or_default();
        let answer = clean_answer(strip_echoed_question(&text, question));
        if !answer.is_empty() {
            slots[number - 1] = Some(answer);
            matched = true;
        }
    }
    if matched {
        Some(slots)
    } else {
        None
    }
}

/// Blank-line separated blocks that repeat the question before answering it.
fn parse_sections(raw: &str, questions: &QuestionSet) -> Option<Vec<Option<String>>> {
    let sections: Vec<&str> = raw.split("\n\n").map(str::trim).filter(|s| !s.is_empty()).collect();
    let slots = questions
        .iter()
        .map(|question| {
            let prefix: String = question.chars().take(20).collect();
            let echo = case_insensitive(&prefix, false)?;
            sections.iter().find_map(|section| {
                // Answer starts on the line after the echoed question
                let rest = &section[echo.find(section)?.start()..];
                let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
                let answer = clean_answer(body);
                if answer.is_empty() {
                    None
                } else {
                    Some(answer)
                }
            })
        })
        .collect();
    Some(slots)
}

/// With a single question, unstructured text is the answer.
fn parse_free_text(raw: &str, questions: &QuestionSet) -> Option<Vec<Option<String>>> {
    if questions.len() != 1 {
        return None;
    }
    let answer = clean_answer(raw);
    if answer.is_empty() {
        None
    } else {
        Some(vec![Some(answer)])
    }
}

fn object_entries(map: &Map<String, Value>) -> Vec<(String, Option<String>)> {
    map.iter().map(|(k, v)| (k.clone(), value_to_answer(v))).collect()
}

fn leading_words(text: &str, n: usize) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .take(n)
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Map response keys onto question slots.
///
/// Passes run from strictest to loosest so a fuzzy match never takes a key
/// that belongs to another question exactly. Each key is used at most once.
fn match_keys(entries: Vec<(String, Option<String>)>, questions: &QuestionSet) -> Vec<Option<String>> {
    let mut slots: Vec<Option<String>> = vec![None; questions.len()];
    let mut used = vec![false; entries.len()];

    let question_text: Vec<String> = questions.iter().map(|q| q.to_string()).collect();
    let norm = |s: &str| super::normalize_question(s).to_lowercase();

    // Exact key
    assign_pass(&mut slots, &mut used, &entries, |qi, key| key == question_text[qi]);
    // Same text modulo case and line breaks
    assign_pass(&mut slots, &mut used, &entries, |qi, key| norm(key) == norm(&question_text[qi]));
    // Positional keys: "1", "q2", "question_3"
    assign_pass(&mut slots, &mut used, &entries, |qi, key| {
        POSITIONAL_KEY_REGEX
            .captures(key.trim())
            .and_then(|cap| cap[1].parse::<usize>().ok())
            .is_some_and(|n| n == qi + 1)
    });
    // Key contains the question's leading words
    assign_pass(&mut slots, &mut used, &entries, |qi, key| {
        let words = leading_words(&question_text[qi], 3);
        let key = key.to_lowercase();
        !words.is_empty() && words.iter().all(|w| key.contains(w.as_str()))
    });
    // Question contains the key's leading words
    assign_pass(&mut slots, &mut used, &entries, |qi, key| {
        let words = leading_words(key, 3);
        let question = question_text[qi].to_lowercase();
        words.len() >= 2 && words.iter().all(|w| question.contains(w.as_str()))
    });

    slots
}

fn assign_pass<F>(
    slots: &mut [Option<String>],
    used: &mut [bool],
    entries: &[(String, Option<String>)],
    matches: F,
) where
    F: Fn(usize, &str) -> bool,
{
    for (qi, slot) in slots.iter_mut().enumerate() {
        if slot.is_some() {
            continue;
        }
        for (ki, (key, value)) in entries.iter().enumerate() {
            if used[ki] || !matches(qi, key) {
                continue;
            }
            used[ki] = true;
            *slot = value.clone();
            break;
        }
    }
}

/// Case-insensitive literal match, optionally anchored at the start.
fn case_insensitive(literal: &str, anchored: bool) -> Option<Regex> {
    if literal.is_empty() {
        return None;
    }
    let anchor = if anchored { "^" } else { "" };
    Regex::new(&format!("(?i){}{}", anchor, regex::escape(literal))).ok()
}

fn strip_echoed_question<'a>(text: &'a str, question: &str) -> &'a str {
    match case_insensitive(question, true).and_then(|echo| echo.find(text)) {
        Some(m) => text[m.end()..].trim_start_matches(|c: char| c == '?' || c == ':' || c == '-' || c.is_whitespace()),
        None => text,
    }
}

fn clean_answer(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let stripped = ANSWER_PREFIX_REGEX.replace(&collapsed, "");
    stripped.trim().trim_matches('"').trim().to_string()
}

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

pub const MAX_QUESTIONS: usize = 3;

lazy_static! {
    // ```lang ... ``` fences, keeping what is inside
    static ref CODE_FENCE: Regex = Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").unwrap();
    static ref BULLET: Regex = Regex::new(r"^\s*[-*+]\s+").unwrap();
    static ref NUMBERING: Regex = Regex::new(r"^\s*\d+[.)]\s+").unwrap();
    static ref LEADING_QUOTES: Regex = Regex::new(r#"^[「『"'`]+"#).unwrap();
    static ref TRAILING_QUOTES: Regex = Regex::new(r#"[」』"'`]+$"#).unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref JSON_OBJECT: Regex = Regex::new(r"(?s)\{.*\}").unwrap();
}

fn strip_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text, "$1").into_owned()
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

// A JSON array of strings if the model behaved, otherwise one candidate per line
pub fn parse_questions(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let text = strip_fences(text);

    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(text.trim()) {
        return items.into_iter().map(value_to_string).collect();
    }

    text.lines().map(str::to_string).collect()
}

// Drop list markers, numbering and surrounding quotes, collapse whitespace
pub fn normalize_question(question: &str) -> String {
    let q = BULLET.replace(question, "");
    let q = NUMBERING.replace(&q, "");
    let q = LEADING_QUOTES.replace(&q, "");
    let q = TRAILING_QUOTES.replace(&q, "");
    let q = WHITESPACE.replace_all(&q, " ");
    q.trim().to_string()
}

pub fn select_questions<I>(candidates: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    candidates
        .into_iter()
        .map(|q| normalize_question(&q))
        .filter(|q| !q.is_empty())
        .take(MAX_QUESTIONS)
        .collect()
}

#[derive(Deserialize)]
struct RawAnalysis {
    summary: Option<Value>,
    questions: Option<Value>,
}

// Summary plus questions from the analyze prompt's JSON answer. The model
// sometimes wraps the object in prose, so the outermost {...} is tried too.
pub fn parse_analysis(text: &str) -> Option<(String, Vec<String>)> {
    let raw = serde_json::from_str::<RawAnalysis>(text.trim()).ok().or_else(|| {
        let object = JSON_OBJECT.find(text)?;
        serde_json::from_str::<RawAnalysis>(object.as_str()).ok()
    })?;

    let summary = match raw.summary {
        Some(Value::String(s)) if !s.is_empty() => s,
        _ => return None,
    };
    let questions = match raw.questions {
        Some(Value::Array(items)) => select_questions(items.into_iter().map(value_to_string)),
        _ => Vec::new(),
    };
    Some((summary, questions))
}

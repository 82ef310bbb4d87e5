//! fuzzy matching of question spans against column values

use std::collections::BTreeSet;

/// a column value found in the question
#[derive(Debug, Clone, PartialEq)]
pub struct ValueMatch {
    pub value: String,
    pub score: f64,
}

/// normalized similarity in [0, 1]: 1 - levenshtein / longer length
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein_distance(a, b) as f64 / longest as f64
}

fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    // two-row dynamic programming table
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// best similarity between the value and any question window of about the
/// same number of words
pub fn best_span_score(question_tokens: &[String], value: &str) -> f64 {
    let value_tokens = tokenize(value);
    if value_tokens.is_empty() || question_tokens.is_empty() {
        return 0.0;
    }
    let target = value_tokens.join(" ");
    let width = value_tokens.len();

    let mut best: f64 = 0.0;
    for size in width.saturating_sub(1).max(1)..=width + 1 {
        if size > question_tokens.len() {
            break;
        }
        for window in question_tokens.windows(size) {
            let score = similarity(&window.join(" "), &target);
            if score > best {
                best = score;
                if best >= 1.0 {
                    return best;
                }
            }
        }
    }

    best
}

/// column values whose best question span reaches the threshold
pub fn match_values(question: &str, values: &[String], threshold: f64) -> Vec<ValueMatch> {
    let question_tokens = tokenize(question);

    values
        .iter()
        .filter_map(|value| {
            let score = best_span_score(&question_tokens, value);
            (score >= threshold).then(|| ValueMatch {
                value: value.clone(),
                score,
            })
        })
        .collect()
}

/// purely numeric values and single characters make poor entity references
pub fn is_informative(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.chars().count() > 1 && !trimmed.chars().all(|c| c.is_numeric())
}

/// deduplicate, order longest-first and keep at most `limit` entries
pub fn rank_literals(literals: impl IntoIterator<Item = String>, limit: usize) -> Vec<String> {
    let unique: BTreeSet<String> = literals.into_iter().collect();
    let mut ranked: Vec<String> = unique.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.chars()
            .count()
            .cmp(&a.chars().count())
            .then_with(|| a.cmp(b))
    });
    ranked.truncate(limit);
    ranked
}

pub fn format_literal(table: &str, column: &str, value: &str) -> String {
    format!("{}.`{}` = '{}'", table, column, value)
}

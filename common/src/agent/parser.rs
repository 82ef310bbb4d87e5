use crate::pipeline::context::ColumnSelection;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static SQL_FENCE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)```sql\s*(.*?)```").unwrap()
});

static SQL_LABEL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?ims)^[ \t]*SQL:\s*(.*)").unwrap()
});

static JSON_FENCE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)```(?:json)?\s*(.*?)```").unwrap()
});

static SUB_QUESTION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)^\s*(?:[-*]\s*)?(?:sub[\s_-]?(?:question|query)|step|q)?\s*#?\d+\s*[:.)]\s*(.+?)\s*$",
    )
    .unwrap()
});

static SELECT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bselect\b").unwrap()
});

/// sql statement from a free-text reply: the first ```sql block, else the
/// paragraph after a `SQL:` label, else an empty string
pub fn extract_sql(reply: &str) -> String {
    if let Some(captures) = SQL_FENCE_REGEX.captures(reply) {
        return captures
            .get(1)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
    }

    if let Some(captures) = SQL_LABEL_REGEX.captures(reply) {
        let rest = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        // take only the labeled paragraph
        return rest.split("\n\n").next().unwrap_or(rest).trim().to_string();
    }

    String::new()
}

/// sub-questions from a decomposition reply: a json array of strings, or
/// numbered lines such as `Sub question 1: ...`
pub fn extract_sub_questions(reply: &str) -> Vec<String> {
    if let Some(list) = json_string_list(reply) {
        return list;
    }

    SUB_QUESTION_REGEX
        .captures_iter(reply)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn json_string_list(reply: &str) -> Option<Vec<String>> {
    let start = reply.find('[')?;
    let end = reply.rfind(']')?;
    if end <= start {
        return None;
    }
    let list: Vec<String> = serde_json::from_str(&reply[start..=end]).ok()?;
    let list: Vec<String> = list
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (!list.is_empty()).then_some(list)
}

fn object_in(body: &str) -> Option<serde_json::Map<String, Value>> {
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&body[start..=end]).ok()
}

/// first json object in a fenced block, else outside the fences, else anywhere
fn json_object(reply: &str) -> Option<serde_json::Map<String, Value>> {
    JSON_FENCE_REGEX
        .captures_iter(reply)
        .filter_map(|c| c.get(1))
        .find_map(|m| object_in(m.as_str()))
        .or_else(|| object_in(&JSON_FENCE_REGEX.replace_all(reply, "\n")))
        .or_else(|| object_in(reply))
}

/// column selection from a pruning reply.
///
/// values may be a list of column names, `"keep_all"` or `"drop_all"`;
/// unknown columns are dropped and anything unparseable yields an empty
/// selection.
pub fn parse_selection(reply: &str, table: &str, columns: &[String]) -> ColumnSelection {
    let mut selection = ColumnSelection::new();
    let Some(object) = json_object(reply) else {
        return selection;
    };
    let single_entry = object.len() == 1;

    for (key, value) in object {
        let key = key.trim().trim_matches('`');
        if !(single_entry || key.eq_ignore_ascii_case(table)) {
            continue;
        }

        let chosen: Vec<String> = match value {
            Value::String(s) if s.eq_ignore_ascii_case("keep_all") => columns.to_vec(),
            Value::String(_) => Vec::new(),
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|name| canonical_column(name, columns))
                .fold(Vec::new(), |mut acc, name| {
                    if !acc.contains(&name) {
                        acc.push(name);
                    }
                    acc
                }),
            _ => Vec::new(),
        };

        selection.insert(table.to_string(), chosen);
    }

    selection
}

fn canonical_column(name: &str, columns: &[String]) -> Option<String> {
    let name = name.trim().trim_matches('`');
    columns
        .iter()
        .find(|c| c.eq_ignore_ascii_case(name))
        .cloned()
}

/// repair prompts expect a full statement
pub fn add_select_prefix(sql: &str) -> String {
    let sql = sql.trim();
    if sql.to_lowercase().starts_with("select") {
        sql.to_string()
    } else {
        format!("SELECT {}", sql)
    }
}

pub fn count_selects(sql: &str) -> usize {
    SELECT_REGEX.find_iter(sql).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<String> {
        vec!["id".to_string(), "name".to_string(), "department".to_string()]
    }

    #[test]
    fn test_extract_sql_prefers_fence() {
        let reply = "Let me think.\nSQL: SELECT 0\n```sql\nSELECT COUNT(*) FROM employees;\n```";
        assert_eq!(extract_sql(reply), "SELECT COUNT(*) FROM employees;");
    }

    #[test]
    fn test_extract_sql_label_fallback() {
        let reply = "Analysis: count rows.\nSQL: SELECT COUNT(*)\nFROM employees\n\nThat is all.";
        assert_eq!(extract_sql(reply), "SELECT COUNT(*)\nFROM employees");
    }

    #[test]
    fn test_extract_sql_label_must_start_a_line() {
        let reply = "This needs MySQL: not supported.\nSQL: SELECT 1";
        assert_eq!(extract_sql(reply), "SELECT 1");
        assert_eq!(extract_sql("Use NoSQL: a document store."), "");
    }

    #[test]
    fn test_extract_sql_case_insensitive_fence() {
        let reply = "```SQL\nselect 1\n```";
        assert_eq!(extract_sql(reply), "select 1");
    }

    #[test]
    fn test_extract_sql_missing_is_empty() {
        assert_eq!(extract_sql("I cannot answer that."), "");
        assert_eq!(extract_sql(""), "");
    }

    #[test]
    fn test_extract_sub_questions_numbered_lines() {
        let reply = "Sub question 1: Which employees are in Sales?\n\
                     Sub question 2: How many of them joined after 2015?\n";
        assert_eq!(
            extract_sub_questions(reply),
            vec![
                "Which employees are in Sales?".to_string(),
                "How many of them joined after 2015?".to_string()
            ]
        );
    }

    #[test]
    fn test_extract_sub_questions_json_and_lists() {
        let reply = "```json\n[\"first step\", \"second step\"]\n```";
        assert_eq!(extract_sub_questions(reply), vec!["first step", "second step"]);

        let reply = "1. first step\n2) second step";
        assert_eq!(extract_sub_questions(reply), vec!["first step", "second step"]);
    }

    #[test]
    fn test_extract_sub_questions_garbage_is_empty() {
        assert!(extract_sub_questions("no idea").is_empty());
        assert!(extract_sub_questions("").is_empty());
        assert!(extract_sub_questions("[]").is_empty());
    }

    #[test]
    fn test_parse_selection_list() {
        let reply = "```json\n{\"employees\": [\"`name`\", \"Department\", \"ghost\"]}\n```";
        let selection = parse_selection(reply, "employees", &columns());
        assert_eq!(
            selection.get("employees").unwrap(),
            &vec!["name".to_string(), "department".to_string()]
        );
    }

    #[test]
    fn test_parse_selection_skips_unrelated_fences() {
        let reply = "Reasoning:\n```text\nid looks useful\n```\n{\"employees\": [\"id\"]}";
        let selection = parse_selection(reply, "employees", &columns());
        assert_eq!(selection["employees"], vec!["id".to_string()]);

        let reply = "```\nstep one\n```\n```json\n{\"employees\": [\"name\"]}\n```";
        let selection = parse_selection(reply, "employees", &columns());
        assert_eq!(selection["employees"], vec!["name".to_string()]);
    }

    #[test]
    fn test_parse_selection_keep_and_drop_all() {
        let keep = parse_selection("{\"employees\": \"keep_all\"}", "employees", &columns());
        assert_eq!(keep["employees"], columns());

        let drop = parse_selection("{\"employees\": \"drop_all\"}", "employees", &columns());
        assert!(drop["employees"].is_empty());
    }

    #[test]
    fn test_parse_selection_failure_is_empty() {
        assert!(parse_selection("PLACEHOLDER", "employees", &columns()).is_empty());
        assert!(parse_selection("{not json}", "employees", &columns()).is_empty());
    }

    #[test]
    fn test_add_select_prefix() {
        assert_eq!(add_select_prefix("name FROM t"), "SELECT name FROM t");
        assert_eq!(add_select_prefix("  select 1 "), "select 1");
    }

    #[test]
    fn test_count_selects() {
        assert_eq!(count_selects("SELECT a FROM (select b FROM t)"), 2);
        assert_eq!(count_selects("SELECT selected FROM t"), 1);
    }
}

use crate::pipeline::context::TaskContext;

pub const SELECTION_TASK: &str =
    "Select the columns of the table that are relevant to answering the question.";
pub const DECOMPOSITION_TASK: &str =
    "Decompose the question into a sequence of simpler sub-questions.";
pub const GENERATION_TASK: &str = "Write one SQLite query that answers the question.";
pub const CONTINUATION_TASK: &str =
    "Write one SQLite query that answers the question, building on the previous sub-question.";
pub const REPAIR_TASK: &str = "The SQLite query below failed. Write a corrected query.";
pub const NESTED_REPAIR_TASK: &str =
    "The nested SQLite query below selected no data. Rewrite it without nested SELECTs.";

const NO_MATCHES: &str = "No matched values.";

/// the context fields every generation and repair prompt shares
#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    pub question: &'a str,
    pub evidence: &'a str,
    pub schema: &'a str,
    pub primary_key: &'a str,
    pub foreign_key: &'a str,
    pub details: &'a str,
    pub matched: &'a [String],
}

impl<'a> PromptInput<'a> {
    pub fn from_context(ctx: &'a TaskContext, question: &'a str) -> Self {
        Self {
            question,
            evidence: &ctx.evidence,
            schema: &ctx.schema_description,
            primary_key: &ctx.primary_key,
            foreign_key: &ctx.foreign_key,
            details: &ctx.column_details,
            matched: &ctx.matched_literals,
        }
    }

    pub fn with_schema(self, schema: &'a str) -> Self {
        Self { schema, ..self }
    }
}

pub fn matched_text(matched: &[String]) -> String {
    if matched.is_empty() {
        NO_MATCHES.to_string()
    } else {
        matched.join("; ")
    }
}

fn or_none(text: &str) -> &str {
    if text.trim().is_empty() {
        "None"
    } else {
        text
    }
}

fn database_info(input: &PromptInput<'_>) -> String {
    format!(
        "【Database info】\n{}\n【Primary keys】\n{}\n【Foreign keys】\n{}\n\
         【Column details】\n{}\n【Matched values】\n{}",
        input.schema,
        or_none(input.primary_key),
        or_none(input.foreign_key),
        or_none(input.details),
        matched_text(input.matched)
    )
}

pub fn selection_prompt(table: &str, input: &PromptInput<'_>) -> String {
    format!(
        "{}\n\
         - keep every column needed to filter, group, order or return values.\n\
         - answer with a json object mapping the table name to a list of column names, \
           or to \"keep_all\" / \"drop_all\".\n\
         - example: {{\"{}\": [\"col_a\", \"col_b\"]}}\n\n\
         {}\n\n\
         【Question】\n{}\n【Evidence】\n{}\n【Answer】",
        SELECTION_TASK,
        table,
        database_info(input),
        input.question,
        or_none(input.evidence)
    )
}

pub fn decomposition_prompt(question: &str, evidence: &str) -> String {
    format!(
        "{}\n\
         - each sub-question narrows the previous one.\n\
         - the last sub-question must be the original question.\n\
         - answer with one line per sub-question, formatted as `Sub question N: ...`.\n\n\
         【Question】\n{}\n【Evidence】\n{}\n【Sub questions】",
        DECOMPOSITION_TASK,
        question,
        or_none(evidence)
    )
}

pub fn initial_generation_prompt(input: &PromptInput<'_>) -> String {
    format!(
        "{}\n\
         - use only the columns listed in the database info and quote them with backticks.\n\
         - think step by step, then give the final query in a ```sql block.\n\n\
         {}\n\n\
         【Question】\n{}\n【Evidence】\n{}\n【Answer】",
        GENERATION_TASK,
        database_info(input),
        input.question,
        or_none(input.evidence)
    )
}

pub fn continuation_generation_prompt(
    input: &PromptInput<'_>,
    sub_question: &str,
    sub_sql: &str,
) -> String {
    format!(
        "{}\n\
         - the previous sub-question and its verified query are given; extend that query.\n\
         - think step by step, then give the final query in a ```sql block.\n\n\
         {}\n\n\
         【Previous sub-question】\n{}\n【Previous SQL】\n```sql\n{}\n```\n\n\
         【Question】\n{}\n【Evidence】\n{}\n【Answer】",
        CONTINUATION_TASK,
        database_info(input),
        sub_question,
        sub_sql,
        input.question,
        or_none(input.evidence)
    )
}

pub fn repair_prompt(input: &PromptInput<'_>, sql: &str, error: &str, error_class: &str) -> String {
    format!(
        "{}\n\
         - keep the intent of the original query; fix only what the error points at.\n\
         - give the corrected query in a ```sql block.\n\n\
         {}\n\n\
         【Question】\n{}\n【Evidence】\n{}\n\
         【Old SQL】\n```sql\n{}\n```\n【SQLite error】\n{}\n【Exception class】\n{}\n【Answer】",
        REPAIR_TASK,
        database_info(input),
        input.question,
        or_none(input.evidence),
        sql,
        error,
        or_none(error_class)
    )
}

pub fn nested_repair_prompt(
    input: &PromptInput<'_>,
    sql: &str,
    error: &str,
    error_class: &str,
) -> String {
    format!(
        "{}\n\
         - replace subqueries with joins, grouping or ordering on the single table.\n\
         - check that literal values match the matched values exactly.\n\
         - give the corrected query in a ```sql block.\n\n\
         {}\n\n\
         【Question】\n{}\n【Evidence】\n{}\n\
         【Old SQL】\n```sql\n{}\n```\n【SQLite error】\n{}\n【Exception class】\n{}\n【Answer】",
        NESTED_REPAIR_TASK,
        database_info(input),
        input.question,
        or_none(input.evidence),
        sql,
        error,
        or_none(error_class)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(matched: &'a [String]) -> PromptInput<'a> {
        PromptInput {
            question: "How many employees are in Engineering?",
            evidence: "",
            schema: "# employees: [department (TEXT)]",
            primary_key: "",
            foreign_key: "",
            details: "",
            matched,
        }
    }

    #[test]
    fn test_matched_text() {
        assert_eq!(matched_text(&[]), "No matched values.");
        let matched = vec!["a".to_string(), "b".to_string()];
        assert_eq!(matched_text(&matched), "a; b");
    }

    #[test]
    fn test_generation_prompt_contains_context() {
        let matched = vec!["employees.`department` = 'Engineering'".to_string()];
        let prompt = initial_generation_prompt(&input(&matched));

        assert!(prompt.starts_with(GENERATION_TASK));
        assert!(prompt.contains("# employees: [department (TEXT)]"));
        assert!(prompt.contains("employees.`department` = 'Engineering'"));
        assert!(prompt.contains("【Evidence】\nNone"));
    }

    #[test]
    fn test_continuation_prompt_carries_previous_step() {
        let prompt = continuation_generation_prompt(
            &input(&[]),
            "Which employees are in Engineering?",
            "SELECT name FROM employees WHERE department = 'Engineering'",
        );
        assert!(prompt.starts_with(CONTINUATION_TASK));
        assert!(prompt.contains("Which employees are in Engineering?"));
        assert!(prompt.contains("WHERE department = 'Engineering'"));
    }

    #[test]
    fn test_repair_prompt_uses_overridden_schema() {
        let full = "# Table: employees\n[\n  (department <TEXT>)\n]";
        let prompt = repair_prompt(
            &input(&[]).with_schema(full),
            "SELECT dept FROM employees",
            "no such column: dept",
            "SqliteFailure",
        );
        assert!(prompt.contains(full));
        assert!(prompt.contains("no such column: dept"));
    }

    #[test]
    fn test_selection_prompt_names_table() {
        let prompt = selection_prompt("employees", &input(&[]));
        assert!(prompt.starts_with(SELECTION_TASK));
        assert!(prompt.contains("{\"employees\": [\"col_a\", \"col_b\"]}"));
    }
}

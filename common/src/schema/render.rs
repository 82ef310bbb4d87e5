//! textual schema descriptions fed to the prompts

use crate::schema::cache::TableContent;
use serde_json::Value;
use std::collections::BTreeMap;

const MAX_NOTE_CHARS: usize = 100;

/// one column as it appears in a schema description
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDesc {
    pub name: String,
    /// human-readable name, underscores replaced with spaces
    pub full_name: String,
    pub data_type: String,
    /// rendered list of sample values, empty when the column has none
    pub samples: String,
    pub note: String,
}

pub fn describe_columns(
    content: &TableContent,
    notes: &BTreeMap<String, String>,
    max_samples: usize,
) -> Vec<ColumnDesc> {
    content
        .schema
        .columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let samples: Vec<&Value> = content
                .distinct_values(idx)
                .into_iter()
                .take(max_samples)
                .collect();

            ColumnDesc {
                name: column.name.clone(),
                full_name: column.name.replace('_', " ").trim().to_string(),
                data_type: column.data_type.clone(),
                samples: render_samples(&samples),
                note: notes.get(&column.name).cloned().unwrap_or_default(),
            }
        })
        .collect()
}

fn render_samples(samples: &[&Value]) -> String {
    if samples.is_empty() {
        return String::new();
    }
    let items: Vec<String> = samples
        .iter()
        .map(|v| match v {
            Value::String(s) => format!("'{}'", s.replace('\n', " ")),
            other => other.to_string(),
        })
        .collect();
    format!("[{}]", items.join(", "))
}

/// complete form: name, type, readable name, value examples and note
pub fn render_complete(table: &str, columns: &[ColumnDesc]) -> String {
    let lines: Vec<String> = columns
        .iter()
        .map(|col| {
            let mut line = format!("  ({} <{}>,", col.name, col.data_type);
            if !col.full_name.is_empty() {
                line.push_str(&format!(" {}.", col.full_name));
            }
            if !col.samples.is_empty() {
                line.push_str(&format!(" Value examples: {}.", col.samples));
            }
            if !col.note.is_empty() {
                let note: String = format!("And {}", col.note)
                    .chars()
                    .take(MAX_NOTE_CHARS)
                    .collect();
                line.push_str(&format!(" {}", note));
            }
            line.push(')');
            line
        })
        .collect();

    format!("# Table: {}\n[\n{}\n]", table, lines.join(",\n"))
}

/// reduced form: name and type of the given columns only
pub fn render_reduced(table: &str, columns: &[ColumnDesc], keep: &[String]) -> String {
    let items: Vec<String> = columns
        .iter()
        .filter(|col| keep.iter().any(|k| k == &col.name))
        .map(|col| format!("{} ({})", col.name, col.data_type))
        .collect();

    format!("# {}: [{}]", table, items.join(", "))
}

/// detail lines for the selected columns
pub fn render_details(table: &str, columns: &[ColumnDesc], selected: &[String]) -> String {
    columns
        .iter()
        .filter(|col| selected.iter().any(|s| s == &col.name))
        .map(|col| {
            let mut details = format!("{}.`{}`: ", table, col.name);
            if !col.full_name.is_empty() {
                details.push_str(&format!(
                    "The column '{}' in Table <{}> has description \"{}\". ",
                    col.name, table, col.full_name
                ));
            }
            if !col.samples.is_empty() {
                details.push_str(&format!("Value examples: {}. ", col.samples));
            }
            details.push_str(&col.note);
            details.trim().to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_primary_key(table: &str, primary_keys: &[String]) -> String {
    primary_keys
        .first()
        .map(|pk| format!("{}.`{}`", table, pk))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::cache::ContentCache;
    use crate::testing::employees_store;

    fn employee_columns() -> Vec<ColumnDesc> {
        let store = employees_store();
        let mut cache = ContentCache::new();
        let content = cache.get_or_load(store.as_ref(), "employees").unwrap();
        let mut notes = BTreeMap::new();
        notes.insert("salary".to_string(), "yearly gross salary in USD".to_string());
        describe_columns(content, &notes, 6)
    }

    #[test]
    fn test_complete_description() {
        let columns = employee_columns();
        let desc = render_complete("employees", &columns);

        assert!(desc.starts_with("# Table: employees\n["));
        assert!(desc.contains("(department <TEXT>, department. Value examples: ['Engineering', 'Marketing'].)"));
        assert!(desc.contains("And yearly gross salary in USD"));
        assert!(desc.ends_with(']'));
    }

    #[test]
    fn test_samples_are_capped() {
        let columns = employee_columns();
        let store = employees_store();
        let mut cache = ContentCache::new();
        let content = cache.get_or_load(store.as_ref(), "employees").unwrap();
        let capped = describe_columns(content, &BTreeMap::new(), 1);

        assert_eq!(columns[1].samples, "['Alice Smith', 'Bob Jones', 'Carol White']");
        assert_eq!(capped[1].samples, "['Alice Smith']");
    }

    #[test]
    fn test_reduced_description_keeps_selected_columns() {
        let columns = employee_columns();
        let keep = vec!["name".to_string(), "salary".to_string()];
        assert_eq!(
            render_reduced("employees", &columns, &keep),
            "# employees: [name (TEXT), salary (INTEGER)]"
        );
        assert_eq!(render_reduced("employees", &columns, &[]), "# employees: []");
    }

    #[test]
    fn test_details_and_primary_key() {
        let columns = employee_columns();
        let details = render_details("employees", &columns, &["department".to_string()]);
        assert!(details.starts_with("employees.`department`:"));
        assert_eq!(details.lines().count(), 1);

        assert_eq!(render_primary_key("employees", &["id".to_string()]), "employees.`id`");
        assert_eq!(render_primary_key("employees", &[]), "");
    }
}

//! Statement text and row extraction shared by the SQL backends.

use serde_json::Value;

use crate::registry::TableUpdateJob;
use crate::Row;

/// Strip surrounding whitespace and trailing semicolons so a query can be
/// embedded as a subquery.
pub(crate) fn trim_statement(query_text: &str) -> &str {
    query_text.trim().trim_end_matches(';').trim_end()
}

/// `CREATE TABLE IF NOT EXISTS` from the job's declared columns.
pub(crate) fn create_table_sql(job: &TableUpdateJob) -> String {
    let columns = job
        .columns
        .iter()
        .map(|(name, ty)| format!("{} {}", name, ty))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}))",
        job.table_name, columns, job.primary_key
    )
}

/// `INSERT ... ON CONFLICT (pk) DO NOTHING` in declared column order.
///
/// `placeholder` renders the bind marker for the 1-based position and the
/// column's declared type.
pub(crate) fn insert_sql(job: &TableUpdateJob, placeholder: impl Fn(usize, &str) -> String) -> String {
    let names = job.column_names().collect::<Vec<_>>().join(", ");
    let values = job
        .columns
        .iter()
        .enumerate()
        .map(|(idx, (_, ty))| placeholder(idx + 1, ty))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO NOTHING",
        job.table_name, names, values, job.primary_key
    )
}

/// Look up a column by exact name, then ASCII case-insensitively.
pub(crate) fn lookup<'a>(row: &'a Row, column: &str) -> Option<&'a Value> {
    row.get(column).or_else(|| {
        row.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    })
}

/// Values for every declared column in order, or the first missing column.
pub(crate) fn extract_values<'a>(
    job: &TableUpdateJob,
    row: &'a Row,
) -> std::result::Result<Vec<&'a Value>, String> {
    job.column_names()
        .map(|column| lookup(row, column).ok_or_else(|| column.to_string()))
        .collect()
}

/// Build a row from result columns in select order.
///
/// Repeated column names keep the first value under the plain name; later
/// ones get `_2`, `_3` and so on, skipping names already in use.
pub(crate) fn row_from_pairs(pairs: impl IntoIterator<Item = (String, Value)>) -> Row {
    let mut row = Row::new();
    for (name, value) in pairs {
        if !row.contains_key(&name) {
            row.insert(name, value);
            continue;
        }
        let mut n = 2;
        while row.contains_key(&format!("{}_{}", name, n)) {
            n += 1;
        }
        row.insert(format!("{}_{}", name, n), value);
    }
    row
}

/// Text rendering used for text-bound parameters. Null stays null.
pub(crate) fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::OrderedMap;
    use serde_json::json;

    fn job() -> TableUpdateJob {
        let columns: OrderedMap<String> = [
            ("proposal_id", "TEXT".to_string()),
            ("votes", "NUMERIC".to_string()),
            ("closed_at", "TIMESTAMP".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        TableUpdateJob::new("proposals", "SELECT 1", columns, "proposal_id")
    }

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_create_table_sql() {
        assert_eq!(
            create_table_sql(&job()),
            "CREATE TABLE IF NOT EXISTS proposals (proposal_id TEXT, votes NUMERIC, closed_at TIMESTAMP, PRIMARY KEY (proposal_id))"
        );
    }

    #[test]
    fn test_insert_sql_with_casts() {
        let sql = insert_sql(&job(), |idx, ty| format!("CAST(${} AS {})", idx, ty));
        assert_eq!(
            sql,
            "INSERT INTO proposals (proposal_id, votes, closed_at) VALUES (CAST($1 AS TEXT), CAST($2 AS NUMERIC), CAST($3 AS TIMESTAMP)) ON CONFLICT (proposal_id) DO NOTHING"
        );
    }

    #[test]
    fn test_extract_values_follows_declared_order() {
        let row = row(json!({"closed_at": "2024-05-01", "votes": 12, "proposal_id": "p-1"}));
        let values = extract_values(&job(), &row).unwrap();
        assert_eq!(values, vec![&json!("p-1"), &json!(12), &json!("2024-05-01")]);
    }

    #[test]
    fn test_extract_values_case_insensitive_fallback() {
        let row = row(json!({"PROPOSAL_ID": "p-1", "Votes": 3, "closed_at": null}));
        let values = extract_values(&job(), &row).unwrap();
        assert_eq!(values[0], &json!("p-1"));
        assert_eq!(values[2], &Value::Null);
    }

    #[test]
    fn test_extract_values_reports_missing_column() {
        let row = row(json!({"proposal_id": "p-1", "votes": 3}));
        assert_eq!(extract_values(&job(), &row), Err("closed_at".to_string()));
    }

    #[test]
    fn test_trim_statement() {
        assert_eq!(trim_statement("  SELECT 1;\n"), "SELECT 1");
        assert_eq!(trim_statement("SELECT 1 ;;"), "SELECT 1");
    }

    #[test]
    fn test_value_as_text() {
        assert_eq!(value_as_text(&Value::Null), None);
        assert_eq!(value_as_text(&json!("x")).as_deref(), Some("x"));
        assert_eq!(value_as_text(&json!(1.5)).as_deref(), Some("1.5"));
        assert_eq!(value_as_text(&json!(true)).as_deref(), Some("true"));
        assert_eq!(value_as_text(&json!([1, 2])).as_deref(), Some("[1,2]"));
    }

    #[test]
    fn test_row_from_pairs_suffixes_repeated_names() {
        let row = row_from_pairs([
            ("id".to_string(), json!(1)),
            ("id".to_string(), json!(2)),
            ("id_2".to_string(), json!("taken")),
            ("id".to_string(), json!(3)),
        ]);
        let entries: Vec<_> = row.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        assert_eq!(
            entries,
            vec![
                ("id", json!(1)),
                ("id_2", json!(2)),
                ("id_2_2", json!("taken")),
                ("id_3", json!(3)),
            ]
        );
    }
}

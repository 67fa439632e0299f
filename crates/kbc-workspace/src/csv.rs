//! CSV rendering of [`QueryResult`]s, the text handed back to tool callers.

use serde_json::Value;

use crate::QueryResult;

const RECORD_TERMINATOR: &str = "\r\n";

/// Renders a result as CSV: the row set when there is one, otherwise a
/// single `message` column holding the status message.
pub fn serialize(result: &QueryResult) -> String {
    let mut out = String::new();
    match result.data() {
        Some(data) => {
            write_record(&mut out, data.columns.iter().map(String::as_str));
            for row in &data.rows {
                let fields: Vec<String> = data
                    .columns
                    .iter()
                    .map(|column| format_value(row.get(column).unwrap_or(&Value::Null)))
                    .collect();
                write_record(&mut out, fields.iter().map(String::as_str));
            }
        }
        None => {
            write_record(&mut out, ["message"]);
            write_record(&mut out, [result.message().unwrap_or_default()]);
        }
    }
    out
}

fn write_record<'a>(out: &mut String, fields: impl IntoIterator<Item = &'a str>) {
    let fields: Vec<&str> = fields.into_iter().collect();
    // a lone empty field would otherwise read back as an empty line
    if let [only] = fields.as_slice() {
        if only.is_empty() {
            out.push_str("\"\"");
            out.push_str(RECORD_TERMINATOR);
            return;
        }
    }
    for (index, field) in fields.iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        push_field(out, field);
    }
    out.push_str(RECORD_TERMINATOR);
}

fn push_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\r', '\n']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::SqlSelectData;

    fn rows(columns: &[&str], rows: Vec<Vec<Value>>) -> QueryResult {
        QueryResult::Rows(SqlSelectData::from_positional(
            columns.iter().map(|c| c.to_string()).collect(),
            rows,
        ))
    }

    #[test]
    fn single_cell() {
        assert_eq!(serialize(&rows(&["a"], vec![vec![json!(1)]])), "a\r\n1\r\n");
    }

    #[test]
    fn several_columns_and_rows() {
        let result = rows(
            &["id", "name", "email"],
            vec![
                vec![json!(1), json!("John"), json!("john@foo.com")],
                vec![json!(2), json!("Joe"), json!("joe@bar.com")],
            ],
        );
        assert_eq!(
            serialize(&result),
            "id,name,email\r\n1,John,john@foo.com\r\n2,Joe,joe@bar.com\r\n"
        );
    }

    #[test]
    fn message_results_become_a_message_column() {
        assert_eq!(
            serialize(&QueryResult::completed("1 table created")),
            "message\r\n1 table created\r\n"
        );
        assert_eq!(
            serialize(&QueryResult::failed("Object 'FOO' does not exist, or operation cannot be performed.")),
            "message\r\n\"Object 'FOO' does not exist, or operation cannot be performed.\"\r\n"
        );
    }

    #[test]
    fn special_characters_are_quoted() {
        let result = rows(
            &["text", "say \"hi\""],
            vec![vec![json!("a,b"), json!("line1\nline2")], vec![json!("He said \"no\""), json!("x\ry")]],
        );
        assert_eq!(
            serialize(&result),
            "text,\"say \"\"hi\"\"\"\r\n\"a,b\",\"line1\nline2\"\r\n\"He said \"\"no\"\"\",\"x\ry\"\r\n"
        );
    }

    #[test]
    fn scalars_nulls_and_nested_values() {
        let result = rows(
            &["flag", "missing", "ratio", "tags"],
            vec![vec![json!(true), Value::Null, json!(0.5), json!(["a"])]],
        );
        assert_eq!(
            serialize(&result),
            "flag,missing,ratio,tags\r\ntrue,,0.5,\"[\"\"a\"\"]\"\r\n"
        );
    }

    #[test]
    fn lone_empty_field_is_written_as_empty_quotes() {
        assert_eq!(serialize(&QueryResult::completed("")), "message\r\n\"\"\r\n");
        assert_eq!(serialize(&rows(&["a"], vec![vec![Value::Null]])), "a\r\n\"\"\r\n");
    }

    #[test]
    fn empty_row_set_is_just_the_header() {
        assert_eq!(serialize(&rows(&["a", "b"], vec![])), "a,b\r\n");
    }

    #[test]
    fn rendering_is_deterministic() {
        let result = rows(&["z", "a"], vec![vec![json!(1), json!(2)]]);
        assert_eq!(serialize(&result), serialize(&result.clone()));
        assert_eq!(serialize(&result), "z,a\r\n1,2\r\n");
    }
}

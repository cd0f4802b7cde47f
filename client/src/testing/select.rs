//! Evaluator for the literal `select` statements the fake database answers.
//!
//! Supported: `select <item>[, <item>...]` where an item is an integer,
//! decimal, quoted text, `true`/`false`, `null` or a `$parameter`, optionally
//! followed by `AS <name>`. Unnamed items become `column0`, `column1`, ...

use std::collections::HashMap;

use crate::proto;
use crate::types::ProtoDeserializable;
use crate::types::value::{Value, ValueType};

/// Why a statement could not be evaluated, with the status to answer with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementError {
    pub status: proto::StatusCode,
    pub message: String,
}

impl StatementError {
    fn syntax(message: impl Into<String>) -> Self {
        Self {
            status: proto::StatusCode::GenericError,
            message: message.into(),
        }
    }
}

/// Outcome of evaluating one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// A `select` and the single result set it produced.
    Select(proto::ResultSet),
    /// A data modification; it produces no result sets.
    Modification,
}

const MODIFICATION_KEYWORDS: [&str; 5] = ["upsert", "insert", "update", "delete", "replace"];

/// Lower-cased text without surrounding whitespace and trailing semicolons.
#[must_use]
pub fn normalize(text: &str) -> String {
    text.trim().trim_end_matches(';').trim().to_lowercase()
}

/// Evaluate `text` with `parameters` bound.
pub fn evaluate(
    text: &str,
    parameters: &HashMap<String, proto::TypedValue>,
) -> Result<Statement, StatementError> {
    let body = text.trim().trim_end_matches(';').trim();
    let keyword = body
        .split_whitespace()
        .next()
        .map(str::to_lowercase)
        .unwrap_or_default();

    if MODIFICATION_KEYWORDS.contains(&keyword.as_str()) {
        return Ok(Statement::Modification);
    }
    if keyword != "select" {
        return Err(StatementError::syntax(format!(
            "syntax error: unexpected '{keyword}'"
        )));
    }

    let items = split_items(body["select".len()..].trim());
    if items.iter().all(|item| item.is_empty()) {
        return Err(StatementError::syntax("syntax error: select list is empty"));
    }

    let mut columns = Vec::with_capacity(items.len());
    let mut values = Vec::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        let (expression, alias) = split_alias(item);
        let value = evaluate_expression(expression, parameters)?;
        let name = alias.map_or_else(|| format!("column{position}"), str::to_owned);
        let (value_type, optional) = match value.value_type() {
            Some(value_type) => (value_type, false),
            None => (ValueType::Text, true),
        };
        columns.push(proto::Column {
            name,
            r#type: proto::ValueType::from(value_type).into(),
            optional,
        });
        values.push(crate::types::ProtoSerializable::to_proto(value));
    }

    Ok(Statement::Select(proto::ResultSet {
        columns,
        rows: vec![proto::Row { values }],
        truncated: false,
    }))
}

/// Split a select list on commas outside quotes.
fn split_items(list: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut quote = None;
    let mut start = 0;
    for (index, c) in list.char_indices() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(open), _) if c == open => quote = None,
            (None, ',') => {
                items.push(list[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }
    items.push(list[start..].trim());
    items
}

fn split_alias(item: &str) -> (&str, Option<&str>) {
    let lower = item.to_ascii_lowercase();
    match lower.rfind(" as ") {
        Some(index) if !item[index + 4..].trim().is_empty() => {
            (item[..index].trim(), Some(item[index + 4..].trim()))
        }
        _ => (item, None),
    }
}

#[allow(clippy::disallowed_methods)] // bound values stay with the request
fn evaluate_expression(
    expression: &str,
    parameters: &HashMap<String, proto::TypedValue>,
) -> Result<Value, StatementError> {
    if let Some(name) = expression.strip_prefix('$') {
        let key = format!("${name}");
        let Some(bound) = parameters.get(&key) else {
            return Err(StatementError {
                status: proto::StatusCode::BadRequest,
                message: format!("parameter {key} is not bound"),
            });
        };
        return Value::from_proto(bound.clone()).map_err(|message| StatementError {
            status: proto::StatusCode::BadRequest,
            message: format!("parameter {key}: {message}"),
        });
    }

    let quoted = expression
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
        .or_else(|| {
            expression
                .strip_prefix('"')
                .and_then(|rest| rest.strip_suffix('"'))
        });
    if let Some(text) = quoted {
        return Ok(Value::Text(text.to_owned()));
    }

    match expression.to_lowercase().as_str() {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "null" => return Ok(Value::Null),
        _ => {}
    }

    if let Ok(n) = expression.parse::<i64>() {
        return Ok(i32::try_from(n).map_or(Value::Int64(n), Value::Int32));
    }
    if expression.contains('.')
        && let Ok(n) = expression.parse::<f64>()
    {
        return Ok(Value::Double(n));
    }

    Err(StatementError::syntax(format!(
        "syntax error: cannot evaluate '{expression}'"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProtoSerializable;

    fn select(text: &str) -> proto::ResultSet {
        match evaluate(text, &HashMap::new()).unwrap() {
            Statement::Select(result) => result,
            Statement::Modification => panic!("expected a select"),
        }
    }

    #[test]
    fn test_select_one() {
        let result = select("select 1;");
        assert_eq!(result.columns.len(), 1);
        assert_eq!(result.columns[0].name, "column0");
        assert_eq!(result.columns[0].r#type, i32::from(proto::ValueType::Int32));
        assert_eq!(result.rows[0].values[0], Value::Int32(1).to_proto());
    }

    #[test]
    fn test_select_many_items_with_alias() {
        let result = select("SELECT 'a, b' AS label, 3000000000, 1.5 as ratio, null");
        let names: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["label", "column1", "ratio", "column3"]);
        assert_eq!(result.rows[0].values[0], Value::from("a, b").to_proto());
        assert_eq!(result.rows[0].values[1], Value::Int64(3_000_000_000).to_proto());
        assert!(result.columns[3].optional);
    }

    #[test]
    fn test_select_parameter() {
        let mut parameters = HashMap::new();
        parameters.insert("$id".to_string(), Value::Uint64(9).to_proto());
        let Statement::Select(result) = evaluate("select $id as id;", &parameters).unwrap() else {
            panic!("expected a select");
        };
        assert_eq!(result.columns[0].r#type, i32::from(proto::ValueType::Uint64));

        let error = evaluate("select $missing;", &parameters).unwrap_err();
        assert_eq!(error.status, proto::StatusCode::BadRequest);
    }

    #[test]
    fn test_syntax_errors() {
        assert!(evaluate("select from;", &HashMap::new()).is_err());
        assert!(evaluate("select ;", &HashMap::new()).is_err());
        assert!(evaluate("drop table t;", &HashMap::new()).is_err());
        assert_eq!(
            evaluate("upsert into t (a) values (1);", &HashMap::new()),
            Ok(Statement::Modification)
        );
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  SELECT 42; "), "select 42");
    }
}

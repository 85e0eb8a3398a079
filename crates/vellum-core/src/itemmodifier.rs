//! Field rewriting for UPDATE queries.
//!
//! Applies `SET` / `SET JSON` / `DROP` entries to one document. Set
//! expressions are evaluated against the current row: field references,
//! numeric literals, `serial()` and `now()` combined with `+ - * /`.

use serde_json::Value as Json;
use vellum_error::{Result, VellumError};
use vellum_query::{UpdateEntry, UpdateMode};
use vellum_types::cjson::value_to_json;
use vellum_types::Value;

use crate::item::get_at_path;

/// Rewrite `json` per the update entries.
pub fn apply_update_entries(
    mut json: Json,
    entries: &[UpdateEntry],
    mut serial: impl FnMut(&str) -> i64,
) -> Result<Json> {
    for entry in entries {
        match entry.mode {
            UpdateMode::Drop => {
                remove_at_path(&mut json, &entry.column);
            }
            UpdateMode::SetJson => {
                let Some(Value::Str(text)) = entry.values.first() else {
                    return Err(VellumError::Params(format!(
                        "SET JSON for '{}' expects a JSON string",
                        entry.column
                    )));
                };
                let node: Json = serde_json::from_str(text).map_err(|e| {
                    VellumError::Params(format!("SET JSON for '{}': {e}", entry.column))
                })?;
                set_at_path(&mut json, &entry.column, node);
            }
            UpdateMode::Set => {
                let node = if entry.is_expression {
                    let Some(Value::Str(expr)) = entry.values.first() else {
                        return Err(VellumError::Params(format!(
                            "expression for '{}' missing",
                            entry.column
                        )));
                    };
                    eval_expression(expr, &json, &entry.column, &mut serial)?
                } else if entry.values.len() == 1 {
                    value_to_json(&entry.values[0])
                } else {
                    Json::Array(entry.values.iter().map(value_to_json).collect())
                };
                set_at_path(&mut json, &entry.column, node);
            }
        }
    }
    Ok(json)
}

fn eval_expression(
    expr: &str,
    row: &Json,
    column: &str,
    serial: &mut impl FnMut(&str) -> i64,
) -> Result<Json> {
    let tokens: Vec<&str> = expr.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(VellumError::Params(format!(
            "empty expression for '{column}'"
        )));
    }
    let mut acc = operand(tokens[0], row, column, serial)?;
    let mut i = 1;
    while i + 1 < tokens.len() {
        let rhs = operand(tokens[i + 1], row, column, serial)?;
        acc = match tokens[i] {
            "+" => acc + rhs,
            "-" => acc - rhs,
            "*" => acc * rhs,
            "/" => {
                if rhs == 0.0 {
                    return Err(VellumError::QueryExec(format!(
                        "division by zero in expression for '{column}'"
                    )));
                }
                acc / rhs
            }
            other => {
                return Err(VellumError::Params(format!(
                    "unknown operator '{other}' in expression for '{column}'"
                )));
            }
        };
        i += 2;
    }
    if acc.fract() == 0.0 && acc.abs() < 9e15 {
        Ok(Json::from(acc as i64))
    } else {
        Ok(serde_json::Number::from_f64(acc).map_or(Json::Null, Json::Number))
    }
}

fn operand(
    token: &str,
    row: &Json,
    column: &str,
    serial: &mut impl FnMut(&str) -> i64,
) -> Result<f64> {
    if let Ok(n) = token.parse::<f64>() {
        return Ok(n);
    }
    match token {
        "serial" | "serial()" | "serial ( )" => Ok(serial(column) as f64),
        "now" | "now()" => Ok(std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as f64)
            .unwrap_or(0.0)),
        field => get_at_path(row, field)
            .and_then(Json::as_f64)
            .ok_or_else(|| {
                VellumError::QueryExec(format!(
                    "expression for '{column}' references non-numeric field '{field}'"
                ))
            }),
    }
}

fn set_at_path(json: &mut Json, path: &str, value: Json) {
    let mut node = json;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        let Some(obj) = node.as_object_mut() else {
            return;
        };
        if parts.peek().is_none() {
            obj.insert(part.to_owned(), value);
            return;
        }
        node = obj
            .entry(part.to_owned())
            .or_insert_with(|| Json::Object(serde_json::Map::new()));
    }
}

fn remove_at_path(json: &mut Json, path: &str) {
    let mut node = json;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        let Some(obj) = node.as_object_mut() else {
            return;
        };
        if parts.peek().is_none() {
            obj.remove(part);
            return;
        }
        match obj.get_mut(part) {
            Some(child) => node = child,
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set_entry(column: &str, value: Value) -> UpdateEntry {
        UpdateEntry {
            column: column.to_owned(),
            values: vec![value],
            mode: UpdateMode::Set,
            is_expression: false,
        }
    }

    #[test]
    fn test_set_and_drop() {
        let doc = json!({"a": 1, "b": 2});
        let entries = vec![
            set_entry("a", Value::Int(9)),
            UpdateEntry {
                column: "b".to_owned(),
                values: vec![],
                mode: UpdateMode::Drop,
                is_expression: false,
            },
        ];
        let out = apply_update_entries(doc, &entries, |_| 0).unwrap();
        assert_eq!(out, json!({"a": 9}));
    }

    #[test]
    fn test_set_nested_path() {
        let doc = json!({});
        let entries = vec![set_entry("nested.deep", Value::Int(1))];
        let out = apply_update_entries(doc, &entries, |_| 0).unwrap();
        assert_eq!(out, json!({"nested": {"deep": 1}}));
    }

    #[test]
    fn test_expression_increments_field() {
        let doc = json!({"counter": 41});
        let entries = vec![UpdateEntry {
            column: "counter".to_owned(),
            values: vec![Value::from("counter + 1")],
            mode: UpdateMode::Set,
            is_expression: true,
        }];
        let out = apply_update_entries(doc, &entries, |_| 0).unwrap();
        assert_eq!(out, json!({"counter": 42}));
    }

    #[test]
    fn test_set_json_parses_object() {
        let doc = json!({"a": 1});
        let entries = vec![UpdateEntry {
            column: "obj".to_owned(),
            values: vec![Value::from(r#"{"x": [1, 2]}"#)],
            mode: UpdateMode::SetJson,
            is_expression: false,
        }];
        let out = apply_update_entries(doc, &entries, |_| 0).unwrap();
        assert_eq!(out, json!({"a": 1, "obj": {"x": [1, 2]}}));
    }

    #[test]
    fn test_expression_division_by_zero() {
        let doc = json!({"a": 1});
        let entries = vec![UpdateEntry {
            column: "a".to_owned(),
            values: vec![Value::from("a / 0")],
            mode: UpdateMode::Set,
            is_expression: true,
        }];
        assert!(apply_update_entries(doc, &entries, |_| 0).is_err());
    }
}

//! Query text plus bound parameters, and the validation shared by every
//! execution mode.
//!
//! Parameters are referenced in query text as `$name`. References inside
//! string literals (`'...'`, `"..."`, `` `...` ``) and comments (`-- ...`,
//! `/* ... */`) are ignored.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::ClientError;
use crate::proto;
use crate::types::ProtoSerializable;
use crate::types::value::Value;

/// Parameter values keyed by name. Names always carry a leading `$`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: BTreeMap<String, Value>,
}

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` to `name`; `"id"` and `"$id"` name the same parameter.
    #[must_use]
    pub fn bind(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.values.insert(normalize_name(name), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(&normalize_name(name))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(&normalize_name(name))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    #[allow(clippy::disallowed_methods)] // the request keeps its params; the wire needs a copy
    pub(crate) fn to_proto_map(&self) -> HashMap<String, proto::TypedValue> {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str().to_owned(), value.clone().to_proto()))
            .collect()
    }
}

fn normalize_name(name: &str) -> String {
    if name.starts_with('$') {
        name.to_owned()
    } else {
        format!("${name}")
    }
}

/// An immutable query request.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    text: String,
    params: Params,
}

impl QueryRequest {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Params::new(),
        }
    }

    #[must_use]
    pub fn with_params(text: impl Into<String>, params: Params) -> Self {
        Self {
            text: text.into(),
            params,
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub const fn params(&self) -> &Params {
        &self.params
    }

    /// Check the request before anything is sent.
    ///
    /// # Errors
    ///
    /// - `InvalidQuery` if the text is empty or whitespace
    /// - `ParameterBinding` listing every referenced parameter without a value
    ///
    /// Bound values that the text never references are accepted.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.text.trim().is_empty() {
            return Err(ClientError::InvalidQuery(
                "query text must not be empty".to_string(),
            ));
        }

        let referenced = referenced_parameters(&self.text);
        let missing: Vec<String> = referenced
            .iter()
            .filter(|name| !self.params.contains(name))
            .map(|name| name.as_str().to_owned())
            .collect();
        if !missing.is_empty() {
            return Err(ClientError::ParameterBinding { missing });
        }

        let unused = self
            .params
            .names()
            .filter(|name| !referenced.contains(*name))
            .count();
        if unused > 0 {
            tracing::debug!("{unused} bound parameter(s) not referenced by the query");
        }
        Ok(())
    }
}

impl From<&str> for QueryRequest {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

/// Collect every `$name` referenced outside literals and comments.
#[must_use]
pub fn referenced_parameters(text: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let mut chars = text.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                // Backslash escapes the next character inside a literal.
                let mut escaped = false;
                for (_, inner) in chars.by_ref() {
                    if escaped {
                        escaped = false;
                    } else if inner == '\\' {
                        escaped = true;
                    } else if inner == c {
                        break;
                    }
                }
            }
            '-' if matches!(chars.peek(), Some((_, '-'))) => {
                for (_, inner) in chars.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                chars.next();
                let mut previous = '\0';
                for (_, inner) in chars.by_ref() {
                    if previous == '*' && inner == '/' {
                        break;
                    }
                    previous = inner;
                }
            }
            '$' => {
                let mut end = start + 1;
                while let Some(&(index, next)) = chars.peek() {
                    let valid = if index == start + 1 {
                        next.is_ascii_alphabetic() || next == '_'
                    } else {
                        next.is_ascii_alphanumeric() || next == '_'
                    };
                    if !valid {
                        break;
                    }
                    end = index + next.len_utf8();
                    chars.next();
                }
                if end > start + 1 {
                    names.insert(text[start..end].to_owned());
                }
            }
            _ => {}
        }
    }

    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_referenced_parameters_basic() {
        let names = referenced_parameters(
            "DECLARE $id AS Int32; SELECT * FROM users WHERE id = $id AND name = $user_name;",
        );
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["$id", "$user_name"]);
    }

    #[test]
    fn test_referenced_parameters_skip_literals_and_comments() {
        let text = "SELECT '$not_a_param', \"$nor_this\" -- $comment\n/* $block */ , $real;";
        let names: Vec<String> = referenced_parameters(text).into_iter().collect();
        assert_eq!(names, vec!["$real".to_string()]);
    }

    #[test]
    fn test_referenced_parameters_escaped_quote() {
        let text = r"SELECT 'it\'s $inside', $outside;";
        let names: Vec<String> = referenced_parameters(text).into_iter().collect();
        assert_eq!(names, vec!["$outside".to_string()]);
    }

    #[test]
    fn test_lone_dollar_is_not_a_parameter() {
        assert!(referenced_parameters("SELECT $ + 1, $1;").is_empty());
    }

    #[test]
    fn test_bind_normalizes_names() {
        let params = Params::new().bind("id", 1i32).bind("$name", "x");
        assert!(params.contains("$id"));
        assert!(params.contains("name"));
        assert_eq!(params.get("id"), Some(&Value::Int32(1)));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_validate_empty_text() {
        let error = QueryRequest::new("   ").validate().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidQuery);
    }

    #[test]
    fn test_validate_unbound_parameter() {
        let request = QueryRequest::with_params(
            "SELECT $a, $b;",
            Params::new().bind("a", 1i32),
        );
        let error = request.validate().unwrap_err();
        assert_eq!(
            error,
            ClientError::ParameterBinding {
                missing: vec!["$b".to_string()]
            }
        );
    }

    #[test]
    fn test_validate_allows_unused_bound_values() {
        let request = QueryRequest::with_params("SELECT 1;", Params::new().bind("extra", true));
        assert!(request.validate().is_ok());
    }
}

//! Structured diagnostics returned alongside a non-success status.

use crate::proto;
use crate::types::{ProtoDeserializable, ProtoSerializable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Error,
    Warning,
    Info,
}

/// One diagnostic entry; issues nest to carry context chains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub message: String,
    pub code: u32,
    pub severity: Severity,
    pub issues: Vec<Issue>,
}

impl Issue {
    /// An error-severity issue with no code and no children.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: 0,
            severity: Severity::Error,
            issues: Vec::new(),
        }
    }

    /// Whether this issue or any nested one is fatal or an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Fatal | Severity::Error)
            || self.issues.iter().any(Self::is_error)
    }
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if self.code != 0 {
            write!(f, " (code {})", self.code)?;
        }
        for nested in &self.issues {
            write!(f, " <- {nested}")?;
        }
        Ok(())
    }
}

impl ProtoDeserializable<proto::Issue> for Issue {
    fn from_proto(proto_issue: proto::Issue) -> Result<Self, String> {
        let severity = match proto::IssueSeverity::try_from(proto_issue.severity) {
            Ok(proto::IssueSeverity::Fatal) => Severity::Fatal,
            Ok(proto::IssueSeverity::Error) => Severity::Error,
            Ok(proto::IssueSeverity::Warning) => Severity::Warning,
            Ok(proto::IssueSeverity::Info) => Severity::Info,
            Err(_) => return Err(format!("unknown issue severity {}", proto_issue.severity)),
        };
        let issues = proto_issue
            .issues
            .into_iter()
            .map(Self::from_proto)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            message: proto_issue.message,
            code: proto_issue.code,
            severity,
            issues,
        })
    }
}

impl ProtoSerializable<proto::Issue> for Issue {
    fn to_proto(self) -> proto::Issue {
        let severity = match self.severity {
            Severity::Fatal => proto::IssueSeverity::Fatal,
            Severity::Error => proto::IssueSeverity::Error,
            Severity::Warning => proto::IssueSeverity::Warning,
            Severity::Info => proto::IssueSeverity::Info,
        };
        proto::Issue {
            message: self.message,
            code: self.code,
            severity: severity.into(),
            issues: self.issues.into_iter().map(ProtoSerializable::to_proto).collect(),
        }
    }
}

/// Convert a response's issue list, keeping unreadable entries as plain errors.
///
/// Issues are diagnostics; a malformed one must not hide the status it
/// accompanies.
#[must_use]
pub fn issues_from_proto(issues: Vec<proto::Issue>) -> Vec<Issue> {
    issues
        .into_iter()
        .map(|issue| {
            let message = issue.message.as_str().to_owned();
            Issue::from_proto(issue).unwrap_or_else(|e| Issue::error(format!("{message} ({e})")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_issue_display() {
        let mut issue = Issue::error("query failed");
        issue.code = 1030;
        issue.issues.push(Issue::error("table not found"));
        assert_eq!(
            issue.to_string(),
            "query failed (code 1030) <- table not found"
        );
    }

    #[test]
    fn test_is_error_looks_into_children() {
        let mut issue = Issue::error("wrapper");
        issue.severity = Severity::Info;
        assert!(!issue.is_error());
        issue.issues.push(Issue::error("inner"));
        assert!(issue.is_error());
    }

    #[test]
    fn test_unknown_severity_is_kept_as_error() {
        let issues = issues_from_proto(vec![proto::Issue {
            message: "odd".to_string(),
            code: 1,
            severity: 42,
            issues: Vec::new(),
        }]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Error);
        assert!(issues[0].message.starts_with("odd"));
    }
}

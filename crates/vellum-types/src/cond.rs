//! Condition and operator enums shared by the query layer and the indexes.

use serde::{Deserialize, Serialize};
use vellum_error::{Result, VellumError};

/// Predicate condition of one query entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CondType {
    /// Matches rows where the field has any value.
    Any,
    /// Matches rows where the field has no value (sparse/array only).
    Empty,
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    /// Two-value inclusive range.
    Range,
    /// Any of the listed values.
    Set,
    /// Every listed value present (array fields).
    AllSet,
    /// SQL LIKE with `%` and `_` wildcards.
    Like,
    /// Point within distance: values are `[x, y, distance]`.
    DWithin,
}

impl CondType {
    /// SQL spelling used by `Query::to_sql`.
    #[must_use]
    pub const fn sql_name(self) -> &'static str {
        match self {
            Self::Any => "IS NOT NULL",
            Self::Empty => "IS NULL",
            Self::Eq => "=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Range => "RANGE",
            Self::Set => "IN",
            Self::AllSet => "ALLSET",
            Self::Like => "LIKE",
            Self::DWithin => "ST_DWITHIN",
        }
    }

    /// DSL spelling (`"cond"` values in the JSON surface).
    #[must_use]
    pub const fn dsl_name(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Empty => "empty",
            Self::Eq => "eq",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Range => "range",
            Self::Set => "set",
            Self::AllSet => "allset",
            Self::Like => "like",
            Self::DWithin => "dwithin",
        }
    }

    pub fn from_dsl_name(name: &str) -> Result<Self> {
        Ok(match name {
            "any" => Self::Any,
            "empty" => Self::Empty,
            "eq" => Self::Eq,
            "lt" => Self::Lt,
            "le" => Self::Le,
            "gt" => Self::Gt,
            "ge" => Self::Ge,
            "range" => Self::Range,
            "set" => Self::Set,
            "allset" => Self::AllSet,
            "like" => Self::Like,
            "dwithin" => Self::DWithin,
            other => {
                return Err(VellumError::Parse(format!("unknown condition '{other}'")));
            }
        })
    }

    /// Number of values the condition requires, when fixed.
    #[must_use]
    pub const fn expected_values(self) -> Option<usize> {
        match self {
            Self::Any | Self::Empty => Some(0),
            Self::Eq | Self::Lt | Self::Le | Self::Gt | Self::Ge | Self::Like => Some(1),
            Self::Range => Some(2),
            Self::DWithin => Some(3),
            Self::Set | Self::AllSet => None,
        }
    }
}

/// Boolean operator chaining query entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpType {
    #[default]
    And,
    Or,
    Not,
}

impl OpType {
    #[must_use]
    pub const fn dsl_name(self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
        }
    }

    pub fn from_dsl_name(name: &str) -> Result<Self> {
        Ok(match name {
            "and" => Self::And,
            "or" => Self::Or,
            "not" => Self::Not,
            other => return Err(VellumError::Parse(format!("unknown operator '{other}'"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dsl_names_roundtrip() {
        for cond in [
            CondType::Any,
            CondType::Empty,
            CondType::Eq,
            CondType::Range,
            CondType::Set,
            CondType::AllSet,
            CondType::Like,
            CondType::DWithin,
        ] {
            assert_eq!(CondType::from_dsl_name(cond.dsl_name()).unwrap(), cond);
        }
    }
}

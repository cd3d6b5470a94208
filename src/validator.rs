//! Allow-list check for queries replayed from a remote descriptor.

use regex::Regex;
use std::sync::LazyLock;

static FORBIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(join|union|insert|update|delete)\b").expect("valid forbidden-keyword pattern")
});

/// Decides whether rendered query text may run against `table`.
pub trait QueryValidator: Send + Sync {
    fn validate(&self, rendered: &str, table: &str) -> bool;
}

/// Read-only, single-table policy.
///
/// Rejects any text containing the whole words `join`, `union`, `insert`,
/// `update` or `delete` in any case. Otherwise the text must contain a
/// lowercase `from` clause, as rendered queries spell it, whose target
/// contains `table`, so quoting and schema prefixes such as
/// `"shop"."items"` still match.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultValidator;

impl DefaultValidator {
    pub fn new() -> Self {
        Self
    }

    /// First forbidden keyword found in `rendered`, if any.
    pub fn forbidden_keyword(rendered: &str) -> Option<&str> {
        FORBIDDEN.find(rendered).map(|m| m.as_str())
    }

    fn scoped_to(rendered: &str, table: &str) -> bool {
        let pattern = format!(r"from\s+\S*{}\S*", regex::escape(table));
        match Regex::new(&pattern) {
            Ok(re) => re.is_match(rendered),
            Err(e) => {
                tracing::warn!("cannot build scope pattern for table '{}': {}", table, e);
                false
            }
        }
    }
}

impl QueryValidator for DefaultValidator {
    fn validate(&self, rendered: &str, table: &str) -> bool {
        if let Some(keyword) = Self::forbidden_keyword(rendered) {
            tracing::debug!("rejecting query with '{}': {}", keyword, rendered);
            return false;
        }
        Self::scoped_to(rendered, table)
    }
}

impl<F> QueryValidator for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn validate(&self, rendered: &str, table: &str) -> bool {
        self(rendered, table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_scoped_select() {
        let v = DefaultValidator::new();
        assert!(v.validate(r#"select * from "users""#, "users"));
        assert!(!v.validate(r#"select * from "users""#, "orders"));
        assert!(v.validate(r#"select "id" from "shop"."users" where "age" > 1"#, "users"));
    }

    #[test]
    fn test_scope_keyword_is_lowercase() {
        let v = DefaultValidator::new();
        assert!(v.validate(r#"SELECT * from users"#, "users"));
        assert!(!v.validate(r#"SELECT * FROM users"#, "users"));
    }

    #[test]
    fn test_rejects_forbidden_keywords_in_any_case() {
        let v = DefaultValidator::new();
        let rejected = [
            r#"delete from "users""#,
            r#"select * from "users" inner JOIN "x" on "a" = "b""#,
            r#"select * from "users" Union select * from "users""#,
            r#"INSERT into "users" default values"#,
            r#"update "users" set "a" = 1 from "users""#,
        ];
        for sql in rejected {
            assert!(!v.validate(sql, "users"), "accepted: {}", sql);
        }
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        let v = DefaultValidator::new();
        assert!(v.validate(r#"select "updated_at", "joined" from "users""#, "users"));
        assert_eq!(DefaultValidator::forbidden_keyword("select updated_at"), None);
        assert_eq!(DefaultValidator::forbidden_keyword("a left join b"), Some("join"));
    }

    #[test]
    fn test_table_name_is_literal() {
        let v = DefaultValidator::new();
        assert!(!v.validate(r#"select * from "usersXs""#, "users.s"));
        assert!(v.validate(r#"select * from "users.s""#, "users.s"));
    }

    #[test]
    fn test_closure_validator() {
        let only_counts = |sql: &str, _table: &str| sql.starts_with("select count");
        assert!(only_counts.validate("select count(*) from t", "t"));
        assert!(!only_counts.validate("select * from t", "t"));
    }
}

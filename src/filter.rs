//! Shared filter vocabulary and dynamic query assembly.
//!
//! Every record kind exposes a declarative filter object: a bag of optional
//! predicates that are ANDed together. This module provides the common
//! combinators that translate those predicates into WHERE fragments with
//! bound positional parameters:
//!
//! - set membership (`IN (...)`)
//! - hierarchical prefix match (`LIKE 'prefix%'`)
//! - substring containment (`LIKE '%needle%'`)
//! - space-delimited tag match (`LIKE '% tag %'`, OR-combined)

use rusqlite::ToSql;

/// Incrementally built SQL statement with its bound parameters.
///
/// Fragments are appended as text; values are bound through `?` placeholders
/// so filter contents never reach the SQL string itself.
pub struct QueryBuilder {
    sql: String,
    params: Vec<Box<dyn ToSql>>,
}

impl QueryBuilder {
    pub fn new(initial: impl Into<String>) -> Self {
        QueryBuilder {
            sql: initial.into(),
            params: Vec::new(),
        }
    }

    /// Append a raw SQL fragment.
    pub fn push_sql(&mut self, fragment: &str) {
        self.sql.push_str(fragment);
    }

    /// Bind one positional parameter for a `?` already present in the SQL.
    pub fn push_param<T: ToSql + 'static>(&mut self, value: T) {
        self.params.push(Box::new(value));
    }

    /// Bind one already boxed parameter (re-binding a nested query's params).
    pub fn push_boxed_param(&mut self, value: Box<dyn ToSql>) {
        self.params.push(value);
    }

    /// Consume the builder, yielding its bound parameters in order.
    pub fn into_params(self) -> Vec<Box<dyn ToSql>> {
        self.params
    }

    /// `AND column IN (?, ?, ...)` — no-op on an empty value list.
    pub fn and_in<T: ToSql + Clone + 'static>(&mut self, column: &str, values: &[T]) {
        if values.is_empty() {
            return;
        }
        self.sql.push_str(" AND ");
        self.sql.push_str(column);
        self.sql.push_str(" IN (");
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                self.sql.push(',');
            }
            self.sql.push('?');
            self.params.push(Box::new(value.clone()));
        }
        self.sql.push(')');
    }

    /// `AND column IN (...)` over the lowercase names of a set of states.
    pub fn and_in_states<E: AsRef<str>>(&mut self, column: &str, values: &[E]) {
        let names: Vec<String> = values.iter().map(|v| v.as_ref().to_string()).collect();
        self.and_in(column, &names);
    }

    /// `AND column LIKE 'prefix%'` — hierarchical path containment.
    pub fn and_prefix(&mut self, column: &str, prefix: &str) {
        self.sql.push_str(" AND ");
        self.sql.push_str(column);
        self.sql.push_str(" LIKE ?");
        self.params.push(Box::new(format!("{prefix}%")));
    }

    /// `AND column LIKE '%needle%'` — substring containment.
    pub fn and_contains(&mut self, column: &str, needle: &str) {
        self.sql.push_str(" AND ");
        self.sql.push_str(column);
        self.sql.push_str(" LIKE ?");
        self.params.push(Box::new(format!("%{needle}%")));
    }

    /// `AND (column LIKE '% a %' OR column LIKE '% b %')` — membership in a
    /// space-delimited tag column. No-op on an empty tag list.
    pub fn and_any_tag(&mut self, column: &str, tags: &[String]) {
        if tags.is_empty() {
            return;
        }
        self.sql.push_str(" AND (");
        for (i, tag) in tags.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(" OR ");
            }
            self.sql.push_str(column);
            self.sql.push_str(" LIKE ?");
            self.params.push(Box::new(format!("% {tag} %")));
        }
        self.sql.push(')');
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parameter references in bind order, ready for `Statement::query`.
    pub fn param_refs(&self) -> Vec<&dyn ToSql> {
        self.params.iter().map(|p| p.as_ref()).collect()
    }
}

impl std::fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("sql", &self.sql)
            .field("params", &self.params.len())
            .finish()
    }
}

/// Declarative predicate bag of one record kind.
///
/// `apply` appends the filter's predicates (each starting with ` AND `) to a
/// query whose WHERE clause already holds the time predicate.
pub trait ItemFilter: std::fmt::Debug + Clone + Send + Sync + 'static {
    fn apply(&self, query: &mut QueryBuilder);
}

//! Filter-to-table query planning.
//!
//! A [`Filter`] is routed to the most selective table or view by its shape,
//! then turned into an ordered list of [`Predicate`]s. Values are never spliced
//! into SQL: every value is a [`Param`] bound by the client at execution time,
//! and SQL text is produced only by [`QueryPlan::select_statement`] and
//! [`QueryPlan::count_statement`].
//!
//! # Routing
//!
//! First match wins:
//!
//! 1. ids present → `events`
//! 2. authors present → `events_by_author`
//! 3. kinds present → `events_by_kind`
//! 4. exactly one tag name constrained, and it is indexed → `events_by_tag_<name>`
//! 5. otherwise → `events`
//!
//! A tag view only carries the value column for its own tag name, so a filter
//! on two tag names never routes to one.

use std::fmt;

use pensieve_core::{Filter, TagName};

use crate::error::{Error, Result};

/// Hard cap on rows returned by one query, also the default page size.
pub const MAX_LIMIT: u32 = 5000;

/// Columns returned by every event query, in [`QueryRow`](crate::store::QueryRow) order.
const SELECT_COLUMNS: &str =
    "id, pubkey, created_at, kind, content, sig, toJSONString(tags) AS tags_json";

/// Physical table or view a query runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Base table keyed by event id.
    Events,
    /// Projection ordered by author.
    ByAuthor,
    /// Projection ordered by kind.
    ByKind,
    /// One row per (event, tag value) for a single tag name.
    ByTag(TagName),
}

impl Table {
    /// Table name without the database prefix.
    pub fn name(self) -> &'static str {
        match self {
            Self::Events => "events",
            Self::ByAuthor => "events_by_author",
            Self::ByKind => "events_by_kind",
            Self::ByTag(TagName::E) => "events_by_tag_e",
            Self::ByTag(TagName::P) => "events_by_tag_p",
            Self::ByTag(TagName::A) => "events_by_tag_a",
            Self::ByTag(TagName::T) => "events_by_tag_t",
            Self::ByTag(TagName::D) => "events_by_tag_d",
            Self::ByTag(TagName::G) => "events_by_tag_g",
            Self::ByTag(TagName::R) => "events_by_tag_r",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Column a predicate applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Id,
    Pubkey,
    Kind,
    CreatedAt,
    Content,
    Deleted,
    /// Full two-level tag array.
    Tags,
    /// Per-name projection on full-width tables (`tag_e`, ...). `tag_d` is a
    /// single string; the others are arrays.
    Tag(TagName),
    /// Singular value column of a tag view (`tag_e_value`, ...).
    TagValue(TagName),
}

impl Column {
    /// Column name as it appears in the schema.
    pub fn name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Pubkey => "pubkey",
            Self::Kind => "kind",
            Self::CreatedAt => "created_at",
            Self::Content => "content",
            Self::Deleted => "deleted",
            Self::Tags => "tags",
            Self::Tag(TagName::E) => "tag_e",
            Self::Tag(TagName::P) => "tag_p",
            Self::Tag(TagName::A) => "tag_a",
            Self::Tag(TagName::T) => "tag_t",
            Self::Tag(TagName::D) => "tag_d",
            Self::Tag(TagName::G) => "tag_g",
            Self::Tag(TagName::R) => "tag_r",
            Self::TagValue(TagName::E) => "tag_e_value",
            Self::TagValue(TagName::P) => "tag_p_value",
            Self::TagValue(TagName::A) => "tag_a_value",
            Self::TagValue(TagName::T) => "tag_t_value",
            Self::TagValue(TagName::D) => "tag_d_value",
            Self::TagValue(TagName::G) => "tag_g_value",
            Self::TagValue(TagName::R) => "tag_r_value",
        }
    }
}

/// A value bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Str(String),
    UInt(u64),
    /// Bound as an array literal.
    StrArray(Vec<String>),
}

/// Operator and bound value(s) of a predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// `col = ?`
    Eq(Param),
    /// `col IN (?, ?, ...)`, one placeholder per element.
    In(Vec<Param>),
    /// `col >= ?`
    AtLeast(Param),
    /// `col <= ?`
    AtMost(Param),
    /// `hasAny(col, ?)` against an array column.
    HasAny(Param),
    /// `hasToken(col, ?)`
    HasToken(Param),
    /// `position(col, ?) > 0`
    Contains(Param),
    /// Some entry of the tag array has the given name and one of the values.
    TagEntry { name: Param, values: Param },
}

/// One `(column, operator, value)` constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub column: Column,
    pub condition: Condition,
}

impl Predicate {
    pub fn new(column: Column, condition: Condition) -> Self {
        Self { column, condition }
    }

    /// Append this predicate's SQL to `sql` and its values to `params`.
    fn render(&self, sql: &mut String, params: &mut Vec<Param>) -> Result<()> {
        let col = self.column.name();
        match &self.condition {
            Condition::Eq(value) => {
                sql.push_str(col);
                sql.push_str(" = ?");
                params.push(value.clone());
            }
            Condition::In(values) => {
                if values.is_empty() {
                    return Err(Error::Preparation(format!("empty IN list for {col}")));
                }
                sql.push_str(col);
                sql.push_str(" IN (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    sql.push('?');
                    params.push(value.clone());
                }
                sql.push(')');
            }
            Condition::AtLeast(value) => {
                sql.push_str(col);
                sql.push_str(" >= ?");
                params.push(value.clone());
            }
            Condition::AtMost(value) => {
                sql.push_str(col);
                sql.push_str(" <= ?");
                params.push(value.clone());
            }
            Condition::HasAny(value) => {
                sql.push_str("hasAny(");
                sql.push_str(col);
                sql.push_str(", ?)");
                params.push(value.clone());
            }
            Condition::HasToken(value) => {
                sql.push_str("hasToken(");
                sql.push_str(col);
                sql.push_str(", ?)");
                params.push(value.clone());
            }
            Condition::Contains(value) => {
                sql.push_str("position(");
                sql.push_str(col);
                sql.push_str(", ?) > 0");
                params.push(value.clone());
            }
            Condition::TagEntry { name, values } => {
                sql.push_str("arrayExists(t -> t[1] = ? AND has(?, t[2]), ");
                sql.push_str(col);
                sql.push(')');
                params.push(name.clone());
                params.push(values.clone());
            }
        }
        Ok(())
    }
}

/// Rendered SQL with its parameters in placeholder order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

/// Routing decision for one filter.
///
/// Computed fresh per query; plans are never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    pub table: Table,
    pub predicates: Vec<Predicate>,
    /// Effective row cap, always in `1..=MAX_LIMIT`.
    pub limit: u32,
}

impl QueryPlan {
    /// Whether the plan constrains nothing beyond the soft-delete flag.
    pub fn is_unconstrained(&self) -> bool {
        self.predicates
            .iter()
            .all(|p| p.column == Column::Deleted)
    }

    /// Render the row query. Results are always newest first.
    pub fn select_statement(&self, database: &str) -> Result<Statement> {
        let mut sql = String::with_capacity(512);
        sql.push_str("SELECT ");
        sql.push_str(SELECT_COLUMNS);
        sql.push_str(" FROM ");
        self.push_from(&mut sql, database);
        let params = self.push_where(&mut sql)?;
        sql.push_str(" ORDER BY created_at DESC LIMIT ");
        sql.push_str(&self.limit.to_string());
        Ok(Statement { sql, params })
    }

    /// Render the distinct-id count query.
    ///
    /// `approximate` selects `uniq` over `uniqExact`. The row cap does not
    /// apply to counts.
    pub fn count_statement(&self, database: &str, approximate: bool) -> Result<Statement> {
        let mut sql = String::with_capacity(256);
        sql.push_str(if approximate {
            "SELECT uniq(id) FROM "
        } else {
            "SELECT uniqExact(id) FROM "
        });
        self.push_from(&mut sql, database);
        let params = self.push_where(&mut sql)?;
        Ok(Statement { sql, params })
    }

    fn push_from(&self, sql: &mut String, database: &str) {
        if !database.is_empty() {
            sql.push_str(database);
            sql.push('.');
        }
        sql.push_str(self.table.name());
        sql.push_str(" FINAL");
    }

    fn push_where(&self, sql: &mut String) -> Result<Vec<Param>> {
        let mut params = Vec::new();
        for (i, predicate) in self.predicates.iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            predicate.render(sql, &mut params)?;
        }
        Ok(params)
    }
}

/// Pick the table for a filter.
///
/// Priority is ids, then authors, then kinds, then a lone recognized tag name.
/// The author and kind views hold full rows, tag arrays included, so a filter
/// with several tag names and an author or kind still uses that view. A tag
/// view is chosen only when nothing else narrows the filter.
pub fn route(filter: &Filter) -> Table {
    if !filter.ids.is_empty() {
        Table::Events
    } else if !filter.authors.is_empty() {
        Table::ByAuthor
    } else if !filter.kinds.is_empty() {
        Table::ByKind
    } else if let Some(name) = filter.tags.single_known() {
        Table::ByTag(name)
    } else {
        Table::Events
    }
}

/// Clamp a requested limit: zero, absent, or above [`MAX_LIMIT`] becomes `MAX_LIMIT`.
pub fn effective_limit(limit: Option<u32>) -> u32 {
    match limit {
        Some(n) if n > 0 && n <= MAX_LIMIT => n,
        _ => MAX_LIMIT,
    }
}

/// Build the routing decision and predicates for a filter.
pub fn plan(filter: &Filter) -> QueryPlan {
    let table = route(filter);
    let mut predicates = vec![Predicate::new(Column::Deleted, Condition::Eq(Param::UInt(0)))];

    if !filter.ids.is_empty() {
        predicates.push(Predicate::new(Column::Id, Condition::In(strs(&filter.ids))));
    }
    if !filter.authors.is_empty() {
        predicates.push(Predicate::new(
            Column::Pubkey,
            Condition::In(strs(&filter.authors)),
        ));
    }
    if !filter.kinds.is_empty() {
        let kinds = filter
            .kinds
            .iter()
            .map(|&k| Param::UInt(u64::from(k)))
            .collect();
        predicates.push(Predicate::new(Column::Kind, Condition::In(kinds)));
    }

    if let Some(since) = filter.since {
        predicates.push(Predicate::new(
            Column::CreatedAt,
            Condition::AtLeast(Param::UInt(u64::from(since))),
        ));
    }
    if let Some(until) = filter.until {
        predicates.push(Predicate::new(
            Column::CreatedAt,
            Condition::AtMost(Param::UInt(u64::from(until))),
        ));
    }

    for name in filter.tags.known_names() {
        let values = filter.tags.get(name);
        let predicate = if table == Table::ByTag(name) {
            Predicate::new(Column::TagValue(name), Condition::In(strs(values)))
        } else if name == TagName::D {
            // tag_d is stored as a single string.
            Predicate::new(Column::Tag(name), Condition::In(strs(values)))
        } else {
            Predicate::new(
                Column::Tag(name),
                Condition::HasAny(Param::StrArray(values.to_vec())),
            )
        };
        predicates.push(predicate);
    }

    for (name, values) in filter.tags.overflow() {
        predicates.push(Predicate::new(
            Column::Tags,
            Condition::TagEntry {
                name: Param::Str(name.clone()),
                values: Param::StrArray(values.clone()),
            },
        ));
    }

    if let Some(term) = filter.search.as_deref() {
        push_search(&mut predicates, term);
    }

    QueryPlan {
        table,
        predicates,
        limit: effective_limit(filter.limit),
    }
}

/// Split a search term into `hasToken` predicates.
///
/// `hasToken` rejects needles containing separators, so the term is split on
/// anything that is not alphanumeric. A term with no tokens falls back to a
/// substring match.
fn push_search(predicates: &mut Vec<Predicate>, term: &str) {
    let mut tokens: Vec<&str> = Vec::new();
    for token in term.split(|c: char| !c.is_alphanumeric()) {
        if !token.is_empty() && !tokens.contains(&token) {
            tokens.push(token);
        }
    }

    if tokens.is_empty() {
        let term = term.trim();
        if !term.is_empty() {
            predicates.push(Predicate::new(
                Column::Content,
                Condition::Contains(Param::Str(term.to_string())),
            ));
        }
        return;
    }

    for token in tokens {
        predicates.push(Predicate::new(
            Column::Content,
            Condition::HasToken(Param::Str(token.to_string())),
        ));
    }
}

fn strs(values: &[String]) -> Vec<Param> {
    values.iter().cloned().map(Param::Str).collect()
}

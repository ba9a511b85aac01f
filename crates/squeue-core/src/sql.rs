//! Parameterized SQL construction.
//!
//! Identifiers are validated once and rendered verbatim; values are always
//! bound through dialect placeholders.

use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use crate::dialect::{Dialect, RowLock};
use crate::predicate::Predicate;
use crate::value::{Record, Value};
use crate::{Error, Result};

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

const MAX_IDENT_LEN: usize = 63;

/// A validated SQL identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ident(String);

impl Ident {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.len() > MAX_IDENT_LEN || !IDENT_RE.is_match(&name) {
            return Err(Error::InvalidIdentifier(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A table name, optionally qualified by its schema (`schema.table`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableName {
    schema: Option<Ident>,
    name: Ident,
}

impl TableName {
    pub fn parse(qualified: &str) -> Result<Self> {
        match qualified.split_once('.') {
            Some((schema, name)) => Ok(Self {
                schema: Some(Ident::new(schema)?),
                name: Ident::new(name)?,
            }),
            None => Ok(Self {
                schema: None,
                name: Ident::new(qualified)?,
            }),
        }
    }

    pub fn schema(&self) -> Option<&Ident> {
        self.schema.as_ref()
    }

    /// Unqualified table name.
    pub fn name(&self) -> &Ident {
        &self.name
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// SQL text with its bound parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    /// A statement without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// Incrementally builds a [`Statement`] for one dialect.
#[derive(Debug)]
pub struct QueryBuilder {
    dialect: Dialect,
    sql: String,
    params: Vec<Value>,
}

impl QueryBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn push(&mut self, sql: impl fmt::Display) -> &mut Self {
        use fmt::Write;
        let _ = write!(self.sql, "{sql}");
        self
    }

    /// Bind a value. NULL is written as a literal so that untyped nulls do
    /// not trip strict parameter typing.
    pub fn push_bind(&mut self, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        if value.is_null() {
            self.sql.push_str("NULL");
            return self;
        }
        self.params.push(value);
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
        self
    }

    /// Bind a parenthesized, comma separated list of values.
    pub fn push_bind_list<I, V>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.sql.push('(');
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.push_bind(value);
        }
        self.sql.push(')');
        self
    }

    /// The store clock.
    pub fn push_now(&mut self) -> &mut Self {
        self.sql.push_str(self.dialect.now());
        self
    }

    /// Store time minus `age`.
    pub fn push_cutoff(&mut self, age: Duration) -> &mut Self {
        self.params.push(self.dialect.cutoff_param(age));
        let placeholder = self.dialect.placeholder(self.params.len());
        let expr = self.dialect.cutoff(&placeholder);
        self.sql.push_str(&expr);
        self
    }

    /// Row-lock suffix for a `SELECT`, empty when the dialect has none.
    pub fn push_row_lock(&mut self) -> &mut Self {
        if self.dialect.row_lock() == RowLock::SkipLocked {
            self.sql.push_str(" FOR UPDATE SKIP LOCKED");
        }
        self
    }

    pub fn push_predicate(&mut self, predicate: &Predicate) -> Result<&mut Self> {
        match predicate {
            Predicate::Eq(column, value) => self.push_comparison(column, "=", value)?,
            Predicate::NotEq(column, value) => self.push_comparison(column, "<>", value)?,
            Predicate::Lt(column, value) => self.push_comparison(column, "<", value)?,
            Predicate::Le(column, value) => self.push_comparison(column, "<=", value)?,
            Predicate::Gt(column, value) => self.push_comparison(column, ">", value)?,
            Predicate::Ge(column, value) => self.push_comparison(column, ">=", value)?,
            Predicate::In(column, values) => {
                let column = Ident::new(column.as_str())?;
                if values.is_empty() {
                    self.push("1 = 0");
                } else {
                    self.push(column).push(" IN ").push_bind_list(values.iter().cloned());
                }
            }
            Predicate::IsNull(column) => {
                let column = Ident::new(column.as_str())?;
                self.push(column).push(" IS NULL");
            }
            Predicate::IsNotNull(column) => {
                let column = Ident::new(column.as_str())?;
                self.push(column).push(" IS NOT NULL");
            }
            Predicate::And(parts) => self.push_junction(parts, " AND ", "1 = 1")?,
            Predicate::Or(parts) => self.push_junction(parts, " OR ", "1 = 0")?,
            Predicate::Not(inner) => {
                self.push("NOT (");
                self.push_predicate(inner)?;
                self.push(")");
            }
        }
        Ok(self)
    }

    fn push_comparison(&mut self, column: &str, op: &str, value: &Value) -> Result<()> {
        let column = Ident::new(column)?;
        if value.is_null() {
            return Err(Error::InvalidInput(format!(
                "comparison of {column} against NULL; use IsNull/IsNotNull"
            )));
        }
        self.push(column).push(" ").push(op).push(" ").push_bind(value.clone());
        Ok(())
    }

    fn push_junction(&mut self, parts: &[Predicate], joiner: &str, empty: &str) -> Result<()> {
        if parts.is_empty() {
            self.push(empty);
            return Ok(());
        }
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                self.push(joiner);
            }
            self.push("(");
            self.push_predicate(part)?;
            self.push(")");
        }
        Ok(())
    }

    pub fn build(self) -> Statement {
        Statement {
            sql: self.sql,
            params: self.params,
        }
    }
}

/// Build the `INSERT` statements that append `rows` to `table`.
///
/// The column list is the union of all record keys; records lacking a column
/// insert NULL for it. Batches are split to stay under the dialect's bind
/// parameter ceiling.
pub fn insert_statements(
    dialect: Dialect,
    table: &TableName,
    rows: &[Record],
) -> Result<Vec<Statement>> {
    let names: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.keys().map(String::as_str))
        .collect();
    let columns = names
        .into_iter()
        .map(Ident::new)
        .collect::<Result<Vec<_>>>()?;

    if columns.is_empty() {
        return Ok(rows
            .iter()
            .map(|_| Statement::raw(format!("INSERT INTO {table} DEFAULT VALUES")))
            .collect());
    }

    let column_list = columns
        .iter()
        .map(Ident::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    let rows_per_statement = (dialect.max_bind_params() / columns.len()).max(1);

    let mut statements = Vec::new();
    for chunk in rows.chunks(rows_per_statement) {
        let mut qb = QueryBuilder::new(dialect);
        qb.push(format_args!("INSERT INTO {table} ({column_list}) VALUES "));
        for (i, row) in chunk.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push_bind_list(
                columns
                    .iter()
                    .map(|column| row.get(column.as_str()).cloned().unwrap_or(Value::Null)),
            );
        }
        statements.push(qb.build());
    }
    Ok(statements)
}

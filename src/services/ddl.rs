//! Rendering of every statement the provisioner sends to PostgreSQL.
//!
//! Identifiers are always quoted with [`quote_ident`] and values with
//! [`quote_literal`], so names taken from CSV headers or configuration can
//! never change the shape of a statement.

use std::fmt;

use super::names::{qualified, quote_ident, quote_literal};
use crate::models::{ColumnSpec, ColumnType, RoleCredentials, TablePrivilege, TableSchema};

/// A SQL statement plus the text used for it in logs. The two only differ
/// when the SQL carries a secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub label: String,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        Self { label: sql.clone(), sql }
    }

    pub fn redacted(sql: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            label: label.into(),
        }
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Statement({})", self.label)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

pub fn column_type_sql(schema: &str, column_type: &ColumnType) -> String {
    match column_type {
        ColumnType::Integer => "INTEGER".to_string(),
        ColumnType::BigInt => "BIGINT".to_string(),
        ColumnType::Numeric => "NUMERIC".to_string(),
        ColumnType::Boolean => "BOOLEAN".to_string(),
        ColumnType::Date => "DATE".to_string(),
        ColumnType::Timestamp => "TIMESTAMP".to_string(),
        ColumnType::Varchar { length } => format!("VARCHAR({})", length),
        ColumnType::Text => "TEXT".to_string(),
        ColumnType::Enum { type_name, .. } => qualified(schema, type_name),
    }
}

pub fn database_exists(database: &str) -> Statement {
    Statement::new(format!(
        "SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = {})",
        quote_literal(database)
    ))
}

pub fn create_database(database: &str) -> Statement {
    Statement::new(format!("CREATE DATABASE {}", quote_ident(database)))
}

pub fn create_schema(schema: &str) -> Statement {
    Statement::new(format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema)))
}

pub fn drop_table(schema: &str, table: &str) -> Statement {
    Statement::new(format!("DROP TABLE IF EXISTS {}", qualified(schema, table)))
}

pub fn drop_type(schema: &str, type_name: &str) -> Statement {
    Statement::new(format!("DROP TYPE IF EXISTS {}", qualified(schema, type_name)))
}

pub fn create_enum(schema: &str, type_name: &str, labels: &[String]) -> Statement {
    let labels = labels
        .iter()
        .map(|label| quote_literal(label))
        .collect::<Vec<_>>()
        .join(", ");
    Statement::new(format!(
        "CREATE TYPE {} AS ENUM ({})",
        qualified(schema, type_name),
        labels
    ))
}

/// Drops the table, then every enum type it uses, then recreates both.
pub fn table_statements(table: &TableSchema) -> Vec<Statement> {
    let mut statements = vec![drop_table(&table.schema, &table.table)];

    for column in table.enum_columns() {
        if let ColumnType::Enum { type_name, labels } = &column.column_type {
            statements.push(drop_type(&table.schema, type_name));
            statements.push(create_enum(&table.schema, type_name, labels));
        }
    }

    statements.push(create_table(table));
    statements
}

pub fn create_table(table: &TableSchema) -> Statement {
    let columns = table
        .columns
        .iter()
        .map(|column| {
            format!(
                "    {} {}",
                quote_ident(&column.name),
                column_type_sql(&table.schema, &column.column_type)
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");

    Statement::new(format!(
        "CREATE TABLE {} (\n{}\n)",
        qualified(&table.schema, &table.table),
        columns
    ))
}

/// Inference treats every empty field as NULL, but plain `COPY ... CSV` keeps
/// a quoted `""` as an empty string. `FORCE_NULL` makes the two agree for the
/// columns where an empty string is not a valid value.
pub fn copy_from_stdin(table: &TableSchema, delimiter: u8, quote: u8) -> Statement {
    let columns = column_list(&table.columns);
    let force_null: Vec<&ColumnSpec> = table
        .columns
        .iter()
        .filter(|c| !matches!(c.column_type, ColumnType::Varchar { .. } | ColumnType::Text))
        .collect();

    let mut options = format!(
        "FORMAT csv, HEADER true, DELIMITER {}, QUOTE {}",
        quote_literal(&(delimiter as char).to_string()),
        quote_literal(&(quote as char).to_string()),
    );
    if !force_null.is_empty() {
        let names = force_null.iter().map(|c| quote_ident(&c.name)).collect::<Vec<_>>();
        options.push_str(&format!(", FORCE_NULL ({})", names.join(", ")));
    }

    Statement::new(format!(
        "COPY {} ({}) FROM STDIN WITH ({})",
        qualified(&table.schema, &table.table),
        columns,
        options
    ))
}

fn column_list(columns: &[ColumnSpec]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn count_rows(schema: &str, table: &str) -> Statement {
    Statement::new(format!("SELECT count(*) FROM {}", qualified(schema, table)))
}

pub fn role_exists(role: &str) -> Statement {
    Statement::new(format!(
        "SELECT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = {})",
        quote_literal(role)
    ))
}

pub fn create_group(group: &str) -> Statement {
    Statement::new(format!("CREATE ROLE {} NOLOGIN", quote_ident(group)))
}

pub fn create_user(user: &RoleCredentials) -> Statement {
    let role = quote_ident(&user.name);
    Statement::redacted(
        format!("CREATE ROLE {} LOGIN PASSWORD {}", role, quote_literal(&user.password)),
        format!("CREATE ROLE {} LOGIN PASSWORD '********'", role),
    )
}

pub fn alter_user_password(user: &RoleCredentials) -> Statement {
    let role = quote_ident(&user.name);
    Statement::redacted(
        format!("ALTER ROLE {} WITH LOGIN PASSWORD {}", role, quote_literal(&user.password)),
        format!("ALTER ROLE {} WITH LOGIN PASSWORD '********'", role),
    )
}

pub fn grant_membership(group: &str, user: &str) -> Statement {
    Statement::new(format!("GRANT {} TO {}", quote_ident(group), quote_ident(user)))
}

pub fn revoke_public(database: &str, schema: &str) -> Vec<Statement> {
    vec![
        Statement::new(format!("REVOKE ALL ON DATABASE {} FROM PUBLIC", quote_ident(database))),
        Statement::new(format!("REVOKE ALL ON SCHEMA {} FROM PUBLIC", quote_ident(schema))),
    ]
}

/// Grants `privileges` on every current and future table of `schema`.
pub fn grant_group(
    database: &str,
    schema: &str,
    group: &str,
    privileges: &[TablePrivilege],
) -> Vec<Statement> {
    let group = quote_ident(group);
    let schema = quote_ident(schema);
    let privileges = privileges
        .iter()
        .map(|p| p.as_sql())
        .collect::<Vec<_>>()
        .join(", ");

    vec![
        Statement::new(format!("GRANT CONNECT ON DATABASE {} TO {}", quote_ident(database), group)),
        Statement::new(format!("GRANT USAGE ON SCHEMA {} TO {}", schema, group)),
        Statement::new(format!(
            "GRANT {} ON ALL TABLES IN SCHEMA {} TO {}",
            privileges, schema, group
        )),
        Statement::new(format!(
            "ALTER DEFAULT PRIVILEGES IN SCHEMA {} GRANT {} ON TABLES TO {}",
            schema, privileges, group
        )),
    ]
}

pub fn has_table_privilege(role: &str, schema: &str, table: &str, privilege: TablePrivilege) -> Statement {
    Statement::new(format!(
        "SELECT has_table_privilege({}, {}, {})",
        quote_literal(role),
        quote_literal(&qualified(schema, table)),
        quote_literal(privilege.as_sql())
    ))
}

pub fn is_member(user: &str, group: &str) -> Statement {
    Statement::new(format!(
        "SELECT pg_has_role({}, {}, 'MEMBER')",
        quote_literal(user),
        quote_literal(group)
    ))
}

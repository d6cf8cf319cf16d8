use std::collections::HashSet;

/// PostgreSQL truncates identifiers longer than this many bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

pub fn clean_column_name(name: &str, existing_names: &mut HashSet<String>) -> String {
    let base_name = sanitize(name);

    let cleaned = if base_name.chars().next().map_or(true, |c| !c.is_ascii_alphabetic()) {
        truncate(format!("col_{}", base_name))
    } else {
        base_name
    };

    with_unique_suffix(cleaned, existing_names)
}

pub fn clean_table_name(name: &str) -> String {
    let cleaned = sanitize(name);

    if cleaned.chars().next().map_or(true, |c| !c.is_ascii_alphabetic()) {
        truncate(format!("tbl_{}", cleaned))
    } else {
        cleaned
    }
}

/// Name of the enum type backing `column` of `table`.
///
/// The table prefix is shortened first so the column part survives the
/// 63-byte limit, and `existing_names` keeps the result unique.
pub fn enum_type_name(table: &str, column: &str, existing_names: &mut HashSet<String>) -> String {
    let column = sanitize(column);
    let mut prefix = clean_table_name(table);
    prefix.truncate(MAX_IDENTIFIER_LEN.saturating_sub(column.len() + 1));

    let base_name = if prefix.is_empty() {
        column
    } else {
        format!("{}_{}", prefix, column)
    };

    with_unique_suffix(base_name, existing_names)
}

/// Double-quotes an identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `"schema"."name"`
pub fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

/// Single-quotes a string literal, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn sanitize(name: &str) -> String {
    let cleaned = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect::<String>()
        .to_lowercase();

    truncate(cleaned)
}

// If the name already exists, add a numeric suffix
fn with_unique_suffix(name: String, existing_names: &mut HashSet<String>) -> String {
    let mut candidate = name.clone();
    let mut counter = 1;
    while !existing_names.insert(candidate.clone()) {
        let suffix = format!("_{}", counter);
        let mut stem = name.clone();
        stem.truncate(MAX_IDENTIFIER_LEN - suffix.len());
        candidate = format!("{}{}", stem, suffix);
        counter += 1;
    }
    candidate
}

fn truncate(mut name: String) -> String {
    // Only ASCII survives sanitizing, so byte truncation is safe.
    name.truncate(MAX_IDENTIFIER_LEN);
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_names_are_sanitized() {
        let mut seen = HashSet::new();
        assert_eq!(clean_column_name("Order Date", &mut seen), "order_date");
        assert_eq!(clean_column_name("2024 Sales", &mut seen), "col_2024_sales");
        assert_eq!(clean_column_name("", &mut seen), "col_");
        assert_eq!(clean_column_name("Prix (€)", &mut seen), "prix____");
    }

    #[test]
    fn duplicate_column_names_get_suffixes() {
        let mut seen = HashSet::new();
        assert_eq!(clean_column_name("id", &mut seen), "id");
        assert_eq!(clean_column_name("ID", &mut seen), "id_1");
        assert_eq!(clean_column_name("Id", &mut seen), "id_2");
    }

    #[test]
    fn long_names_fit_postgres_limit() {
        let mut seen = HashSet::new();
        let long = "x".repeat(100);
        let first = clean_column_name(&long, &mut seen);
        let second = clean_column_name(&long, &mut seen);
        assert_eq!(first.len(), MAX_IDENTIFIER_LEN);
        assert_eq!(second.len(), MAX_IDENTIFIER_LEN);
        assert!(second.ends_with("_1"));
    }

    #[test]
    fn table_names() {
        assert_eq!(clean_table_name("Sales-2024"), "sales_2024");
        assert_eq!(clean_table_name("2024"), "tbl_2024");
        assert_eq!(
            enum_type_name("Orders", "Day Of Week", &mut HashSet::new()),
            "orders_day_of_week"
        );
    }

    #[test]
    fn enum_types_of_a_long_table_stay_distinct() {
        let table = "t".repeat(50);
        let mut seen = HashSet::new();
        let primary = enum_type_name(&table, "customer_status_primary", &mut seen);
        let secondary = enum_type_name(&table, "customer_status_secondary", &mut seen);

        assert_ne!(primary, secondary);
        assert!(primary.ends_with("_customer_status_primary"));
        assert!(secondary.ends_with("_customer_status_secondary"));
        assert!(primary.len() <= MAX_IDENTIFIER_LEN);
        assert!(secondary.len() <= MAX_IDENTIFIER_LEN);
    }

    #[test]
    fn enum_type_names_never_repeat() {
        let mut seen = HashSet::new();
        seen.insert("orders".to_string());
        let column = "c".repeat(63);
        let first = enum_type_name("orders", &column, &mut seen);
        let second = enum_type_name("orders", &column, &mut seen);

        assert_eq!(first, column);
        assert_eq!(second.len(), MAX_IDENTIFIER_LEN);
        assert!(second.ends_with("_1"));
    }

    #[test]
    fn quoting_doubles_embedded_quotes() {
        assert_eq!(quote_ident("weird\"name"), "\"weird\"\"name\"");
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
        assert_eq!(qualified("staging", "orders"), "\"staging\".\"orders\"");
    }
}

//! SQL rendering of aggregate queries and their fingerprints.

use crate::member::Value;
use crate::query::plan::{AggregateQuery, SelectExpr};

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render a value as a SQL literal.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Range { min, max } => format!("{}..{}", literal(min), literal(max)),
    }
}

pub fn render(query: &AggregateQuery) -> String {
    let select = query
        .select
        .iter()
        .map(|expr| match expr {
            SelectExpr::Column(c) => quote_identifier(c),
            SelectExpr::Min(c) => format!("MIN({})", quote_identifier(c)),
            SelectExpr::Max(c) => format!("MAX({})", quote_identifier(c)),
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!("SELECT {select} FROM {}", quote_identifier(&query.table));
    if let Some(outside) = &query.outside {
        let column = quote_identifier(&outside.column);
        sql.push_str(&format!(
            " WHERE ({column} < {} OR {column} > {})",
            literal(&outside.min),
            literal(&outside.max)
        ));
    }
    let groups: Vec<String> = query.group_by().map(quote_identifier).collect();
    if !groups.is_empty() {
        sql.push_str(&format!(" GROUP BY {}", groups.join(", ")));
        let order: Vec<String> = groups.iter().map(|g| format!("{g} ASC")).collect();
        sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
    }
    sql
}

/// Short stable fingerprint of rendered SQL, stored as the member store
/// signature.
pub fn fingerprint(sql: &str) -> String {
    format!("{:08x}", crc32fast::hash(sql.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::plan::OutsideRange;

    #[test]
    fn test_render_members_query() {
        let mut query = AggregateQuery::new("sales");
        query.push(SelectExpr::Column("country".into()));
        query.push(SelectExpr::Column("city".into()));
        assert_eq!(
            render(&query),
            "SELECT \"country\", \"city\" FROM \"sales\" GROUP BY \"country\", \"city\" \
             ORDER BY \"country\" ASC, \"city\" ASC"
        );
    }

    #[test]
    fn test_render_range_query() {
        let mut query = AggregateQuery::new("sales").with_outside(OutsideRange {
            column: "amount".into(),
            min: Value::Int(10),
            max: Value::Int(20),
        });
        query.push(SelectExpr::Min("amount".into()));
        query.push(SelectExpr::Max("amount".into()));
        assert_eq!(
            render(&query),
            "SELECT MIN(\"amount\"), MAX(\"amount\") FROM \"sales\" \
             WHERE (\"amount\" < 10 OR \"amount\" > 20)"
        );
    }

    #[test]
    fn test_literals_and_fingerprint() {
        assert_eq!(literal(&Value::text("O'Neil")), "'O''Neil'");
        assert_eq!(literal(&Value::Bool(true)), "TRUE");
        assert_eq!(fingerprint("SELECT 1"), fingerprint("SELECT 1"));
        assert_ne!(fingerprint("SELECT 1"), fingerprint("SELECT 2"));
        assert_eq!(fingerprint("SELECT 1").len(), 8);
    }
}

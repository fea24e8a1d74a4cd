//! Processor self-declaration: tabular schemas (spec.md §3, §4.2, §4.5).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// SQL dialect a processor's `tabular_schema` column types are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    Mysql,
    Mssql,
    Oracle,
    Postgresql,
    Sqlite,
}

impl SqlDialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlDialect::Mysql => "mysql",
            SqlDialect::Mssql => "mssql",
            SqlDialect::Oracle => "oracle",
            SqlDialect::Postgresql => "postgresql",
            SqlDialect::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SqlDialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" => Ok(SqlDialect::Mysql),
            "mssql" => Ok(SqlDialect::Mssql),
            "oracle" => Ok(SqlDialect::Oracle),
            "postgresql" | "postgres" => Ok(SqlDialect::Postgresql),
            "sqlite" => Ok(SqlDialect::Sqlite),
            other => Err(format!("unknown SQL dialect: '{other}'")),
        }
    }
}

/// One column of a processor's declared output table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub column_name: String,
    pub column_type: String,
    pub data_type: String,
    pub is_nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_comment: Option<String>,
}

impl ColumnDef {
    pub fn new(
        column_name: impl Into<String>,
        column_type: impl Into<String>,
        data_type: impl Into<String>,
        is_nullable: bool,
    ) -> Self {
        Self {
            column_name: column_name.into(),
            column_type: column_type.into(),
            data_type: data_type.into(),
            is_nullable,
            column_comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.column_comment = Some(comment.into());
        self
    }
}

/// Mapping from destination table name (empty string for the single-table
/// case, per spec.md §3) to its ordered column list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabularSchema(pub HashMap<String, Vec<ColumnDef>>);

impl TabularSchema {
    pub fn single_table(columns: Vec<ColumnDef>) -> Self {
        let mut map = HashMap::new();
        map.insert(String::new(), columns);
        Self(map)
    }

    pub fn multi_table(tables: HashMap<String, Vec<ColumnDef>>) -> Self {
        Self(tables)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &[ColumnDef])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn columns_for(&self, table: &str) -> Option<&[ColumnDef]> {
        self.0.get(table).map(|v| v.as_slice())
    }

    /// Check that every row's keys are a subset of declared columns and
    /// every non-nullable declared column is present (spec.md §8,
    /// "schema conformance").
    pub fn validate_row(
        &self,
        table: &str,
        row: &HashMap<String, serde_json::Value>,
    ) -> Result<(), SchemaViolation> {
        let columns = self
            .columns_for(table)
            .ok_or_else(|| SchemaViolation::UnknownTable(table.to_string()))?;

        let declared: std::collections::HashSet<&str> =
            columns.iter().map(|c| c.column_name.as_str()).collect();

        for key in row.keys() {
            if !declared.contains(key.as_str()) {
                return Err(SchemaViolation::UnknownColumn(key.clone()));
            }
        }

        for column in columns {
            if !column.is_nullable {
                match row.get(&column.column_name) {
                    Some(serde_json::Value::Null) | None => {
                        return Err(SchemaViolation::MissingRequiredColumn(
                            column.column_name.clone(),
                        ));
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SchemaViolation {
    #[error("unknown destination table: {0}")]
    UnknownTable(String),
    #[error("row has unknown column: {0}")]
    UnknownColumn(String),
    #[error("missing required (non-nullable) column: {0}")]
    MissingRequiredColumn(String),
}

/// What kind of results a processor produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Unknown,
    Tabular,
}

/// Advertised identity and capability of one processor, returned by
/// `list_processors` (spec.md §4.5) and used by the `ExtractorRegistry` at
/// planning time (spec.md §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorDescriptor {
    pub name: String,
    pub title: String,
    pub version: String,
    pub is_default_version: bool,
    pub schema_type: SchemaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tabular_schema: Option<TabularSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_dialect: Option<SqlDialect>,
}

impl ProcessorDescriptor {
    pub fn unknown_schema(name: impl Into<String>, title: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            version: version.into(),
            is_default_version: true,
            schema_type: SchemaType::Unknown,
            tabular_schema: None,
            sql_dialect: None,
        }
    }

    pub fn tabular(
        name: impl Into<String>,
        title: impl Into<String>,
        version: impl Into<String>,
        schema: TabularSchema,
        dialect: SqlDialect,
    ) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            version: version.into(),
            is_default_version: true,
            schema_type: SchemaType::Tabular,
            tabular_schema: Some(schema),
            sql_dialect: Some(dialect),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn crp_schema() -> TabularSchema {
        TabularSchema::single_table(vec![
            ColumnDef::new("variable_name", "VARCHAR(64)", "str", false),
            ColumnDef::new("value_mg_l", "FLOAT", "float", true),
        ])
    }

    #[test]
    fn validates_row_with_all_required_columns() {
        let schema = crp_schema();
        let mut row = HashMap::new();
        row.insert("variable_name".to_string(), json!("CRP"));
        row.insert("value_mg_l".to_string(), json!(45.0));
        assert!(schema.validate_row("", &row).is_ok());
    }

    #[test]
    fn rejects_unknown_column() {
        let schema = crp_schema();
        let mut row = HashMap::new();
        row.insert("variable_name".to_string(), json!("CRP"));
        row.insert("bogus".to_string(), json!(1));
        assert_eq!(
            schema.validate_row("", &row),
            Err(SchemaViolation::UnknownColumn("bogus".to_string()))
        );
    }

    #[test]
    fn rejects_missing_required_column() {
        let schema = crp_schema();
        let row = HashMap::new();
        assert_eq!(
            schema.validate_row("", &row),
            Err(SchemaViolation::MissingRequiredColumn(
                "variable_name".to_string()
            ))
        );
    }

    #[test]
    fn nullable_column_may_be_absent() {
        let schema = crp_schema();
        let mut row = HashMap::new();
        row.insert("variable_name".to_string(), json!("CRP"));
        assert!(schema.validate_row("", &row).is_ok());
    }

    #[test]
    fn dialect_round_trips_through_str() {
        for dialect in [
            SqlDialect::Mysql,
            SqlDialect::Mssql,
            SqlDialect::Oracle,
            SqlDialect::Postgresql,
            SqlDialect::Sqlite,
        ] {
            let parsed: SqlDialect = dialect.to_string().parse().unwrap();
            assert_eq!(parsed, dialect);
        }
    }
}

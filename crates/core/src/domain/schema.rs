use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

const MAX_SUGGESTIONS: usize = 3;
const SIMILARITY_THRESHOLD: f64 = 0.82;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub primary_key: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub is_view: bool,
    pub columns: Vec<ColumnInfo>,
    pub row_count: Option<i64>,
}

/// Table/column metadata of the analytical database, read once at startup.
///
/// Never mutated after construction; a refresh builds a new snapshot and
/// swaps the shared handle wholesale.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    tables: Vec<TableInfo>,
}

impl SchemaSnapshot {
    pub fn new(mut tables: Vec<TableInfo>) -> Self {
        tables.sort_by(|left, right| left.name.cmp(&right.name));
        Self { tables }
    }

    pub fn tables(&self) -> &[TableInfo] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.iter().find(|table| table.name.eq_ignore_ascii_case(name))
    }

    /// Prompt-ready description of every table and its columns.
    pub fn render(&self) -> String {
        if self.tables.is_empty() {
            return "The database has no tables.".to_string();
        }

        let mut out = String::new();
        for table in &self.tables {
            render_table(&mut out, table);
        }
        out.trim_end().to_string()
    }

    pub fn render_table(&self, name: &str) -> Option<String> {
        self.table(name).map(|table| {
            let mut out = String::new();
            render_table(&mut out, table);
            out.trim_end().to_string()
        })
    }

    /// Table names closest to `name`, best match first.
    pub fn suggest_tables(&self, name: &str) -> Vec<String> {
        rank(name, self.tables.iter().map(|table| (table.name.as_str(), table.name.clone())))
    }

    /// Columns closest to `name` as `table.column`, best match first. A
    /// qualified `alias.column` input is matched on the column part.
    pub fn suggest_columns(&self, name: &str) -> Vec<String> {
        let column = name.rsplit('.').next().unwrap_or(name);
        rank(
            column,
            self.tables.iter().flat_map(|table| {
                table.columns.iter().map(move |col| {
                    (col.name.as_str(), format!("{}.{}", table.name, col.name))
                })
            }),
        )
    }
}

fn render_table(out: &mut String, table: &TableInfo) {
    let kind = if table.is_view { "VIEW" } else { "TABLE" };
    let _ = write!(out, "{kind} {}", table.name);
    if let Some(row_count) = table.row_count {
        let _ = write!(out, " ({row_count} rows)");
    }
    out.push('\n');
    for column in &table.columns {
        let data_type = if column.data_type.is_empty() { "ANY" } else { &column.data_type };
        let _ = write!(out, "  - {} {}", column.name, data_type);
        if column.primary_key {
            out.push_str(" PRIMARY KEY");
        }
        out.push('\n');
    }
}

fn rank<'a>(needle: &str, candidates: impl Iterator<Item = (&'a str, String)>) -> Vec<String> {
    let needle = needle.trim().trim_matches(|c| matches!(c, '"' | '`' | '[' | ']'));
    let needle = needle.to_ascii_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    let mut scored = candidates
        .filter_map(|(name, label)| {
            let lowered = name.to_ascii_lowercase();
            let mut score = strsim::jaro_winkler(&needle, &lowered);
            if lowered.contains(&needle) || needle.contains(&lowered) {
                score = score.max(0.9);
            }
            (score >= SIMILARITY_THRESHOLD).then_some((score, label))
        })
        .collect::<Vec<_>>();

    scored.sort_by(|left, right| right.0.total_cmp(&left.0).then_with(|| left.1.cmp(&right.1)));
    scored.into_iter().take(MAX_SUGGESTIONS).map(|(_, label)| label).collect()
}

#[cfg(test)]
mod tests {
    use super::{ColumnInfo, SchemaSnapshot, TableInfo};

    fn column(name: &str, data_type: &str, primary_key: bool) -> ColumnInfo {
        ColumnInfo { name: name.to_string(), data_type: data_type.to_string(), primary_key }
    }

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot::new(vec![
            TableInfo {
                name: "fact_emissions".to_string(),
                is_view: false,
                columns: vec![
                    column("scenario_id", "INTEGER", false),
                    column("year", "INTEGER", false),
                    column("emissions_mt", "REAL", false),
                ],
                row_count: Some(40),
            },
            TableInfo {
                name: "dim_scenario".to_string(),
                is_view: false,
                columns: vec![
                    column("scenario_id", "INTEGER", true),
                    column("scenario_name", "TEXT", false),
                ],
                row_count: Some(20),
            },
        ])
    }

    #[test]
    fn tables_are_sorted_and_rendered_for_prompts() {
        let schema = snapshot();
        let rendered = schema.render();

        assert_eq!(schema.tables()[0].name, "dim_scenario");
        assert!(rendered.starts_with("TABLE dim_scenario (20 rows)"));
        assert!(rendered.contains("  - scenario_id INTEGER PRIMARY KEY"));
        assert!(rendered.contains("  - emissions_mt REAL"));
    }

    #[test]
    fn suggests_nearest_table_for_misspelled_name() {
        let schema = snapshot();

        let misspelled = schema.suggest_tables("dim_scenarios");
        let partial = schema.suggest_tables("scenario");

        assert_eq!(misspelled.first().map(String::as_str), Some("dim_scenario"));
        assert_eq!(partial.first().map(String::as_str), Some("dim_scenario"));
        assert!(schema.suggest_tables("zzz").is_empty());
    }

    #[test]
    fn suggests_qualified_columns() {
        let schema = snapshot();
        let suggestions = schema.suggest_columns("e.emission_mt");

        assert_eq!(suggestions.first().map(String::as_str), Some("fact_emissions.emissions_mt"));
    }

    #[test]
    fn table_lookup_is_case_insensitive() {
        let schema = snapshot();

        assert!(schema.table("DIM_SCENARIO").is_some());
        assert!(schema.render_table("Fact_Emissions").is_some_and(|text| text.contains("year")));
        assert!(SchemaSnapshot::default().render().contains("no tables"));
    }
}

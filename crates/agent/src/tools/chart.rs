use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use datapilot_core::{ToolErrorKind, ToolResult};

use super::{
    optional_str, required_str, SqlExecutionTool, Tool, ToolArtifact, ToolError, ToolOutput,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Bar,
    Line,
    Scatter,
}

impl ChartType {
    fn parse(value: Option<&str>) -> Self {
        match value.map(str::to_ascii_lowercase).as_deref() {
            Some("line") => Self::Line,
            Some("scatter") => Self::Scatter,
            _ => Self::Bar,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Bar => "bar",
            Self::Line => "line",
            Self::Scatter => "scatter",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub x: Value,
    pub y: f64,
}

/// Renderer-agnostic chart description handed to the presentation layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub chart_type: ChartType,
    pub x: String,
    pub y: String,
    pub points: Vec<ChartPoint>,
}

/// Runs a query through the SQL tool and shapes two of its columns into a chart.
pub struct ChartTool {
    sql: SqlExecutionTool,
}

impl ChartTool {
    pub fn new(sql: SqlExecutionTool) -> Self {
        Self { sql }
    }
}

#[async_trait]
impl Tool for ChartTool {
    fn name(&self) -> &'static str {
        "chart"
    }

    fn description(&self) -> &'static str {
        "Run a read-only query and turn one label column and one numeric column into a chart."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "SELECT statement producing the data."
                },
                "chart_type": { "type": "string", "enum": ["bar", "line", "scatter"] },
                "x": {
                    "type": "string",
                    "description": "Label column; defaults to the first column."
                },
                "y": {
                    "type": "string",
                    "description": "Numeric column; defaults to the first numeric column."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let query = required_str(&input, "query")?;
        let chart_type = ChartType::parse(optional_str(&input, "chart_type"));
        let execution = self.sql.execute_query(query).await;

        let ToolResult::Success { columns, rows, .. } = &execution.result else {
            return Ok(ToolOutput::Text(execution.result.to_text()));
        };

        let spec = build_spec(
            chart_type,
            columns,
            rows,
            optional_str(&input, "x"),
            optional_str(&input, "y"),
        )?;
        let text = format!(
            "Prepared a {} chart of {} by {} with {} points.",
            spec.chart_type.as_str(),
            spec.y,
            spec.x,
            spec.points.len()
        );
        Ok(ToolOutput::WithArtifact { text, artifact: ToolArtifact::Chart { spec } })
    }
}

fn build_spec(
    chart_type: ChartType,
    columns: &[String],
    rows: &[Vec<Value>],
    x: Option<&str>,
    y: Option<&str>,
) -> Result<ChartSpec, ToolError> {
    let position = |name: &str| {
        columns.iter().position(|column| column.eq_ignore_ascii_case(name)).ok_or_else(|| {
            ToolError::new(ToolErrorKind::MissingObject, format!("result has no column `{name}`"))
                .with_hint(format!("Available columns: {}", columns.join(", ")))
        })
    };

    let x_index = match x {
        Some(name) => position(name)?,
        None => 0,
    };
    let y_index = match y {
        Some(name) => position(name)?,
        None => (0..columns.len())
            .filter(|index| *index != x_index)
            .find(|index| rows.iter().any(|row| row.get(*index).is_some_and(Value::is_number)))
            .ok_or_else(|| {
                ToolError::invalid_arguments("result has no numeric column to plot")
                    .with_hint("Select an aggregate such as SUM(...) alongside a label column.")
            })?,
    };

    let points = rows
        .iter()
        .filter_map(|row| {
            let y = row.get(y_index).and_then(Value::as_f64)?;
            let x = row.get(x_index).cloned().unwrap_or(Value::Null);
            Some(ChartPoint { x, y })
        })
        .collect();

    Ok(ChartSpec {
        chart_type,
        x: columns.get(x_index).cloned().unwrap_or_default(),
        y: columns.get(y_index).cloned().unwrap_or_default(),
        points,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{build_spec, ChartType};

    fn columns() -> Vec<String> {
        vec!["pathway".to_string(), "total_mt".to_string()]
    }

    #[test]
    fn defaults_to_first_label_and_first_numeric_column() {
        let rows =
            vec![vec![json!("baseline"), json!(1200.5)], vec![json!("net_zero"), json!(310)]];

        let spec = build_spec(ChartType::Bar, &columns(), &rows, None, None).expect("spec");

        assert_eq!(spec.x, "pathway");
        assert_eq!(spec.y, "total_mt");
        assert_eq!(spec.points.len(), 2);
        assert_eq!(spec.points[1].y, 310.0);
    }

    #[test]
    fn unknown_column_is_reported() {
        let rows = vec![vec![json!("baseline"), json!(1.0)]];

        let error = build_spec(ChartType::Line, &columns(), &rows, None, Some("missing"))
            .expect_err("error");

        assert!(error.message.contains("missing"));
        assert!(error.hint.is_some_and(|hint| hint.contains("total_mt")));
    }

    #[test]
    fn chart_type_parsing_falls_back_to_bar() {
        assert_eq!(ChartType::parse(Some("LINE")), ChartType::Line);
        assert_eq!(ChartType::parse(Some("pie")), ChartType::Bar);
        assert_eq!(ChartType::parse(None), ChartType::Bar);
    }
}

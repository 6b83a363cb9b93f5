use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use datapilot_core::{SchemaSnapshot, ToolErrorKind};

use super::{optional_str, Tool, ToolError, ToolOutput};

pub struct DescribeSchemaTool {
    schema: Arc<SchemaSnapshot>,
}

impl DescribeSchemaTool {
    pub fn new(schema: Arc<SchemaSnapshot>) -> Self {
        Self { schema }
    }
}

#[async_trait]
impl Tool for DescribeSchemaTool {
    fn name(&self) -> &'static str {
        "describe_schema"
    }

    fn description(&self) -> &'static str {
        "List the database tables with their columns and row counts, or describe a single table."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table": {
                    "type": "string",
                    "description": "Optional table name to describe on its own."
                }
            }
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let Some(table) = optional_str(&input, "table") else {
            return Ok(ToolOutput::Text(self.schema.render()));
        };

        match self.schema.render_table(table) {
            Some(text) => Ok(ToolOutput::Text(text)),
            None => {
                let suggestions = self.schema.suggest_tables(table);
                let error = ToolError::new(
                    ToolErrorKind::MissingObject,
                    format!("table `{table}` does not exist"),
                );
                Err(if suggestions.is_empty() {
                    error.with_hint("Call describe_schema without arguments to list all tables.")
                } else {
                    error.with_hint(format!("Did you mean: {}?", suggestions.join(", ")))
                })
            }
        }
    }
}

use datapilot_core::{Message, SchemaSnapshot, SessionMemory};

/// System prompt: role, SQL rules, tool names and the rendered schema.
pub fn system_prompt(schema: &SchemaSnapshot, tool_names: &[&str], max_rows: usize) -> String {
    format!(
        "You are a data analyst answering questions about an energy-transition scenario \
database (SQLite).\n\
\n\
Rules:\n\
- Use the execute_sql tool to look up facts; never guess numbers.\n\
- Write exactly one read-only SELECT statement per call. Results are capped at {max_rows} rows.\n\
- If a tool returns an error, read its diagnostic_hint and correct the query.\n\
- When the data answers the question, reply in plain prose with the key figures and no SQL.\n\
\n\
Available tools: {tools}.\n\
\n\
Database schema:\n\
{schema}",
        tools = tool_names.join(", "),
        schema = schema.render(),
    )
}

/// Prior exchanges of a thread replayed as user/assistant message pairs.
pub fn history_messages(memory: &SessionMemory) -> Vec<Message> {
    memory
        .exchanges
        .iter()
        .flat_map(|exchange| {
            [
                Message::user(exchange.question.clone()),
                Message::assistant(exchange.answer.clone(), Vec::new()),
            ]
        })
        .collect()
}

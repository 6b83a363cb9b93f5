//! Read-only SQL guard.
//!
//! Candidate statements produced by the language model pass through
//! [`prepare_query`] before they may reach the database. The guard works on a
//! small lexer that understands string literals, quoted identifiers, comments
//! and parenthesis depth, so keywords inside literals never trigger a
//! rejection and a `LIMIT` inside a subquery does not count as the outer
//! row-limiting clause.

use crate::errors::QueryRejection;

/// Keywords that modify data or schema. Matched case-insensitively against
/// bare words outside of literals and quoted identifiers.
pub const DENYLISTED_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "REPLACE", "TRUNCATE", "ATTACH",
    "DETACH", "PRAGMA", "VACUUM", "REINDEX", "GRANT", "REVOKE", "MERGE",
];

const READ_ONLY_LEADERS: &[&str] = &["SELECT", "WITH", "VALUES"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedQuery {
    /// Cleaned statement that is sent to the database.
    pub sql: String,
    pub limit_appended: bool,
}

/// Cleans, validates and row-limits a candidate statement.
pub fn prepare_query(raw: &str, max_rows: usize) -> Result<PreparedQuery, QueryRejection> {
    let unfenced = strip_markdown_fences(raw);
    let scan = scan(&unfenced)?;

    let body_end = scan.body_end();
    if scan.semicolons.iter().any(|&offset| offset < body_end) {
        return Err(QueryRejection::MultipleStatements);
    }

    let body = scan.cleaned[..body_end].trim();
    if body.is_empty() {
        return Err(QueryRejection::Empty);
    }

    let Some(first) = scan.words.first() else {
        let leading = body.chars().take(16).collect::<String>();
        return Err(QueryRejection::NotReadOnly { leading });
    };
    if !READ_ONLY_LEADERS.contains(&first.upper.as_str()) {
        return Err(QueryRejection::NotReadOnly { leading: first.upper.clone() });
    }

    if let Some(word) = scan.words.iter().find(|word| word.is_denylisted()) {
        return Err(QueryRejection::DisallowedKeyword { keyword: word.upper.clone() });
    }

    let has_limit = scan.words.iter().any(|word| word.depth == 0 && word.upper == "LIMIT");
    let sql = if has_limit { body.to_string() } else { format!("{body} LIMIT {max_rows}") };

    Ok(PreparedQuery { sql, limit_appended: !has_limit })
}

/// Removes markdown code fences (```sql ... ```) the model sometimes wraps queries in.
pub fn strip_markdown_fences(raw: &str) -> String {
    if !raw.contains("```") {
        return raw.to_string();
    }

    raw.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Normalized cache key: whitespace outside literals collapsed, trailing
/// semicolons removed. Literal contents are kept byte-for-byte.
pub fn cache_key(sql: &str) -> String {
    let mut key = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    let mut pending_space = false;

    for ch in sql.trim().chars() {
        if let Some(open) = quote {
            key.push(ch);
            if ch == open {
                quote = None;
            }
            continue;
        }

        if ch.is_whitespace() {
            pending_space = !key.is_empty();
            continue;
        }

        if pending_space {
            key.push(' ');
            pending_space = false;
        }
        if matches!(ch, '\'' | '"' | '`') {
            quote = Some(ch);
        }
        key.push(ch);
    }

    while key.ends_with(';') || key.ends_with(' ') {
        key.pop();
    }
    key
}

#[derive(Debug)]
struct Word {
    upper: String,
    depth: u32,
    followed_by_paren: bool,
}

impl Word {
    fn is_denylisted(&self) -> bool {
        if !DENYLISTED_KEYWORDS.contains(&self.upper.as_str()) {
            return false;
        }
        // replace(x, y, z) is a scalar function, REPLACE INTO is a write
        !(self.upper == "REPLACE" && self.followed_by_paren)
    }
}

#[derive(Debug)]
struct Scan {
    cleaned: String,
    words: Vec<Word>,
    semicolons: Vec<usize>,
}

impl Scan {
    /// Byte offset where the statement body ends: the first semicolon that
    /// is only followed by whitespace or more semicolons.
    fn body_end(&self) -> usize {
        let mut end = self.cleaned.len();
        for &offset in self.semicolons.iter().rev() {
            let tail = &self.cleaned[offset..end];
            if tail.chars().all(|ch| ch == ';' || ch.is_whitespace()) {
                end = offset;
            } else {
                break;
            }
        }
        end
    }
}

fn scan(sql: &str) -> Result<Scan, QueryRejection> {
    let chars = sql.chars().collect::<Vec<_>>();
    let mut cleaned = String::with_capacity(sql.len());
    let mut words = Vec::new();
    let mut semicolons = Vec::new();
    let mut depth: u32 = 0;
    let mut index = 0;

    while index < chars.len() {
        let ch = chars[index];
        let next = chars.get(index + 1).copied();

        match ch {
            '-' if next == Some('-') => {
                while index < chars.len() && chars[index] != '\n' {
                    index += 1;
                }
                cleaned.push(' ');
            }
            '/' if next == Some('*') => {
                index += 2;
                while index < chars.len()
                    && !(chars[index] == '*' && chars.get(index + 1) == Some(&'/'))
                {
                    index += 1;
                }
                index = (index + 2).min(chars.len());
                cleaned.push(' ');
            }
            '\'' | '"' | '`' | '[' => {
                let close = if ch == '[' { ']' } else { ch };
                let start = index;
                index += 1;
                loop {
                    match chars.get(index) {
                        None => return Err(QueryRejection::Unterminated),
                        Some(&c) if c == close => {
                            // doubled quote is an escaped quote inside the literal
                            if close != ']' && chars.get(index + 1) == Some(&close) {
                                index += 2;
                                continue;
                            }
                            index += 1;
                            break;
                        }
                        Some(_) => index += 1,
                    }
                }
                cleaned.extend(&chars[start..index]);
            }
            '(' => {
                depth += 1;
                cleaned.push(ch);
                index += 1;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                cleaned.push(ch);
                index += 1;
            }
            ';' => {
                semicolons.push(cleaned.len());
                cleaned.push(ch);
                index += 1;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = index;
                while index < chars.len()
                    && (chars[index].is_ascii_alphanumeric() || matches!(chars[index], '_' | '$'))
                {
                    index += 1;
                }
                let text = chars[start..index].iter().collect::<String>();
                let followed_by_paren =
                    chars[index..].iter().find(|c| !c.is_whitespace()) == Some(&'(');
                words.push(Word { upper: text.to_ascii_uppercase(), depth, followed_by_paren });
                cleaned.push_str(&text);
            }
            c if c.is_ascii_digit() => {
                while index < chars.len()
                    && (chars[index].is_ascii_alphanumeric() || chars[index] == '.')
                {
                    cleaned.push(chars[index]);
                    index += 1;
                }
            }
            _ => {
                cleaned.push(ch);
                index += 1;
            }
        }
    }

    Ok(Scan { cleaned, words, semicolons })
}

#[cfg(test)]
mod tests {
    use super::{cache_key, prepare_query, strip_markdown_fences};
    use crate::errors::QueryRejection;

    fn limit_clauses(sql: &str) -> usize {
        sql.to_ascii_uppercase().matches("LIMIT").count()
    }

    #[test]
    fn appends_exactly_one_limit_when_missing() {
        for raw in [
            "SELECT * FROM dim_scenario",
            "select scenario_name from dim_scenario;",
            "SELECT region_id, SUM(capacity_gw) FROM fact_capacity GROUP BY region_id ;;",
            "WITH totals AS (SELECT 1 AS n) SELECT n FROM totals",
        ] {
            let prepared = prepare_query(raw, 500).expect("query should be accepted");
            assert!(prepared.limit_appended, "limit should be appended for `{raw}`");
            assert_eq!(limit_clauses(&prepared.sql), 1, "exactly one LIMIT in `{}`", prepared.sql);
            assert!(prepared.sql.ends_with("LIMIT 500"), "got `{}`", prepared.sql);
        }
    }

    #[test]
    fn keeps_existing_top_level_limit() {
        let prepared =
            prepare_query("SELECT * FROM dim_scenario LIMIT 5", 500).expect("accepted");

        assert!(!prepared.limit_appended);
        assert_eq!(prepared.sql, "SELECT * FROM dim_scenario LIMIT 5");
    }

    #[test]
    fn subquery_limit_does_not_count_as_outer_limit() {
        let prepared = prepare_query(
            "SELECT * FROM (SELECT * FROM dim_scenario LIMIT 3) AS s",
            100,
        )
        .expect("accepted");

        assert!(prepared.limit_appended);
        assert!(prepared.sql.ends_with(") AS s LIMIT 100"));
    }

    #[test]
    fn rejects_denylisted_keywords_case_insensitively() {
        for (raw, keyword) in [
            ("DROP TABLE dim_scenario", None),
            ("SELECT 1; delete from dim_scenario", None),
            ("WITH x AS (SELECT 1) DELETE FROM dim_scenario", Some("DELETE")),
            ("SELECT * FROM dim_scenario WHERE 1=1 UNION SELECT * FROM t; UPDATE t SET a=1", None),
            ("SELECT * FROM dim_scenario; PRAGMA table_info(dim_scenario)", None),
        ] {
            let error = prepare_query(raw, 10).expect_err("query should be rejected");
            if let Some(keyword) = keyword {
                assert_eq!(error, QueryRejection::DisallowedKeyword { keyword: keyword.to_string() });
            }
        }

        let error = prepare_query("WITH d AS (SELECT 1) update dim_scenario SET a = 1", 10)
            .expect_err("update should be rejected");
        assert_eq!(error, QueryRejection::DisallowedKeyword { keyword: "UPDATE".to_string() });
    }

    #[test]
    fn rejects_non_select_statements() {
        let error = prepare_query("DELETE FROM dim_scenario", 10).expect_err("rejected");
        assert_eq!(error, QueryRejection::NotReadOnly { leading: "DELETE".to_string() });

        let error = prepare_query("EXPLAIN SELECT 1", 10).expect_err("rejected");
        assert_eq!(error, QueryRejection::NotReadOnly { leading: "EXPLAIN".to_string() });
    }

    #[test]
    fn keywords_inside_literals_and_identifiers_are_ignored() {
        let prepared = prepare_query(
            "SELECT \"update\" FROM dim_scenario WHERE description = 'Drop in demand; delete later'",
            50,
        )
        .expect("literals must not trigger the denylist");

        assert!(prepared.sql.contains("'Drop in demand; delete later'"));
        assert!(prepared.limit_appended);
    }

    #[test]
    fn replace_function_is_allowed_but_replace_into_is_not() {
        prepare_query("SELECT replace(scenario_name, '_', ' ') FROM dim_scenario", 10)
            .expect("replace() is a read-only function");

        let error = prepare_query("WITH a AS (SELECT 1) REPLACE INTO t VALUES (1)", 10)
            .expect_err("replace into is a write");
        assert_eq!(error, QueryRejection::DisallowedKeyword { keyword: "REPLACE".to_string() });
    }

    #[test]
    fn strips_comments_and_markdown_fences() {
        let raw = "```sql\n-- count scenarios\nSELECT COUNT(*) /* all */ FROM dim_scenario;\n```";
        let prepared = prepare_query(raw, 1000).expect("accepted");

        assert!(!prepared.sql.contains("--"));
        assert!(!prepared.sql.contains("/*"));
        assert!(!prepared.sql.contains("```"));
        assert!(prepared.sql.starts_with("SELECT COUNT(*)"));
        assert!(prepared.sql.ends_with("LIMIT 1000"));
    }

    #[test]
    fn comment_hiding_a_second_statement_is_still_rejected() {
        let error = prepare_query("SELECT 1 /* x */; DROP TABLE dim_scenario", 10)
            .expect_err("second statement must be rejected");
        assert_eq!(error, QueryRejection::MultipleStatements);
    }

    #[test]
    fn empty_and_unterminated_inputs_are_rejected() {
        assert_eq!(prepare_query("  -- nothing here\n ;", 10), Err(QueryRejection::Empty));
        assert_eq!(prepare_query("```sql\n```", 10), Err(QueryRejection::Empty));
        assert_eq!(
            prepare_query("SELECT 'open FROM dim_scenario", 10),
            Err(QueryRejection::Unterminated)
        );
    }

    #[test]
    fn fences_are_only_removed_when_present() {
        assert_eq!(strip_markdown_fences("SELECT 1"), "SELECT 1");
        assert_eq!(strip_markdown_fences("```\nSELECT 1\n```"), "SELECT 1");
    }

    #[test]
    fn cache_key_collapses_whitespace_but_preserves_literals() {
        assert_eq!(
            cache_key("  SELECT   *\n FROM  dim_scenario  WHERE name = 'a   b' ;"),
            "SELECT * FROM dim_scenario WHERE name = 'a   b'"
        );
        assert_eq!(cache_key("SELECT 1"), cache_key("SELECT\t1;"));
    }
}

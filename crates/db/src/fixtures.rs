use sqlx::Executor;

use crate::connection::DbPool;
use crate::DbError;

/// Expected row counts per table once the demo dataset is loaded.
const SEED_CONTRACT: &[SeedTableContract] = &[
    SeedTableContract { table: "dim_scenario", expected_rows: 20 },
    SeedTableContract { table: "dim_region", expected_rows: 4 },
    SeedTableContract { table: "dim_technology", expected_rows: 6 },
    SeedTableContract { table: "fact_capacity", expected_rows: 20 * 4 * 6 * 3 },
    SeedTableContract { table: "fact_emissions", expected_rows: 20 * 4 * 3 },
];

/// Deterministic demo dataset of energy-transition scenarios.
///
/// Twenty scenarios across four pathways, four regions and six generation
/// technologies, with capacity and emissions facts for 2030, 2040 and 2050.
pub struct DemoDataset;

impl DemoDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_dataset.sql");

    /// Loads the dataset inside one transaction. Rows that already exist are kept.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, DbError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let mut tables_seeded = Vec::with_capacity(SEED_CONTRACT.len());
        for contract in SEED_CONTRACT {
            tables_seeded.push((contract.table, count_rows(pool, contract.table).await?));
        }
        tracing::info!(
            event_name = "db.seed.loaded",
            tables = tables_seeded.len(),
            "demo dataset loaded"
        );

        Ok(SeedResult { tables_seeded })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, DbError> {
        let mut checks = Vec::with_capacity(SEED_CONTRACT.len());
        for contract in SEED_CONTRACT {
            let actual = count_rows(pool, contract.table).await?;
            checks.push((contract.table, actual == contract.expected_rows));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }
}

async fn count_rows(pool: &DbPool, table: &'static str) -> Result<i64, DbError> {
    let count: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(1) FROM {table}")).fetch_one(pool).await?;
    Ok(count)
}

struct SeedTableContract {
    table: &'static str,
    expected_rows: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub tables_seeded: Vec<(&'static str, i64)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

impl VerificationResult {
    pub fn failed_checks(&self) -> Vec<&'static str> {
        self.checks.iter().filter(|(_, ok)| !ok).map(|(name, _)| *name).collect()
    }
}

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;

/// Migrations in application order; every script is idempotent and runs on each start
const MIGRATIONS: &[(&str, &str)] = &[
    ("001_create_users.sql", include_str!("sql/001_create_users.sql")),
    (
        "002_create_detections.sql",
        include_str!("sql/002_create_detections.sql"),
    ),
];

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for (name, sql) in MIGRATIONS {
        execute_migration(pool, name, sql).await?;
        info!("Applied migration: {}", name);
    }

    Ok(())
}

async fn execute_migration(pool: &PgPool, name: &str, sql: &str) -> Result<()> {
    sqlx::raw_sql(sql)
        .execute(pool)
        .await
        .with_context(|| format!("Migration {} failed", name))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_ordered_by_prefix() {
        let prefixes: Vec<u32> = MIGRATIONS
            .iter()
            .map(|(name, _)| name.split('_').next().unwrap().parse().unwrap())
            .collect();
        let mut sorted = prefixes.clone();
        sorted.sort_unstable();
        assert_eq!(prefixes, sorted);
    }
}

pub mod schema;
use std::sync::Arc;

use anyhow::anyhow;
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;

#[derive(Clone)]
pub struct Db {
    pub pool: Arc<AnyPool>,
}

impl Db {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = AnyPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        schema::migrate(&self.pool).await
    }
}

/* =========================
Numeric safety helpers
========================= */

pub(crate) fn u64_to_i64(v: u64) -> anyhow::Result<i64> {
    if v > i64::MAX as u64 {
        return Err(anyhow!("u64 too large for i64: {v}"));
    }
    Ok(v as i64)
}

pub(crate) fn i64_to_u64(v: i64) -> anyhow::Result<u64> {
    if v < 0 {
        return Err(anyhow!("negative i64 where u64 expected: {v}"));
    }
    Ok(v as u64)
}

pub(crate) fn opt_u64_to_i64(v: Option<u64>) -> anyhow::Result<Option<i64>> {
    v.map(u64_to_i64).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_conversions_reject_out_of_range() {
        assert_eq!(u64_to_i64(42).unwrap(), 42);
        assert!(u64_to_i64(u64::MAX).is_err());
        assert_eq!(i64_to_u64(7).unwrap(), 7);
        assert!(i64_to_u64(-1).is_err());
        assert_eq!(opt_u64_to_i64(None).unwrap(), None);
        assert!(opt_u64_to_i64(Some(u64::MAX)).is_err());
    }
}

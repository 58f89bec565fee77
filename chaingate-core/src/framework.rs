use sqlx::PgPool;

/// Executes the `kanau` query processors in [`crate::entities`] against
/// the connection pool.
#[derive(Debug, Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
#[error("engine error: {0}")]
pub struct EngineError(pub String);

/// SqlEngine is the seam to the relational engine that actually executes SQL. The
/// sequencer only ever replays committed text through it; result sets stay on the
/// engine's side of the seam.
#[async_trait]
pub trait SqlEngine: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<(), EngineError>;

    /// Drops and recreates the application database. Rollback only.
    async fn recreate_database(&self) -> Result<(), EngineError>;
}

/// Engine that accepts everything and does nothing. For tests and sequencer-only nodes.
pub struct NullEngine;

#[async_trait]
impl SqlEngine for NullEngine {
    async fn execute(&self, _sql: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn recreate_database(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

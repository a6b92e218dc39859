use flume::{bounded, Receiver, Sender};
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::types::ActivityLog;

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Queue capacity (max logs in memory before backpressure)
    pub queue_capacity: usize,

    /// Batch size for database inserts
    pub batch_size: usize,

    /// Max wait time before flushing batch (milliseconds)
    pub batch_timeout_ms: u64,

    /// Number of worker tasks for database inserts
    pub worker_count: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            batch_size: 100,
            batch_timeout_ms: 1000,
            worker_count: 2,
        }
    }
}

/// Async mutation audit logger with queue mechanism
#[derive(Clone)]
pub struct ActivityLogger {
    sender: Sender<ActivityLog>,
}

impl ActivityLogger {
    /// Initialize logger with background workers
    pub fn new(pool: PgPool, config: LoggerConfig) -> Self {
        let (sender, receiver) = bounded(config.queue_capacity);

        info!(
            "Initializing ActivityLogger: queue={}, batch={}, timeout={}ms, workers={}",
            config.queue_capacity, config.batch_size, config.batch_timeout_ms, config.worker_count
        );

        for worker_id in 0..config.worker_count {
            let pool = pool.clone();
            let receiver = receiver.clone();
            let config = config.clone();

            tokio::spawn(async move {
                Self::worker_loop(worker_id, pool, receiver, config).await;
            });
        }

        Self { sender }
    }

    /// Bootstrap the audit table. Idempotent; invoked once at startup.
    pub async fn ensure_table(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS menu_activity_log (
                id BIGSERIAL PRIMARY KEY,
                operator_id BIGINT NOT NULL,
                session_id UUID,
                activity_type TEXT NOT NULL,
                activity_status TEXT NOT NULL,
                entity_id UUID,
                detail TEXT,
                error_message TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_menu_activity_operator
             ON menu_activity_log(operator_id, created_at)",
        )
        .execute(pool)
        .await?;

        debug!("Activity log table ensured");
        Ok(())
    }

    /// Log activity (non-blocking, fire-and-forget)
    pub fn log(&self, activity: ActivityLog) {
        if let Err(e) = self.sender.try_send(activity) {
            warn!("Failed to enqueue audit log (queue full?): {}", e);
        }
    }

    /// Worker loop - processes logs in batches
    async fn worker_loop(
        worker_id: usize,
        pool: PgPool,
        receiver: Receiver<ActivityLog>,
        config: LoggerConfig,
    ) {
        info!("Audit logger worker {} started", worker_id);

        let mut batch: Vec<ActivityLog> = Vec::with_capacity(config.batch_size);
        let batch_timeout = Duration::from_millis(config.batch_timeout_ms);

        loop {
            match tokio::time::timeout(batch_timeout, receiver.recv_async()).await {
                Ok(Ok(log)) => {
                    batch.push(log);
                    if batch.len() >= config.batch_size {
                        Self::flush(worker_id, &pool, &mut batch).await;
                    }
                }
                Ok(Err(_)) => {
                    // Channel closed: drain and stop.
                    Self::flush(worker_id, &pool, &mut batch).await;
                    info!("Audit logger worker {} stopped", worker_id);
                    break;
                }
                Err(_) => {
                    Self::flush(worker_id, &pool, &mut batch).await;
                }
            }
        }
    }

    async fn flush(worker_id: usize, pool: &PgPool, batch: &mut Vec<ActivityLog>) {
        if batch.is_empty() {
            return;
        }

        let entries = std::mem::take(batch);
        let count = entries.len();

        let result = async {
            let mut tx = pool.begin().await?;
            for entry in &entries {
                sqlx::query(
                    r#"INSERT INTO menu_activity_log
                        (operator_id, session_id, activity_type, activity_status,
                         entity_id, detail, error_message, created_at)
                       VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
                )
                .bind(entry.operator_id)
                .bind(entry.session_id)
                .bind(entry.activity_type.as_str())
                .bind(entry.activity_status.as_str())
                .bind(entry.entity_id)
                .bind(entry.detail.as_deref())
                .bind(entry.error_message.as_deref())
                .bind(entry.created_at)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            Ok::<(), sqlx::Error>(())
        }
        .await;

        match result {
            Ok(()) => debug!("Worker {} flushed {} audit entries", worker_id, count),
            Err(e) => error!("Worker {} failed to flush {} audit entries: {}", worker_id, count, e),
        }
    }
}

//! Job context: correlation fields for logging and an optional deadline.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{error, info, info_span, Instrument, Span};
use uuid::Uuid;

use crate::error::DeadlineExceeded;

#[derive(Debug, Clone)]
pub struct JobContext {
    pub actor: &'static str,
    pub job_id: Uuid,
    pub publish_id: Option<Uuid>,
    pub deadline: Option<Duration>,
}

impl JobContext {
    pub fn new(actor: &'static str) -> Self {
        Self {
            actor,
            job_id: Uuid::new_v4(),
            publish_id: None,
            deadline: None,
        }
    }

    pub fn for_publish(mut self, publish_id: Uuid) -> Self {
        self.publish_id = Some(publish_id);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Span carrying the job's correlation fields. Every event logged while
    /// the job runs is attached to it.
    pub fn span(&self) -> Span {
        let publish_id = self.publish_id.map(|id| id.to_string());
        info_span!(
            "job",
            actor = self.actor,
            publish_id = publish_id.as_deref().unwrap_or("-"),
            job_id = %self.job_id,
        )
    }
}

/// Run `fut` as the job described by `ctx`.
///
/// The future is dropped once the deadline passes; whatever it had not
/// committed by then is the caller's to discard.
pub async fn run_job<F, T, E>(ctx: &JobContext, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<DeadlineExceeded> + Display,
{
    let actor = ctx.actor;
    let deadline = ctx.deadline;

    async move {
        info!("[JOB] Starting {actor}");
        let started = Instant::now();

        let result = match deadline {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(E::from(DeadlineExceeded(limit))),
            },
            None => fut.await,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(elapsed_ms, "[JOB] Completed {actor}"),
            Err(err) => error!(elapsed_ms, error = %err, "[JOB] Failed {actor}"),
        }
        result
    }
    .instrument(ctx.span())
    .await
}

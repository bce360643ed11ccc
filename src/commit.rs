//! Commit state machine.
//!
//! A publish moves PENDING → COMMITTING when a commit is requested (see
//! [`crate::publish::request_commit`]). The coordinator then:
//!
//! 1. acquires a storage client for the environment's backend profile,
//! 2. resolves links and commits the rewrites,
//! 3. runs the autoindex engine,
//! 4. moves the publish to COMMITTED, or to FAILED with a detail message.
//!
//! Failures that say nothing about the publish itself (pool timeout or
//! shutdown, deadline, store errors while loading) return [`CommitError`] and
//! leave the publish COMMITTING so the job can be retried. A pool whose
//! clients cannot be built for a structural reason fails the publish.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::autoindex::{AutoindexEngine, AutoindexReport, YumIndexGenerator};
use crate::config::Settings;
use crate::contract::{IndexGenerator, Session};
use crate::error::CommitError;
use crate::job::{run_job, JobContext};
use crate::links::resolve_links;
use crate::model::{Publish, PublishState};
use crate::pool::ClientPoolRegistry;

pub struct PublishCommitCoordinator<G = YumIndexGenerator> {
    settings: Arc<Settings>,
    pools: Arc<ClientPoolRegistry>,
    autoindex: AutoindexEngine<G>,
}

impl PublishCommitCoordinator<YumIndexGenerator> {
    pub fn new(settings: Arc<Settings>, pools: Arc<ClientPoolRegistry>) -> Self {
        Self::with_generator(settings, pools, YumIndexGenerator::new())
    }
}

impl<G: IndexGenerator> PublishCommitCoordinator<G> {
    pub fn with_generator(settings: Arc<Settings>, pools: Arc<ClientPoolRegistry>, generator: G) -> Self {
        let autoindex = AutoindexEngine::new(generator, settings.autoindex_filename.clone());
        Self {
            settings,
            pools,
            autoindex,
        }
    }

    /// Commit `publish_id` as a job bounded by `deadline`.
    ///
    /// On deadline expiry the uncommitted session state is discarded and the
    /// publish is left COMMITTING.
    pub async fn commit<S>(
        &self,
        session: &S,
        publish_id: Uuid,
        deadline: Option<Duration>,
    ) -> Result<PublishState, CommitError>
    where
        S: Session + ?Sized,
    {
        let mut ctx = JobContext::new("commit_publish").for_publish(publish_id);
        if let Some(deadline) = deadline {
            ctx = ctx.with_deadline(deadline);
        }

        let result = run_job(&ctx, self.run(session, publish_id)).await;
        if let Err(CommitError::Deadline(ref exceeded)) = result {
            session.rollback();
            warn!(
                %publish_id,
                limit = ?exceeded.0,
                "[COMMIT] Publish abandoned at deadline, left in COMMITTING"
            );
        }
        result
    }

    /// Run the commit sequence for a COMMITTING publish, returning its
    /// terminal state.
    pub async fn run<S>(&self, session: &S, publish_id: Uuid) -> Result<PublishState, CommitError>
    where
        S: Session + ?Sized,
    {
        let publish = session
            .publish(publish_id)?
            .ok_or(CommitError::NotFound(publish_id))?;
        if publish.state != PublishState::Committing {
            return Err(CommitError::InvalidState {
                id: publish_id,
                state: publish.state,
            });
        }
        info!(%publish_id, env = %publish.env, "[COMMIT] Committing publish");

        let env = match self.settings.environment(&publish.env) {
            Ok(env) => env,
            Err(err) => return self.fail(session, publish_id, err.to_string()),
        };

        let client = match self.pools.acquire(env.profile()).await {
            Ok(client) => client,
            Err(err) if err.is_structural() => {
                return self.fail(session, publish_id, err.to_string())
            }
            Err(err) => return Err(err.into()),
        };

        match resolve_links(session, publish_id) {
            Ok(_) => session.commit()?,
            Err(err) => {
                session.rollback();
                return self.fail(session, publish_id, err.to_string());
            }
        }

        match self.autoindex.run(session, &publish, env, &*client).await {
            Ok(report) if report.all_roots_failed() => {
                return self.fail(session, publish_id, describe_failures(&report));
            }
            Ok(_) => {}
            Err(err) => return self.fail(session, publish_id, err.to_string()),
        }
        client.release();

        let mut publish = session
            .publish(publish_id)?
            .ok_or(CommitError::NotFound(publish_id))?;
        publish.transition(PublishState::Committed);
        session.save_publish(&publish)?;
        session.commit()?;

        info!(%publish_id, "[COMMIT] Publish committed");
        Ok(PublishState::Committed)
    }

    /// Resolve links and generate indexes without changing the publish
    /// state.
    ///
    /// Link rewrites are committed before any index is generated. Unresolved
    /// links and aborted runs are returned as errors with the session rolled
    /// back to its last commit.
    pub async fn autoindex<S>(
        &self,
        session: &S,
        publish_id: Uuid,
    ) -> Result<AutoindexReport, CommitError>
    where
        S: Session + ?Sized,
    {
        let ctx = JobContext::new("autoindex_publish").for_publish(publish_id);
        run_job(&ctx, async {
            let publish = session
                .publish(publish_id)?
                .ok_or(CommitError::NotFound(publish_id))?;
            let env = self.settings.environment(&publish.env)?;
            let client = self.pools.acquire(env.profile()).await?;

            match resolve_links(session, publish_id) {
                Ok(_) => session.commit()?,
                Err(err) => {
                    session.rollback();
                    warn!(%publish_id, error = %err, "[AUTOINDEX] Cannot autoindex with unresolved links");
                    return Err(err.into());
                }
            }

            match self.autoindex.run(session, &publish, env, &*client).await {
                Ok(report) => Ok(report),
                Err(err) => {
                    session.rollback();
                    warn!(%publish_id, error = %err, "[AUTOINDEX] Autoindex aborted");
                    Err(err.into())
                }
            }
        })
        .await
    }

    fn fail<S>(
        &self,
        session: &S,
        publish_id: Uuid,
        detail: String,
    ) -> Result<PublishState, CommitError>
    where
        S: Session + ?Sized,
    {
        session.rollback();
        let mut publish: Publish = session
            .publish(publish_id)?
            .ok_or(CommitError::NotFound(publish_id))?;

        warn!(%publish_id, %detail, "[COMMIT] Publish failed");
        publish.fail(detail);
        session.save_publish(&publish)?;
        session.commit()?;
        Ok(PublishState::Failed)
    }
}

fn describe_failures(report: &AutoindexReport) -> String {
    let roots: Vec<String> = report
        .failures
        .iter()
        .map(|failure| format!("{}: {}", failure.root, failure.reason))
        .collect();
    format!("Autoindex failed for every repository root:\n\t{}", roots.join("\n\t"))
}

//! Durable scheduled activation.
//!
//! Every submitted request gets an `activation_jobs` row due `delay_secs`
//! after creation. `run_due` is driven by the background poller in
//! `tasks`; it claims due jobs with a conditional update so several
//! processes can poll the same table, then applies the guarded
//! `pending -> activated` transition. Jobs survive restarts; manual
//! activation by an operator works regardless of job state.

use std::future::Future;

use crate::config::ActivationConfig;
use crate::entities::activation_job_entity as jobs;
use crate::error::{AppError, AppResult};
use crate::services::RequestService;
use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};

/// The step a due job performs.
pub trait Activator: Clone + Send + Sync + 'static {
    /// Returns `Ok(true)` when the request moved to activated, `Ok(false)`
    /// when it had already left pending.
    fn activate_if_pending(&self, request_id: i64) -> impl Future<Output = AppResult<bool>> + Send;
}

impl Activator for RequestService {
    fn activate_if_pending(&self, request_id: i64) -> impl Future<Output = AppResult<bool>> + Send {
        RequestService::activate_if_pending(self, request_id)
    }
}

/// Counters for one polling pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ActivationReport {
    pub activated: u64,
    pub skipped: u64,
    pub retried: u64,
    pub abandoned: u64,
}

impl ActivationReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub(crate) async fn schedule_activation<C: ConnectionTrait>(
    conn: &C,
    request_id: i64,
    due_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<jobs::Model, DbErr> {
    jobs::ActiveModel {
        request_id: Set(request_id),
        due_at: Set(due_at),
        attempts: Set(0),
        claimed_at: Set(None),
        completed_at: Set(None),
        last_error: Set(None),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await
}

#[derive(Clone)]
pub struct ActivationService<A = RequestService> {
    pool: DatabaseConnection,
    activator: A,
    config: ActivationConfig,
}

impl<A: Activator> ActivationService<A> {
    pub fn new(pool: DatabaseConnection, activator: A, config: ActivationConfig) -> Self {
        Self {
            pool,
            activator,
            config,
        }
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.poll_interval_secs.max(1))
    }

    /// Latest job recorded for a request.
    pub async fn job_for_request(&self, request_id: i64) -> AppResult<Option<jobs::Model>> {
        Ok(jobs::Entity::find()
            .filter(jobs::Column::RequestId.eq(request_id))
            .order_by_desc(jobs::Column::Id)
            .one(&self.pool)
            .await?)
    }

    /// Processes every job due at `now`.
    ///
    /// Only the initial fetch propagates errors; per-job failures are logged
    /// and rescheduled so one bad row never stalls the queue.
    pub async fn run_due(&self, now: DateTime<Utc>) -> AppResult<ActivationReport> {
        let stale_before = now - Duration::seconds(self.config.claim_ttl_secs);
        let due = jobs::Entity::find()
            .filter(jobs::Column::CompletedAt.is_null())
            .filter(jobs::Column::DueAt.lte(now))
            .filter(claimable(stale_before))
            .order_by_asc(jobs::Column::DueAt)
            .limit(self.config.batch_size.max(1))
            .all(&self.pool)
            .await?;

        let mut report = ActivationReport::default();
        for job in due {
            match self.claim(&job, now, stale_before).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    log::warn!("Failed to claim activation job {}: {e}", job.id);
                    continue;
                }
            }

            match self.activator.activate_if_pending(job.request_id).await {
                Ok(activated) => {
                    if activated {
                        report.activated += 1;
                    } else {
                        log::debug!(
                            "Request {} already left pending, job {} is a no-op",
                            job.request_id,
                            job.id
                        );
                        report.skipped += 1;
                    }
                    if let Err(e) = self.finish(job.id, now, None).await {
                        log::warn!("Failed to close activation job {}: {e}", job.id);
                    }
                }
                Err(e) => {
                    if self.fail(&job, now, &e).await {
                        report.abandoned += 1;
                    } else {
                        report.retried += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    /// Atomically takes the job; false when another poller got it first.
    async fn claim(
        &self,
        job: &jobs::Model,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = jobs::Entity::update_many()
            .col_expr(jobs::Column::ClaimedAt, Expr::value(now))
            .col_expr(
                jobs::Column::Attempts,
                Expr::col(jobs::Column::Attempts).add(1),
            )
            .filter(jobs::Column::Id.eq(job.id))
            .filter(jobs::Column::CompletedAt.is_null())
            .filter(claimable(stale_before))
            .exec(&self.pool)
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn finish(
        &self,
        job_id: i64,
        now: DateTime<Utc>,
        last_error: Option<String>,
    ) -> AppResult<()> {
        jobs::Entity::update_many()
            .col_expr(jobs::Column::CompletedAt, Expr::value(now))
            .col_expr(jobs::Column::ClaimedAt, Expr::value(Option::<DateTime<Utc>>::None))
            .col_expr(jobs::Column::LastError, Expr::value(last_error))
            .filter(jobs::Column::Id.eq(job_id))
            .exec(&self.pool)
            .await?;
        Ok(())
    }

    /// Records a failed attempt. Returns true when the job was given up.
    async fn fail(&self, job: &jobs::Model, now: DateTime<Utc>, err: &AppError) -> bool {
        let attempts = job.attempts + 1;
        let message = err.to_string();

        if attempts >= self.config.max_attempts {
            log::error!(
                "Activation of request {} abandoned after {attempts} attempts: {message}; \
                 request stays in its current status for manual activation",
                job.request_id
            );
            if let Err(e) = self.finish(job.id, now, Some(message)).await {
                log::warn!("Failed to close activation job {}: {e}", job.id);
            }
            return true;
        }

        let retry_at = now + Duration::seconds(self.config.retry_backoff_secs);
        log::warn!(
            "Activation of request {} failed (attempt {attempts}/{}), retrying at {retry_at}: {message}",
            job.request_id,
            self.config.max_attempts
        );
        let released = jobs::Entity::update_many()
            .col_expr(jobs::Column::ClaimedAt, Expr::value(Option::<DateTime<Utc>>::None))
            .col_expr(jobs::Column::DueAt, Expr::value(retry_at))
            .col_expr(jobs::Column::LastError, Expr::value(Some(message)))
            .filter(jobs::Column::Id.eq(job.id))
            .exec(&self.pool)
            .await;
        if let Err(e) = released {
            // 认领超时后任务仍会被重新认领
            log::warn!("Failed to release activation job {}: {e}", job.id);
        }
        false
    }
}

fn claimable(stale_before: DateTime<Utc>) -> Condition {
    Condition::any()
        .add(jobs::Column::ClaimedAt.is_null())
        .add(jobs::Column::ClaimedAt.lt(stale_before))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory_pool;
    use crate::entities::RequestStatus;
    use crate::feed::ChangeFeed;
    use crate::models::{CreateCredentialRequest, RequestResponse};
    use crate::services::CredentialService;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PHONE: &str = "+4917600000000";

    /// Always fails like a dropped database connection.
    #[derive(Clone, Default)]
    struct FailingActivator {
        calls: Arc<AtomicUsize>,
    }

    impl Activator for FailingActivator {
        fn activate_if_pending(
            &self,
            _request_id: i64,
        ) -> impl Future<Output = AppResult<bool>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::DatabaseError(DbErr::Custom("connection reset".into()))) }
        }
    }

    struct Fixture {
        pool: DatabaseConnection,
        requests: RequestService,
        config: ActivationConfig,
    }

    async fn fixture() -> Fixture {
        let pool = memory_pool().await;
        let config = ActivationConfig {
            max_attempts: 3,
            ..ActivationConfig::default()
        };
        let feed = ChangeFeed::new(16);
        let credentials = CredentialService::new(pool.clone(), feed.clone());
        credentials
            .create(CreateCredentialRequest {
                phone: PHONE.into(),
                access_code: Some("ABC234".into()),
            })
            .await
            .unwrap();
        Fixture {
            requests: RequestService::new(pool.clone(), feed, &config),
            pool,
            config,
        }
    }

    impl Fixture {
        fn service(&self) -> ActivationService {
            ActivationService::new(self.pool.clone(), self.requests.clone(), self.config.clone())
        }

        async fn submit(&self) -> RequestResponse {
            self.requests.submit(PHONE, "ABC234").await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_submit_schedules_job_at_delay() {
        let fx = fixture().await;
        let request = fx.submit().await;

        let job = fx
            .service()
            .job_for_request(request.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.due_at, request.created_at + Duration::seconds(240));
        assert_eq!(job.attempts, 0);
        assert!(job.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_activates_at_due_time_never_before() {
        let fx = fixture().await;
        let svc = fx.service();
        let request = fx.submit().await;
        let t0 = request.created_at;

        let early = svc.run_due(t0 + Duration::seconds(239)).await.unwrap();
        assert!(early.is_empty());
        assert_eq!(
            fx.requests.get(request.id).await.unwrap().status,
            RequestStatus::Pending
        );

        let due = svc.run_due(t0 + Duration::seconds(240)).await.unwrap();
        assert_eq!(due.activated, 1);
        assert_eq!(
            fx.requests.get(request.id).await.unwrap().status,
            RequestStatus::Activated
        );

        let job = svc.job_for_request(request.id).await.unwrap().unwrap();
        assert!(job.completed_at.is_some());
        assert_eq!(job.attempts, 1);

        // 已完成的任务不会再次执行
        let again = svc.run_due(t0 + Duration::seconds(600)).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_job_after_manual_progress_is_noop() {
        let fx = fixture().await;
        let svc = fx.service();
        let request = fx.submit().await;

        fx.requests.activate(request.id).await.unwrap();
        fx.requests.mark_sms_sent(request.id).await.unwrap();

        let report = svc
            .run_due(request.created_at + Duration::seconds(240))
            .await
            .unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.activated, 0);
        assert_eq!(
            fx.requests.get(request.id).await.unwrap().status,
            RequestStatus::SmsSent
        );
    }

    #[tokio::test]
    async fn test_failures_are_retried_then_abandoned() {
        let fx = fixture().await;
        let activator = FailingActivator::default();
        let svc = ActivationService::new(fx.pool.clone(), activator.clone(), fx.config.clone());
        let request = fx.submit().await;

        let mut now = request.created_at + Duration::seconds(240);
        let first = svc.run_due(now).await.unwrap();
        assert_eq!(first.retried, 1);

        // 退避时间内不会重试
        let waiting = svc.run_due(now + Duration::seconds(1)).await.unwrap();
        assert!(waiting.is_empty());

        now += Duration::seconds(fx.config.retry_backoff_secs);
        assert_eq!(svc.run_due(now).await.unwrap().retried, 1);

        now += Duration::seconds(fx.config.retry_backoff_secs);
        assert_eq!(svc.run_due(now).await.unwrap().abandoned, 1);
        assert_eq!(activator.calls.load(Ordering::SeqCst), 3);

        let job = svc.job_for_request(request.id).await.unwrap().unwrap();
        assert!(job.completed_at.is_some());
        assert_eq!(job.last_error.as_deref(), Some("Database error: Custom Error: connection reset"));

        // 请求保持原状态，操作员仍可手动激活
        assert_eq!(
            fx.requests.get(request.id).await.unwrap().status,
            RequestStatus::Pending
        );
        let manual = fx.requests.activate(request.id).await.unwrap();
        assert_eq!(manual.status, RequestStatus::Activated);
    }

    #[tokio::test]
    async fn test_claimed_job_is_not_taken_twice() {
        let fx = fixture().await;
        let svc = fx.service();
        let request = fx.submit().await;
        let now = request.created_at + Duration::seconds(240);
        let job = svc.job_for_request(request.id).await.unwrap().unwrap();
        let stale_before = now - Duration::seconds(fx.config.claim_ttl_secs);

        assert!(svc.claim(&job, now, stale_before).await.unwrap());
        assert!(!svc.claim(&job, now, stale_before).await.unwrap());

        // 认领超时后可以重新认领
        let later = now + Duration::seconds(fx.config.claim_ttl_secs + 1);
        let stale_before = later - Duration::seconds(fx.config.claim_ttl_secs);
        assert!(svc.claim(&job, later, stale_before).await.unwrap());
    }
}

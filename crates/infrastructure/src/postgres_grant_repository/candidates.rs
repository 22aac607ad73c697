use chrono::{DateTime, Duration, Utc};
use grantwarden_application::{expiry_warning_window_end, matches_candidate};
use grantwarden_core::{AppError, AppResult};
use grantwarden_domain::{EDITOR_DOWNGRADE_GRACE_DAYS, Grant, JobKind};
use tracing::warn;

use super::{GRANT_COLUMNS, GrantRow, PostgresGrantRepository, grant_from_row};

impl PostgresGrantRepository {
    pub(super) async fn find_candidates_impl(
        &self,
        job_kind: JobKind,
        as_of: DateTime<Utc>,
    ) -> AppResult<Vec<Grant>> {
        let (predicate, first_bound, second_bound) = match job_kind {
            JobKind::ExpiryWarning => (
                "status = 'active' AND expires_at >= $1 AND expires_at < $2",
                Some(as_of),
                Some(expiry_warning_window_end(as_of)),
            ),
            JobKind::Downgrade => (
                "status = 'active' AND needs_manual_review = FALSE \
                 AND role = 'editor' AND granted_at <= $1",
                Some(as_of - Duration::days(EDITOR_DOWNGRADE_GRACE_DAYS)),
                None,
            ),
            JobKind::ExpiryCleanup => (
                "(status = 'active' AND expires_at < $1) \
                 OR (status = 'expired' AND needs_manual_review = FALSE)",
                Some(as_of),
                None,
            ),
            JobKind::Reconciliation => (
                "status = 'active' AND needs_manual_review = FALSE",
                None,
                None,
            ),
        };

        let query = format!(
            "SELECT {GRANT_COLUMNS} FROM grants WHERE {predicate} ORDER BY requested_at ASC, id ASC"
        );
        let mut statement = sqlx::query_as::<_, GrantRow>(query.as_str());
        for bound in [first_bound, second_bound].into_iter().flatten() {
            statement = statement.bind(bound);
        }

        let rows = statement.fetch_all(&self.pool).await.map_err(|error| {
            AppError::Internal(format!("failed to load '{job_kind}' candidates: {error}"))
        })?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let grant_id = row.id;
            let grant = match grant_from_row(row) {
                Ok(grant) => grant,
                Err(error) => {
                    warn!(
                        grant_id = %grant_id,
                        job = %job_kind,
                        error = %error,
                        "skipping unreadable grant row"
                    );
                    continue;
                }
            };
            if matches_candidate(&grant, job_kind, as_of) {
                candidates.push(grant);
            }
        }

        Ok(candidates)
    }
}

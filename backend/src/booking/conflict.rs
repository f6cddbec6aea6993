use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::AppError;
use crate::logger::warn_if_slow;
use crate::model::{Interval, Party, PartyRole};
use crate::store::LessonRepository;

/// Overlap check against occupying lessons (scheduled or completed).
///
/// The check is a read; it is not serialized with the booking that follows,
/// so two requests racing for the same interval can both pass.
#[derive(Clone)]
pub struct ConflictGuard {
    lessons: Arc<dyn LessonRepository>,
}

impl ConflictGuard {
    pub fn new(lessons: Arc<dyn LessonRepository>) -> Self {
        Self { lessons }
    }

    #[instrument(skip(self), target = "conflict", fields(party_id = %party.id, role = ?party.role))]
    pub async fn has_conflict(&self, party: Party, proposed: Interval) -> Result<bool, AppError> {
        let existing = warn_if_slow(
            "occupying_between",
            Duration::from_millis(100),
            self.lessons.occupying_between(party, proposed),
        )
        .await?;

        let conflict = existing.iter().any(|i| i.overlaps(&proposed));
        if conflict {
            debug!(overlapping = existing.len(), "proposed interval is taken");
        }
        Ok(conflict)
    }

    /// Both the instructor and the learner must be free for `proposed`.
    pub async fn ensure_free(
        &self,
        instructor_id: Uuid,
        learner_id: Uuid,
        proposed: Interval,
    ) -> Result<(), AppError> {
        for party in [Party::instructor(instructor_id), Party::learner(learner_id)] {
            if self.has_conflict(party, proposed).await? {
                let who = match party.role {
                    PartyRole::Instructor => "instructor",
                    PartyRole::Learner => "learner",
                };
                return Err(AppError::Conflict(format!(
                    "{who} already has a lesson overlapping the requested time"
                )));
            }
        }
        Ok(())
    }
}

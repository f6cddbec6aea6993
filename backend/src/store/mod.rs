pub mod repository;
pub mod sqlite;

use std::sync::Arc;

pub use repository::{
    AvailabilityRepository, InstructorDirectory, LearnerDirectory, LedgerRepository,
    LessonRepository, PackageCatalog, PaymentRepository, RelationshipRepository,
};
pub use sqlite::SqliteStore;

/// Every persistence seam the services consume, injected as trait objects so
/// a single collaborator can be swapped without touching the rest.
#[derive(Clone)]
pub struct Stores {
    pub learners: Arc<dyn LearnerDirectory>,
    pub instructors: Arc<dyn InstructorDirectory>,
    pub packages: Arc<dyn PackageCatalog>,
    pub availability: Arc<dyn AvailabilityRepository>,
    pub lessons: Arc<dyn LessonRepository>,
    pub ledger: Arc<dyn LedgerRepository>,
    pub relationships: Arc<dyn RelationshipRepository>,
    pub payments: Arc<dyn PaymentRepository>,
}

impl Stores {
    pub fn sqlite(store: SqliteStore) -> Self {
        let store = Arc::new(store);
        Self {
            learners: store.clone(),
            instructors: store.clone(),
            packages: store.clone(),
            availability: store.clone(),
            lessons: store.clone(),
            ledger: store.clone(),
            relationships: store.clone(),
            payments: store,
        }
    }
}

pub mod availability;
pub mod conflict;
pub mod coordinator;
pub mod ledger;
pub mod pricing;
pub mod slots;

pub use availability::AvailabilityBook;
pub use conflict::ConflictGuard;
pub use coordinator::{BookingCoordinator, LessonRequest, PackageBooking, PackageRequest};
pub use ledger::{BalanceLedger, DebitOutcome};
pub use slots::{Slot, SlotFinder, SlotQuery, SlotResolver};

pub mod availability;
pub mod lesson;
pub mod party;
pub mod payment;

pub use availability::{
    AvailabilityOverride, TimeRange, WEEK, WeeklyAvailability, weekday_from_index, weekday_index,
};
pub use lesson::{
    Cancellation, CancelledBy, Funding, Interval, Lesson, LessonPaymentStatus, LessonStatus,
    OCCUPYING, PackageSlot,
};
pub use party::{Account, Instructor, Learner, LessonType, Package, Party, PartyRole, Relationship};
pub use payment::{Payment, PaymentKind, PaymentStatus};

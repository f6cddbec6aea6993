mod common;

use uuid::Uuid;

use lessons::booking::{LessonRequest, PackageRequest};
use lessons::error::AppError;
use lessons::model::{
    AvailabilityOverride, CancelledBy, Funding, Lesson, LessonPaymentStatus, LessonStatus,
    TimeRange, WeeklyAvailability,
};
use lessons::store::{LearnerDirectory, LessonRepository, RelationshipRepository};
use lessons::time::to_ms;

use common::{TestEnv, monday, monday_at};

fn request(learner_id: Uuid, instructor_id: Uuid, hh: u32, mm: u32) -> LessonRequest {
    LessonRequest {
        learner_id,
        instructor_id: Some(instructor_id),
        start: monday_at(hh, mm),
        duration_minutes: 60,
        lesson_type: "standard".into(),
        funding: Funding::LearnerBalance,
        pickup: Some("Station car park".into()),
        notes: None,
    }
}

fn starts(slots: &[lessons::booking::Slot]) -> Vec<String> {
    slots
        .iter()
        .map(|s| s.start.format("%H:%M").to_string())
        .collect()
}

#[tokio::test]
async fn booking_without_enough_balance_changes_nothing() {
    let env = TestEnv::new().await;
    let instructor = env.instructor().await;
    let learner = env.learner(4_000).await;

    let err = env
        .coordinator()
        .book_lesson(request(learner.id, instructor.id, 9, 0))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::InsufficientBalance {
            required: 4_500,
            available: 4_000
        }
    ));
    assert_eq!(env.balance(learner.id).await, 4_000);
    assert!(
        env.store
            .lessons_for_learner(&learner.id, None)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn booking_debits_and_schedules_a_paid_lesson() {
    let env = TestEnv::new().await;
    let instructor = env.instructor().await;
    let learner = env.learner(10_000).await;

    let lesson = env
        .coordinator()
        .book_lesson(request(learner.id, instructor.id, 10, 0))
        .await
        .unwrap();

    assert_eq!(lesson.status, LessonStatus::Scheduled);
    assert_eq!(lesson.payment_status, LessonPaymentStatus::Paid);
    assert_eq!(lesson.price, 4_500);
    assert_eq!(lesson.start_ms, to_ms(monday_at(10, 0)));
    assert_eq!(lesson.end_ms, to_ms(monday_at(11, 0)));
    assert_eq!(env.balance(learner.id).await, 5_500);

    let stored = env.store.find_lesson(&lesson.id).await.unwrap().unwrap();
    assert_eq!(stored, lesson);

    let rel = env
        .store
        .find_relationship(&learner.id, &instructor.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rel.lesson_count, 1);
    assert_eq!(rel.balance, 0);
}

#[tokio::test]
async fn available_slots_follow_the_weekly_window() {
    let env = TestEnv::new().await;
    let instructor = env.instructor().await;

    let slots = env
        .slot_finder()
        .resolve_slots(&instructor.id, monday(), monday(), 60)
        .await
        .unwrap();

    assert_eq!(starts(&slots), ["09:00", "09:30", "10:00", "10:30", "11:00"]);
}

#[tokio::test]
async fn booked_time_leaves_and_returns_after_cancellation() {
    let env = TestEnv::new().await;
    let instructor = env.instructor().await;
    let learner = env.learner(10_000).await;
    let coordinator = env.coordinator();
    let finder = env.slot_finder();

    let lesson = coordinator
        .book_lesson(request(learner.id, instructor.id, 10, 0))
        .await
        .unwrap();

    let slots = finder
        .resolve_slots(&instructor.id, monday(), monday(), 60)
        .await
        .unwrap();
    assert_eq!(starts(&slots), ["09:00", "11:00"]);

    coordinator
        .cancel_lesson(&lesson.id, CancelledBy::Learner, Some("ill".into()))
        .await
        .unwrap();

    let slots = finder
        .resolve_slots(&instructor.id, monday(), monday(), 60)
        .await
        .unwrap();
    assert_eq!(starts(&slots), ["09:00", "09:30", "10:00", "10:30", "11:00"]);
}

#[tokio::test]
async fn date_override_replaces_the_weekly_pattern() {
    let env = TestEnv::new().await;
    let instructor = env.instructor().await;
    let finder = env.slot_finder();
    let book = env.availability();
    let sunday = monday().pred_opt().unwrap();

    book.set_override(&AvailabilityOverride {
        instructor_id: instructor.id,
        date: monday(),
        ranges: Vec::new(),
        available: false,
        reason: Some("bank holiday".into()),
    })
    .await
    .unwrap();
    book.set_override(&AvailabilityOverride {
        instructor_id: instructor.id,
        date: sunday,
        ranges: vec![TimeRange::parse("14:00", "16:00").unwrap()],
        available: true,
        reason: None,
    })
    .await
    .unwrap();

    let slots = finder
        .resolve_slots(&instructor.id, sunday, monday(), 60)
        .await
        .unwrap();

    assert!(slots.iter().all(|s| s.date == sunday));
    assert_eq!(starts(&slots), ["14:00", "14:30", "15:00"]);

    book.clear_override(&instructor.id, monday()).await.unwrap();
    assert!(matches!(
        book.clear_override(&instructor.id, monday()).await.unwrap_err(),
        AppError::NotFound(_)
    ));
    let slots = finder
        .resolve_slots(&instructor.id, monday(), monday(), 60)
        .await
        .unwrap();
    assert_eq!(slots.len(), 5);
}

#[tokio::test]
async fn slot_query_rejects_unknown_instructor() {
    let env = TestEnv::new().await;
    let err = env
        .slot_finder()
        .resolve_slots(&Uuid::new_v4(), monday(), monday(), 60)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn learner_cannot_be_in_two_lessons_at_once() {
    let env = TestEnv::new().await;
    let first = env.instructor().await;
    let second = env.instructor().await;
    let learner = env.learner(20_000).await;
    let coordinator = env.coordinator();

    coordinator
        .book_lesson(request(learner.id, first.id, 9, 0))
        .await
        .unwrap();

    let err = coordinator
        .book_lesson(request(learner.id, second.id, 9, 30))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(ref who) if who.contains("learner")));

    // Touching boundaries do not conflict.
    coordinator
        .book_lesson(request(learner.id, second.id, 10, 0))
        .await
        .unwrap();
    assert_eq!(env.balance(learner.id).await, 20_000 - 2 * 4_500);
}

#[tokio::test]
async fn instructor_conflict_is_reported_before_any_debit() {
    let env = TestEnv::new().await;
    let instructor = env.instructor().await;
    let a = env.learner(10_000).await;
    let b = env.learner(10_000).await;
    let coordinator = env.coordinator();

    coordinator
        .book_lesson(request(a.id, instructor.id, 9, 0))
        .await
        .unwrap();
    let err = coordinator
        .book_lesson(request(b.id, instructor.id, 9, 30))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Conflict(ref who) if who.contains("instructor")));
    assert_eq!(env.balance(b.id).await, 10_000);
}

#[tokio::test]
async fn primary_instructor_is_assigned_once_and_used_as_default() {
    let env = TestEnv::new().await;
    let instructor = env.instructor().await;
    let other = env.instructor().await;
    let learner = env.learner(20_000).await;
    let coordinator = env.coordinator();

    let mut req = request(learner.id, instructor.id, 9, 0);
    req.instructor_id = None;
    let err = coordinator.book_lesson(req.clone()).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    coordinator
        .book_lesson(request(learner.id, instructor.id, 9, 0))
        .await
        .unwrap();
    coordinator
        .book_lesson(request(learner.id, other.id, 10, 0))
        .await
        .unwrap();

    let stored = env.store.find_learner(&learner.id).await.unwrap().unwrap();
    assert_eq!(stored.primary_instructor_id, Some(instructor.id));

    req.start = monday_at(11, 0);
    let lesson = coordinator.book_lesson(req).await.unwrap();
    assert_eq!(lesson.instructor_id, instructor.id);
}

#[tokio::test]
async fn relationship_funded_booking_leaves_learner_balance_alone() {
    let env = TestEnv::new().await;
    let instructor = env.instructor().await;
    let learner = env.learner(1_000).await;
    let coordinator = env.coordinator();

    let mut req = request(learner.id, instructor.id, 9, 0);
    req.funding = Funding::RelationshipBalance;
    let err = coordinator.book_lesson(req.clone()).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::InsufficientBalance {
            required: 4_500,
            available: 0
        }
    ));

    lessons::booking::BalanceLedger::new(env.stores.ledger.clone())
        .credit(
            &lessons::model::Account::Relationship {
                learner_id: learner.id,
                instructor_id: instructor.id,
            },
            5_000,
        )
        .await
        .unwrap();

    let lesson = coordinator.book_lesson(req).await.unwrap();
    assert_eq!(lesson.funding, Funding::RelationshipBalance);
    assert_eq!(env.balance(learner.id).await, 1_000);

    let rel = env
        .store
        .find_relationship(&learner.id, &instructor.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rel.balance, 500);
}

#[tokio::test]
async fn package_creates_evenly_priced_placeholders() {
    let env = TestEnv::new().await;
    let instructor = env.instructor().await;
    let learner = env.learner(12_000).await;
    let package = env.package(instructor.id, 3, 10_000).await;
    let coordinator = env.coordinator();

    let booking = coordinator
        .book_package(PackageRequest {
            learner_id: learner.id,
            package_id: package.id,
            funding: Funding::LearnerBalance,
        })
        .await
        .unwrap();

    assert_eq!(booking.price, 10_000);
    assert_eq!(booking.lessons.len(), 3);
    assert_eq!(env.balance(learner.id).await, 2_000);

    for (i, lesson) in booking.lessons.iter().enumerate() {
        assert_eq!(lesson.price, 3_333);
        assert_eq!(lesson.status, LessonStatus::PendingConfirmation);
        assert_eq!(lesson.payment_status, LessonPaymentStatus::Paid);
        assert_eq!(lesson.start_ms, 0);
        let slot = lesson.package.unwrap();
        assert_eq!(slot.package_id, package.id);
        assert_eq!(slot.ordinal, i as u32 + 1);
        assert_eq!(slot.total, 3);
    }

    // Placeholders do not occupy anyone's calendar.
    let slots = env
        .slot_finder()
        .resolve_slots(&instructor.id, monday(), monday(), 60)
        .await
        .unwrap();
    assert_eq!(slots.len(), 5);

    let listed = coordinator.package_lessons(&package.id).await.unwrap();
    assert_eq!(listed.len(), 3);
}

#[tokio::test]
async fn package_lesson_can_be_scheduled_once() {
    let env = TestEnv::new().await;
    let instructor = env.instructor().await;
    let learner = env.learner(10_000).await;
    let package = env.package(instructor.id, 2, 9_000).await;
    let coordinator = env.coordinator();

    let booking = coordinator
        .book_package(PackageRequest {
            learner_id: learner.id,
            package_id: package.id,
            funding: Funding::LearnerBalance,
        })
        .await
        .unwrap();
    let placeholder = &booking.lessons[0];

    let scheduled = coordinator
        .schedule_package_lesson(&placeholder.id, monday_at(9, 0))
        .await
        .unwrap();
    assert_eq!(scheduled.status, LessonStatus::Scheduled);
    assert_eq!(scheduled.start_ms, to_ms(monday_at(9, 0)));

    let err = coordinator
        .schedule_package_lesson(&placeholder.id, monday_at(11, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    // The second placeholder cannot overlap the first.
    let err = coordinator
        .schedule_package_lesson(&booking.lessons[1].id, monday_at(9, 30))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let slots = env
        .slot_finder()
        .resolve_slots(&instructor.id, monday(), monday(), 60)
        .await
        .unwrap();
    assert_eq!(starts(&slots), ["10:00", "10:30", "11:00"]);
}

#[tokio::test]
async fn cancelling_refunds_exactly_once() {
    let env = TestEnv::new().await;
    let instructor = env.instructor().await;
    let learner = env.learner(4_500).await;
    let coordinator = env.coordinator();

    let lesson = coordinator
        .book_lesson(request(learner.id, instructor.id, 9, 0))
        .await
        .unwrap();
    assert_eq!(env.balance(learner.id).await, 0);

    let cancelled = coordinator
        .cancel_lesson(&lesson.id, CancelledBy::Instructor, None)
        .await
        .unwrap();
    assert_eq!(cancelled.status, LessonStatus::Cancelled);
    assert_eq!(cancelled.payment_status, LessonPaymentStatus::Refunded);
    assert_eq!(
        cancelled.cancellation.as_ref().unwrap().cancelled_by,
        CancelledBy::Instructor
    );
    assert_eq!(env.balance(learner.id).await, 4_500);

    let err = coordinator
        .cancel_lesson(&lesson.id, CancelledBy::Learner, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
    assert_eq!(env.balance(learner.id).await, 4_500);
}

#[tokio::test]
async fn completing_an_unpaid_lesson_charges_it() {
    let env = TestEnv::new().await;
    let instructor = env.instructor().await;
    let learner = env.learner(1_000).await;
    let now = lessons::time::now_ms();

    let lesson = Lesson {
        id: Uuid::new_v4(),
        instructor_id: instructor.id,
        learner_id: learner.id,
        start_ms: to_ms(monday_at(9, 0)),
        end_ms: to_ms(monday_at(10, 0)),
        duration_minutes: 60,
        lesson_type: "standard".into(),
        status: LessonStatus::Scheduled,
        payment_status: LessonPaymentStatus::Pending,
        price: 4_500,
        funding: Funding::LearnerBalance,
        package: None,
        pickup: None,
        notes: None,
        cancellation: None,
        created_ms: now,
        updated_ms: now,
    };
    env.store.insert_lesson(&lesson).await.unwrap();

    let done = env.coordinator().complete_lesson(&lesson.id).await.unwrap();
    assert_eq!(done.status, LessonStatus::Completed);
    assert_eq!(done.payment_status, LessonPaymentStatus::Paid);
    assert_eq!(env.balance(learner.id).await, -3_500);

    let err = env
        .coordinator()
        .mark_no_show(&lesson.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}

#[tokio::test]
async fn no_show_keeps_payment_and_frees_nothing() {
    let env = TestEnv::new().await;
    let instructor = env.instructor().await;
    let learner = env.learner(4_500).await;
    let coordinator = env.coordinator();

    let lesson = coordinator
        .book_lesson(request(learner.id, instructor.id, 9, 0))
        .await
        .unwrap();
    let missed = coordinator.mark_no_show(&lesson.id).await.unwrap();

    assert_eq!(missed.status, LessonStatus::NoShow);
    assert_eq!(missed.payment_status, LessonPaymentStatus::Paid);
    assert_eq!(env.balance(learner.id).await, 0);

    let listed = coordinator
        .learner_lessons(&learner.id, Some(LessonStatus::NoShow))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn rejects_zero_duration_and_unknown_learner() {
    let env = TestEnv::new().await;
    let instructor = env.instructor().await;
    let learner = env.learner(10_000).await;
    let coordinator = env.coordinator();

    let mut req = request(learner.id, instructor.id, 9, 0);
    req.duration_minutes = 0;
    assert!(matches!(
        coordinator.book_lesson(req).await.unwrap_err(),
        AppError::BadRequest(_)
    ));

    let req = request(Uuid::new_v4(), instructor.id, 9, 0);
    assert!(matches!(
        coordinator.book_lesson(req).await.unwrap_err(),
        AppError::NotFound(_)
    ));
}

#[tokio::test]
async fn week_is_created_lazily_and_days_are_unique() {
    let env = TestEnv::new().await;
    let instructor = lessons::model::Instructor {
        id: Uuid::new_v4(),
        name: "Sam Roads".into(),
        email: "sam@example.test".into(),
        hourly_rate: 4_000,
        currency: "gbp".into(),
        lesson_types: Vec::new(),
    };
    env.store.register_instructor(&instructor).await.unwrap();
    let book = env.availability();

    let week = book.week(&instructor.id).await.unwrap();
    assert_eq!(week.len(), 7);
    assert!(week[0].available);
    assert_eq!(week[0].ranges, vec![TimeRange::parse("09:00", "17:00").unwrap()]);
    assert!(!week[6].available);

    let monday_again = WeeklyAvailability {
        instructor_id: instructor.id,
        day: chrono::Weekday::Mon,
        ranges: vec![TimeRange::parse("07:00", "10:00").unwrap()],
        available: true,
    };
    let err = book.add_weekly_day(&monday_again).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    book.replace_weekly_day(&monday_again).await.unwrap();
    let slots = env
        .slot_finder()
        .resolve_slots(&instructor.id, monday(), monday(), 60)
        .await
        .unwrap();
    assert_eq!(starts(&slots), ["07:00", "07:30", "08:00", "08:30", "09:00"]);
}

#[tokio::test]
async fn first_explicit_weekly_day_is_accepted() {
    let env = TestEnv::new().await;
    let instructor = lessons::model::Instructor {
        id: Uuid::new_v4(),
        name: "Kim Lane".into(),
        email: "kim@example.test".into(),
        hourly_rate: 4_000,
        currency: "gbp".into(),
        lesson_types: Vec::new(),
    };
    env.store.register_instructor(&instructor).await.unwrap();
    let book = env.availability();

    let saturday = WeeklyAvailability {
        instructor_id: instructor.id,
        day: chrono::Weekday::Sat,
        ranges: vec![TimeRange::parse("10:00", "12:00").unwrap()],
        available: true,
    };
    book.add_weekly_day(&saturday).await.unwrap();

    let week = book.week(&instructor.id).await.unwrap();
    assert_eq!(week[5], saturday);

    let inverted = WeeklyAvailability {
        day: chrono::Weekday::Sun,
        ranges: vec![TimeRange::parse("12:00", "10:00").unwrap()],
        ..saturday
    };
    assert!(matches!(
        book.add_weekly_day(&inverted).await.unwrap_err(),
        AppError::BadRequest(_)
    ));
}

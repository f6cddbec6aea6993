use crate::model::Instructor;
use crate::money::{hourly, prorate};

/// Unit price for `duration_minutes` of `lesson_type`.
///
/// A named type is pro-rated from its own price and default duration;
/// an unknown type falls back to the hourly rate.
pub fn lesson_price(instructor: &Instructor, lesson_type: &str, duration_minutes: u32) -> i64 {
    match instructor.lesson_type(lesson_type) {
        Some(t) if t.duration_minutes > 0 => prorate(
            t.price,
            duration_minutes as i64,
            t.duration_minutes as i64,
        ),
        _ => hourly(instructor.hourly_rate, duration_minutes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LessonType;
    use uuid::Uuid;

    fn instructor() -> Instructor {
        Instructor {
            id: Uuid::new_v4(),
            name: "Sam".into(),
            email: "sam@example.test".into(),
            hourly_rate: 3_600,
            currency: "gbp".into(),
            lesson_types: vec![LessonType {
                name: "standard".into(),
                price: 4_500,
                duration_minutes: 60,
            }],
        }
    }

    #[test]
    fn named_type_is_pro_rated() {
        let i = instructor();
        assert_eq!(lesson_price(&i, "standard", 60), 4_500);
        assert_eq!(lesson_price(&i, "standard", 90), 6_750);
        assert_eq!(lesson_price(&i, "standard", 40), 3_000);
    }

    #[test]
    fn unknown_type_uses_hourly_rate() {
        let i = instructor();
        assert_eq!(lesson_price(&i, "motorway", 120), 7_200);
        assert_eq!(lesson_price(&i, "motorway", 50), 3_000);
    }
}

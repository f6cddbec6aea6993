use sqlx::SqlitePool;

const STATEMENTS: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS instructors (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  email TEXT NOT NULL,
  hourly_rate BIGINT NOT NULL CHECK (hourly_rate >= 0),
  currency TEXT NOT NULL,
  created_ms BIGINT NOT NULL
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS lesson_types (
  instructor_id TEXT NOT NULL,
  name TEXT NOT NULL,
  price BIGINT NOT NULL CHECK (price >= 0),
  duration_minutes BIGINT NOT NULL CHECK (duration_minutes > 0),
  PRIMARY KEY (instructor_id, name)
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS learners (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  email TEXT NOT NULL,
  balance BIGINT NOT NULL DEFAULT 0,
  primary_instructor_id TEXT,
  created_ms BIGINT NOT NULL,
  updated_ms BIGINT NOT NULL
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS learner_instructors (
  learner_id TEXT NOT NULL,
  instructor_id TEXT NOT NULL,
  lesson_count BIGINT NOT NULL DEFAULT 0,
  balance BIGINT NOT NULL DEFAULT 0,
  first_booked_ms BIGINT,
  last_booked_ms BIGINT,
  PRIMARY KEY (learner_id, instructor_id)
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS weekly_availability (
  instructor_id TEXT NOT NULL,
  day_of_week INTEGER NOT NULL CHECK (day_of_week BETWEEN 0 AND 6),
  ranges_json TEXT NOT NULL,
  available INTEGER NOT NULL CHECK (available IN (0,1)),
  updated_ms BIGINT NOT NULL,
  PRIMARY KEY (instructor_id, day_of_week)
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS availability_overrides (
  instructor_id TEXT NOT NULL,
  date TEXT NOT NULL,
  ranges_json TEXT NOT NULL,
  available INTEGER NOT NULL CHECK (available IN (0,1)),
  reason TEXT,
  updated_ms BIGINT NOT NULL,
  PRIMARY KEY (instructor_id, date)
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS packages (
  id TEXT PRIMARY KEY,
  instructor_id TEXT NOT NULL,
  name TEXT NOT NULL,
  lesson_count BIGINT NOT NULL CHECK (lesson_count > 0),
  price BIGINT NOT NULL CHECK (price >= 0),
  lesson_duration_minutes BIGINT NOT NULL CHECK (lesson_duration_minutes > 0),
  lesson_type TEXT NOT NULL,
  active INTEGER NOT NULL DEFAULT 1 CHECK (active IN (0,1))
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS lessons (
  id TEXT PRIMARY KEY,
  instructor_id TEXT NOT NULL,
  learner_id TEXT NOT NULL,
  start_ms BIGINT NOT NULL,
  end_ms BIGINT NOT NULL,
  duration_minutes BIGINT NOT NULL,
  lesson_type TEXT NOT NULL,
  status TEXT NOT NULL,
  payment_status TEXT NOT NULL,
  price BIGINT NOT NULL,
  funding TEXT NOT NULL,
  package_id TEXT,
  package_ordinal BIGINT,
  package_total BIGINT,
  pickup TEXT,
  notes TEXT,
  cancelled_by TEXT,
  cancel_reason TEXT,
  cancelled_ms BIGINT,
  created_ms BIGINT NOT NULL,
  updated_ms BIGINT NOT NULL
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS payments (
  id TEXT PRIMARY KEY,
  learner_id TEXT NOT NULL,
  instructor_id TEXT,
  package_id TEXT,
  kind TEXT NOT NULL,
  amount BIGINT NOT NULL,
  credited BIGINT NOT NULL DEFAULT 0,
  currency TEXT NOT NULL,
  status TEXT NOT NULL,
  gateway_ref TEXT UNIQUE,
  created_ms BIGINT NOT NULL,
  paid_ms BIGINT,
  refunded_ms BIGINT,
  updated_ms BIGINT NOT NULL
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS payment_lessons (
  payment_id TEXT NOT NULL,
  lesson_id TEXT NOT NULL,
  PRIMARY KEY (payment_id, lesson_id)
);
"#,
    r#"CREATE INDEX IF NOT EXISTS idx_lessons_instructor_time ON lessons(instructor_id, start_ms);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_lessons_learner_time ON lessons(learner_id, start_ms);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_lessons_package ON lessons(package_id);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_payments_learner ON payments(learner_id);"#,
];

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    for stmt in STATEMENTS {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}

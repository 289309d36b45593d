use std::time::Duration;

use time::{format_description::well_known::Rfc3339, OffsetDateTime, PrimitiveDateTime};

pub(crate) fn primitive_now_utc() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

/// `now - age`, saturating at the minimum representable timestamp.
pub(crate) fn primitive_before(now: PrimitiveDateTime, age: Duration) -> PrimitiveDateTime {
    let age = time::Duration::try_from(age).unwrap_or(time::Duration::MAX);
    now.checked_sub(age).unwrap_or(PrimitiveDateTime::MIN)
}

pub(crate) fn format_primitive(value: PrimitiveDateTime) -> String {
    value.assume_utc().format(&Rfc3339).unwrap_or_else(|_| value.assume_utc().to_string())
}

pub(crate) mod conversions;
pub(crate) mod polling;
pub(crate) mod scheduler;

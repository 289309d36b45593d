pub(crate) mod conversion_results;
pub(crate) mod conversion_tasks;
pub(crate) mod health;

mod maintenance;
mod worker;

pub(crate) use maintenance::recover_stale_tasks;
pub(crate) use worker::{build_poller, claim_next_task, process_task};

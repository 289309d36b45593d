pub(crate) mod conversion_polling;
pub(crate) mod conversion_probes;
pub(crate) mod conversion_progress;
pub(crate) mod datalab;
pub(crate) mod inline_images;
pub(crate) mod providers;
pub(crate) mod storage;
pub(crate) mod task_store;
pub(crate) mod transcription;

pub(crate) mod async_task;
pub(crate) mod net;
pub(crate) mod time;

pub mod codec;
pub mod pipeline;
pub mod reaper;
pub mod store;
pub mod usage;

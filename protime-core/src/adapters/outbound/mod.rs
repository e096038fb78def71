mod file_store;
mod http;
mod log_notifier;
mod memory;
mod mock;

pub use file_store::FileKeyValueStore;
pub use http::HttpTransport;
pub use log_notifier::LogNotifier;
pub use memory::MemoryKeyValueStore;
pub use mock::{ManualClock, MockTransport, RecordingNotifier};

mod ids;
mod progress;
mod report;
mod segment;
mod status;
mod submission;
mod timer;

pub use ids::*;
pub use progress::*;
pub use report::*;
pub use segment::*;
pub use status::*;
pub use submission::*;
pub use timer::*;

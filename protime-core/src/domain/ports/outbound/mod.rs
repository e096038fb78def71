mod clock;
mod key_value;
mod notifier;
mod transport;

pub use clock::*;
pub use key_value::*;
pub use notifier::*;
pub use transport::*;

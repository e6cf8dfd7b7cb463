//! Source implementations.

mod statsd;
pub use self::statsd::{StatsdConfiguration, StatsdSource};

//! Host introspection.

mod probe;

pub use probe::{ProcessDetails, ProcessProbe, UsageSample};

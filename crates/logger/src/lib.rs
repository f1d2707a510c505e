mod tracing;

pub use crate::tracing::{LogFormat, init as init_tracing, init_with_level};

//! internal prelude imports for logging from the runtime itself

#[allow(unused_imports)]
pub(crate) use ::log::{debug, error, info, trace, warn};

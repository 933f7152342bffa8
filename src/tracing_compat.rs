//! Optional tracing integration.
//!
//! With the `tracing-integration` feature enabled the macros below are the
//! `tracing` crate's own. Without it they expand to nothing, so call sites
//! never need their own `cfg` guards.

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    /// No-op `trace!` used when tracing is disabled.
    #[macro_export]
    #[doc(hidden)]
    macro_rules! __ordo_trace {
        ($($arg:tt)*) => {};
    }

    /// No-op `debug!` used when tracing is disabled.
    #[macro_export]
    #[doc(hidden)]
    macro_rules! __ordo_debug {
        ($($arg:tt)*) => {};
    }

    /// No-op `info!` used when tracing is disabled.
    #[macro_export]
    #[doc(hidden)]
    macro_rules! __ordo_info {
        ($($arg:tt)*) => {};
    }

    /// No-op `warn!` used when tracing is disabled.
    #[macro_export]
    #[doc(hidden)]
    macro_rules! __ordo_warn {
        ($($arg:tt)*) => {};
    }

    /// No-op `error!` used when tracing is disabled.
    #[macro_export]
    #[doc(hidden)]
    macro_rules! __ordo_error {
        ($($arg:tt)*) => {};
    }
}

#[cfg(not(feature = "tracing-integration"))]
pub use crate::{
    __ordo_debug as debug, __ordo_error as error, __ordo_info as info, __ordo_trace as trace,
    __ordo_warn as warn,
};

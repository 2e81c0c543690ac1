//! Utility
//!
//! **This module is exempt from the API stability guarantee.** It's exposed
//! only because [`Init`] appears in public bounds.
mod init;
pub use self::init::*;

//! Index synchronization.
//!
//! Scan results and live watcher events meet here: both flow as typed
//! messages over one ordered channel into a single coordinator loop, the
//! only component allowed to mutate the store. No shared mutable callback
//! state anywhere — producers describe, the coordinator decides.

pub(crate) mod coordinator;
pub(crate) mod intent;
pub(crate) mod root;

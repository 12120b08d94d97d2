//! Background Tasks Module
//!
//! Contains the long-lived tasks spawned on behalf of store callers.
//!
//! # Tasks
//! - Watch forwarding: relays a watcher's internal signals to its consumer

mod forward;

pub(crate) use forward::spawn_forward_task;

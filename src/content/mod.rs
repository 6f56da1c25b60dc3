//! Question content: records, source sheets and the remote table they sync to.
pub mod audit;
pub mod cleanup;
pub mod code_names;
pub mod csv_io;
pub mod memory;
pub mod patch;
pub mod record;
pub mod rest;
pub mod store;
pub mod sync;
pub mod transform;
pub mod verify;

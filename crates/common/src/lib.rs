// lectern-common: shared types and wire protocol for the Lectern services

pub mod protocol;
pub mod types;

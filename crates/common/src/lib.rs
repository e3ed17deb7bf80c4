// copresence-common: wire protocol and identifiers shared by the copresence crates.

pub mod protocol;
pub mod types;

// Wire protocols spoken between copresence engines.

pub mod presence;

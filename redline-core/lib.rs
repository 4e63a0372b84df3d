use smartstring::{LazyCompact, SmartString};

pub mod diff;
pub mod rewrite;
pub mod selection;
pub mod session;
pub mod store;
pub mod versions;

pub type Tendril = SmartString<LazyCompact>;

pub mod logger;
pub mod terminal;

pub mod enums;
pub mod flag;
pub mod message;
pub mod segment;

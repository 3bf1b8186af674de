pub mod attendance;
pub mod catalog;

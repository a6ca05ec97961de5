pub mod catalog;
pub mod process;
pub mod supervisor;

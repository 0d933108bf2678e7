pub mod core;
pub mod diff;
pub mod grades;
pub mod marmoset;

pub mod input;
pub mod mgf;
pub mod output;
pub mod runner;

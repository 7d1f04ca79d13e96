pub mod config;
pub mod manual;
pub mod run;

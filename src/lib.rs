pub mod batch;
pub mod cli;
pub mod config;
pub mod directory;
pub mod extraction;
pub mod merge;
pub mod report;
pub mod resilience;
pub mod scheduler;
pub mod source;
pub mod stats;
pub mod storage;
pub mod web;

// src/core/mod.rs

pub mod arg_parser;
pub mod attribute;
pub mod blocks;
pub mod commons;
pub mod definitions;
pub mod escape;
pub mod executor;
pub mod outcome;
pub mod queue;
pub mod scheduler;
pub mod tag_engine;
pub mod tag_parser;

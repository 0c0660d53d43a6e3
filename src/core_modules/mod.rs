pub mod multiple_loop;
pub mod operation;
pub mod persist;
pub mod registry;
pub mod run;
pub mod stage_generator;
pub mod stage_key;

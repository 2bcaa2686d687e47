pub mod audit;
pub mod config;
pub mod deletions;
pub mod destination;
pub mod engine;
pub mod housekeeping;
pub mod ledger;
pub mod lock;
pub mod paths;
pub mod recording;
pub mod run;
pub mod run_counter;
pub mod util;

pub mod audit;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod deletion_queue;
pub mod pathnorm;
pub mod paths;
pub mod pointer;
pub mod pointer_registry;
pub mod policy;
pub mod remote_copy;
pub mod scanner;
pub mod state;
pub mod thresholds;
pub mod util;
pub mod warn;

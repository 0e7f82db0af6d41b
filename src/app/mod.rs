mod orchestrator;
mod runtime;
mod startup;


pub use orchestrator::MasterServer;

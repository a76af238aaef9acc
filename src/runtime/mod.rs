pub mod archiver;
pub mod connectors;
pub mod correlation;
pub mod definitions;
pub mod engine;
pub mod notifier;
pub mod queue;
pub mod state_machine;
pub mod token_ledger;
pub mod transitions;
pub mod worker;

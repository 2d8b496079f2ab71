pub mod artifact;
pub mod cancel;
pub mod drift;
pub mod error;
pub mod events;
pub mod ledger;
pub mod locator;
pub mod metrics;
pub mod observe;
pub mod prompts;
pub mod routing;
pub mod runs;
pub mod settings;

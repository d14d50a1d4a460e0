pub mod change_request;
pub mod reconciler;

pub use change_request::ChangeRequestPolicy;
pub use reconciler::{Outcome, ProviderReport, Reconciler, RunSummary};

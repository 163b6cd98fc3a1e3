pub mod funding_notifier;
pub mod loan_lifecycle;

pub use funding_notifier::{FanOutReport, FundingNotifier, NotifierSettings};
pub use loan_lifecycle::{InvestmentOutcome, LifecycleSettings, LoanLifecycleService};

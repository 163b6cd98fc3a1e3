//! Framework-agnostic entities of the lending marketplace.

pub mod investment;
pub mod loan;
pub mod product;
pub mod user;

pub use investment::{Investment, InvestorTotal, NewInvestment};
pub use loan::{Loan, LoanStatus, NewLoan, TransitionError};
pub use product::{LoanTerm, Product};
pub use user::{Actor, RoleType, User};

//! Loan aggregate and its forward-only state machine.
//!
//! ```text
//! proposed --ApproveLoan--> approved --InvestInLoan--> invested --DisburseLoan--> disbursed
//! ```
//!
//! Each arrow has a guard on the current status and on fields the caller
//! must set before asking for the transition. [`Loan::advance_state`]
//! only ever changes `status`.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::{Actor, Product, RoleType, User};
use crate::utils::money::{calculate_returns, MoneyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Proposed,
    Approved,
    Invested,
    Disbursed,
}

impl LoanStatus {
    /// Statuses that count as an open loan for the one-loan-per-borrower rule.
    pub const OPEN: [LoanStatus; 3] = [
        LoanStatus::Proposed,
        LoanStatus::Approved,
        LoanStatus::Invested,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Proposed => "proposed",
            LoanStatus::Approved => "approved",
            LoanStatus::Invested => "invested",
            LoanStatus::Disbursed => "disbursed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoanStatus::Disbursed)
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoanStatus {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proposed" => Ok(LoanStatus::Proposed),
            "approved" => Ok(LoanStatus::Approved),
            "invested" => Ok(LoanStatus::Invested),
            "disbursed" => Ok(LoanStatus::Disbursed),
            other => Err(TransitionError::UnknownState(other.to_string())),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("{action}: a loan can never return to {to} (currently {from})")]
    InvalidNextState {
        from: LoanStatus,
        to: LoanStatus,
        action: &'static str,
    },

    #[error("{action}: cannot move loan from {from} to {to}: {reason}")]
    IllegalTransition {
        from: LoanStatus,
        to: LoanStatus,
        action: &'static str,
        reason: &'static str,
    },

    #[error("unknown loan state '{0}'")]
    UnknownState(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Loan {
    pub id: i64,
    pub name: String,
    pub status: LoanStatus,
    pub borrower_id: i64,
    pub product_id: i64,
    pub principal_amount: BigDecimal,
    pub remaining_amount: BigDecimal,
    pub interest_rate: BigDecimal,
    pub total_interest: BigDecimal,
    pub roi: String,
    pub loan_term: i32,
    pub visitor_id: Option<i64>,
    pub approver_id: Option<i64>,
    pub disburser_id: Option<i64>,
    pub proof_of_visit_attachment: Option<String>,
    /// Distinct contributing investors, ascending.
    pub investor_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// Moves the loan to `next` when the guard for that edge holds.
    pub fn advance_state(
        &mut self,
        next: LoanStatus,
        action: &'static str,
    ) -> Result<(), TransitionError> {
        let from = self.status;
        let illegal = |reason| TransitionError::IllegalTransition {
            from,
            to: next,
            action,
            reason,
        };

        match next {
            LoanStatus::Proposed => {
                return Err(TransitionError::InvalidNextState {
                    from,
                    to: next,
                    action,
                })
            }
            LoanStatus::Approved => {
                if from != LoanStatus::Proposed {
                    return Err(illegal("loan is not proposed"));
                }
                if self.visitor_id.is_none() {
                    return Err(illegal("borrower has not been visited"));
                }
                if self.proof_of_visit_attachment.is_none() {
                    return Err(illegal("proof of visit is missing"));
                }
            }
            LoanStatus::Invested => {
                if from != LoanStatus::Approved {
                    return Err(illegal("loan is not approved"));
                }
                if self.approver_id.is_none() {
                    return Err(illegal("no approver assigned"));
                }
                if self.investor_ids.is_empty() {
                    return Err(illegal("no investor attached"));
                }
            }
            LoanStatus::Disbursed => {
                if from != LoanStatus::Invested {
                    return Err(illegal("loan is not invested"));
                }
                if self.disburser_id.is_none() {
                    return Err(illegal("no disburser assigned"));
                }
            }
        }

        self.status = next;
        Ok(())
    }

    pub fn attach_investor(&mut self, investor_id: i64) {
        if let Err(pos) = self.investor_ids.binary_search(&investor_id) {
            self.investor_ids.insert(pos, investor_id);
        }
    }

    /// Role-scoped read access.
    pub fn visible_to(&self, actor: &Actor) -> bool {
        match actor.role {
            RoleType::Superuser | RoleType::Staff => true,
            RoleType::Borrower => self.borrower_id == actor.user_id,
            RoleType::Investor => {
                self.status == LoanStatus::Approved
                    || self.investor_ids.binary_search(&actor.user_id).is_ok()
            }
            RoleType::FieldValidator => {
                self.visitor_id == Some(actor.user_id)
                    || self.disburser_id == Some(actor.user_id)
                    || (self.status == LoanStatus::Proposed && self.visitor_id.is_none())
            }
        }
    }
}

/// A loan that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLoan {
    pub name: String,
    pub status: LoanStatus,
    pub borrower_id: i64,
    pub product_id: i64,
    pub principal_amount: BigDecimal,
    pub remaining_amount: BigDecimal,
    pub interest_rate: BigDecimal,
    pub total_interest: BigDecimal,
    pub roi: String,
    pub loan_term: i32,
}

impl NewLoan {
    /// Interest figures are fixed here and never recomputed.
    pub fn new(name: String, product: &Product, borrower: &User) -> Result<Self, MoneyError> {
        let returns = calculate_returns(
            &product.principal_amount,
            &product.interest_rate,
            product.term.months(),
        )?;

        Ok(Self {
            name,
            status: LoanStatus::Proposed,
            borrower_id: borrower.id,
            product_id: product.id,
            principal_amount: product.principal_amount.clone(),
            remaining_amount: product.principal_amount.clone(),
            interest_rate: product.interest_rate.clone(),
            total_interest: returns.total_interest,
            roi: returns.roi,
            loan_term: product.term.months(),
        })
    }

    pub fn into_loan(self, id: i64, now: DateTime<Utc>) -> Loan {
        Loan {
            id,
            name: self.name,
            status: self.status,
            borrower_id: self.borrower_id,
            product_id: self.product_id,
            principal_amount: self.principal_amount,
            remaining_amount: self.remaining_amount,
            interest_rate: self.interest_rate,
            total_interest: self.total_interest,
            roi: self.roi,
            loan_term: self.loan_term,
            visitor_id: None,
            approver_id: None,
            disburser_id: None,
            proof_of_visit_attachment: None,
            investor_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LoanTerm;

    fn dec(s: &str) -> BigDecimal {
        s.parse().unwrap()
    }

    fn product() -> Product {
        Product {
            id: 7,
            name: "Working capital".to_string(),
            principal_amount: dec("10000000"),
            interest_rate: dec("0.08"),
            term: LoanTerm::SixMonths,
        }
    }

    fn borrower() -> User {
        User {
            id: 42,
            name: "Borrower".to_string(),
            email: "borrower@example.com".to_string(),
            role: RoleType::Borrower,
            is_active: true,
        }
    }

    fn proposed_loan() -> Loan {
        NewLoan::new("Shop expansion".to_string(), &product(), &borrower())
            .unwrap()
            .into_loan(1, Utc::now())
    }

    fn approved_loan() -> Loan {
        let mut loan = proposed_loan();
        loan.visitor_id = Some(3);
        loan.proof_of_visit_attachment = Some("public/visit.jpg".to_string());
        loan.approver_id = Some(2);
        loan.advance_state(LoanStatus::Approved, "ApproveLoan").unwrap();
        loan
    }

    #[test]
    fn test_new_loan_computes_returns_once() {
        let loan = NewLoan::new("Shop expansion".to_string(), &product(), &borrower()).unwrap();
        assert_eq!(loan.status, LoanStatus::Proposed);
        assert_eq!(loan.total_interest, dec("400000"));
        assert_eq!(loan.roi, "4.00");
        assert_eq!(loan.remaining_amount, dec("10000000"));
        assert_eq!(loan.loan_term, 6);
        assert_eq!(loan.borrower_id, 42);
    }

    #[test]
    fn test_new_loan_rejects_zero_principal() {
        let mut product = product();
        product.principal_amount = dec("0");
        assert_eq!(
            NewLoan::new("x".to_string(), &product, &borrower()),
            Err(MoneyError::NonPositivePrincipal)
        );
    }

    #[test]
    fn test_approve_requires_visit_and_proof() {
        let mut loan = proposed_loan();
        loan.approver_id = Some(2);

        let err = loan.advance_state(LoanStatus::Approved, "ApproveLoan").unwrap_err();
        assert!(matches!(err, TransitionError::IllegalTransition { .. }));
        assert_eq!(loan.status, LoanStatus::Proposed);

        loan.visitor_id = Some(3);
        assert!(loan.advance_state(LoanStatus::Approved, "ApproveLoan").is_err());

        loan.proof_of_visit_attachment = Some("public/visit.jpg".to_string());
        loan.advance_state(LoanStatus::Approved, "ApproveLoan").unwrap();
        assert_eq!(loan.status, LoanStatus::Approved);
    }

    #[test]
    fn test_correct_state_with_missing_requirements_fails() {
        let mut loan = approved_loan();
        // Approved, approver set, but nobody has invested yet.
        let err = loan.advance_state(LoanStatus::Invested, "InvestInLoan").unwrap_err();
        assert_eq!(
            err,
            TransitionError::IllegalTransition {
                from: LoanStatus::Approved,
                to: LoanStatus::Invested,
                action: "InvestInLoan",
                reason: "no investor attached",
            }
        );
    }

    #[test]
    fn test_wrong_state_with_valid_requirements_fails() {
        let mut loan = proposed_loan();
        loan.approver_id = Some(2);
        loan.attach_investor(9);
        assert!(loan.advance_state(LoanStatus::Invested, "InvestInLoan").is_err());
        assert_eq!(loan.status, LoanStatus::Proposed);
    }

    #[test]
    fn test_full_forward_path() {
        let mut loan = approved_loan();
        loan.attach_investor(9);
        loan.advance_state(LoanStatus::Invested, "InvestInLoan").unwrap();

        assert!(loan.advance_state(LoanStatus::Disbursed, "DisburseLoan").is_err());
        loan.disburser_id = Some(3);
        loan.advance_state(LoanStatus::Disbursed, "DisburseLoan").unwrap();
        assert_eq!(loan.status, LoanStatus::Disbursed);
        assert!(loan.status.is_terminal());
    }

    #[test]
    fn test_state_never_moves_backward() {
        let mut loan = approved_loan();
        loan.attach_investor(9);
        loan.advance_state(LoanStatus::Invested, "InvestInLoan").unwrap();
        loan.disburser_id = Some(3);
        loan.advance_state(LoanStatus::Disbursed, "DisburseLoan").unwrap();

        for earlier in [LoanStatus::Proposed, LoanStatus::Approved, LoanStatus::Invested] {
            assert!(loan.advance_state(earlier, "Rewind").is_err());
            assert_eq!(loan.status, LoanStatus::Disbursed);
        }
        assert!(matches!(
            loan.advance_state(LoanStatus::Proposed, "Rewind"),
            Err(TransitionError::InvalidNextState { .. })
        ));
    }

    #[test]
    fn test_advance_changes_only_status() {
        let mut loan = proposed_loan();
        loan.visitor_id = Some(3);
        loan.proof_of_visit_attachment = Some("public/visit.jpg".to_string());
        let before = loan.clone();

        loan.advance_state(LoanStatus::Approved, "ApproveLoan").unwrap();
        loan.status = before.status;
        assert_eq!(loan, before);
    }

    #[test]
    fn test_unknown_state_names() {
        assert_eq!(
            "rejected".parse::<LoanStatus>(),
            Err(TransitionError::UnknownState("rejected".to_string()))
        );
        assert_eq!("invested".parse::<LoanStatus>(), Ok(LoanStatus::Invested));
    }

    #[test]
    fn test_attach_investor_keeps_distinct_sorted_ids() {
        let mut loan = proposed_loan();
        loan.attach_investor(12);
        loan.attach_investor(4);
        loan.attach_investor(12);
        assert_eq!(loan.investor_ids, vec![4, 12]);
    }

    #[test]
    fn test_visibility_by_role() {
        let mut loan = proposed_loan();
        let staff = Actor::new(1, RoleType::Staff);
        let owner = Actor::new(42, RoleType::Borrower);
        let other_borrower = Actor::new(43, RoleType::Borrower);
        let validator = Actor::new(3, RoleType::FieldValidator);
        let other_validator = Actor::new(4, RoleType::FieldValidator);
        let investor = Actor::new(9, RoleType::Investor);

        assert!(loan.visible_to(&staff));
        assert!(loan.visible_to(&owner));
        assert!(!loan.visible_to(&other_borrower));
        assert!(loan.visible_to(&validator));
        assert!(!loan.visible_to(&investor));

        loan.visitor_id = Some(3);
        assert!(!loan.visible_to(&other_validator));

        loan.status = LoanStatus::Approved;
        assert!(loan.visible_to(&investor));

        loan.status = LoanStatus::Invested;
        assert!(!loan.visible_to(&investor));
        loan.attach_investor(9);
        assert!(loan.visible_to(&investor));
    }
}

use bigdecimal::BigDecimal;
use serde::Serialize;

/// Loan tenors offered by the product catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoanTerm {
    OneMonth,
    ThreeMonths,
    SixMonths,
    TwelveMonths,
}

impl LoanTerm {
    pub fn from_months(months: i32) -> Option<Self> {
        match months {
            1 => Some(LoanTerm::OneMonth),
            3 => Some(LoanTerm::ThreeMonths),
            6 => Some(LoanTerm::SixMonths),
            12 => Some(LoanTerm::TwelveMonths),
            _ => None,
        }
    }

    pub fn months(&self) -> i32 {
        match self {
            LoanTerm::OneMonth => 1,
            LoanTerm::ThreeMonths => 3,
            LoanTerm::SixMonths => 6,
            LoanTerm::TwelveMonths => 12,
        }
    }
}

/// Immutable terms a loan is created against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub principal_amount: BigDecimal,
    /// Fraction per annum, e.g. `0.08`.
    pub interest_rate: BigDecimal,
    pub term: LoanTerm,
}

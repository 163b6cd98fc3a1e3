use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One immutable contribution by an investor to a loan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Investment {
    pub id: i64,
    pub loan_id: i64,
    pub investor_id: i64,
    pub amount: BigDecimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewInvestment {
    pub loan_id: i64,
    pub investor_id: i64,
    pub amount: BigDecimal,
}

/// Sum of every contribution one investor made to one loan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvestorTotal {
    pub investor_id: i64,
    pub amount: BigDecimal,
}

//! Users and the roles that gate lifecycle actions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleType {
    Superuser,
    Staff,
    FieldValidator,
    Investor,
    Borrower,
}

impl RoleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleType::Superuser => "superuser",
            RoleType::Staff => "staff",
            RoleType::FieldValidator => "field_validator",
            RoleType::Investor => "investor",
            RoleType::Borrower => "borrower",
        }
    }

    /// Staff and superusers see every loan and may approve.
    pub fn is_staff(&self) -> bool {
        matches!(self, RoleType::Superuser | RoleType::Staff)
    }
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "superuser" => Ok(RoleType::Superuser),
            "staff" => Ok(RoleType::Staff),
            "field_validator" => Ok(RoleType::FieldValidator),
            "investor" => Ok(RoleType::Investor),
            "borrower" => Ok(RoleType::Borrower),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: RoleType,
    pub is_active: bool,
}

impl User {
    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.id,
            role: self.role,
        }
    }
}

/// An already-authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: i64,
    pub role: RoleType,
}

impl Actor {
    pub fn new(user_id: i64, role: RoleType) -> Self {
        Self { user_id, role }
    }
}

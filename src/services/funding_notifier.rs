//! Emails every contributing investor once a loan is fully funded.
//!
//! Deliveries run concurrently and independently. A failed or slow
//! delivery is recorded in the [`FanOutReport`] and never affects the
//! others, nor the investment that triggered the fan-out. The setup phase
//! (ledger and user lookups, template load, archive copy) and each delivery
//! are bounded by [`NotifierSettings::timeout`].

use chrono::Utc;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::domain::{InvestorTotal, Loan, User};
use crate::error::AppError;
use crate::ports::{
    EmailAttachment, EmailMessage, EmailSender, FileStorage, InvestmentLedger, Mailbox,
    NotificationError, RepositoryError, UserRepository,
};
use crate::utils::mime::PDF_CONTENT_TYPE;
use crate::utils::money::round_money;
use crate::utils::sanitize::{escape_html, mask_email, sanitize_filename};

const FUNDED_SUBJECT: &str = "Loan has been fully funded!";

#[derive(Debug, Clone)]
pub struct NotifierSettings {
    pub sender: Mailbox,
    pub agreement_template: PathBuf,
    /// Upper bound for the setup phase and for each individual delivery.
    pub timeout: Duration,
}

/// Outcome of one fan-out.
#[derive(Debug, Default)]
pub struct FanOutReport {
    pub delivered: Vec<i64>,
    pub failed: Vec<(i64, NotificationError)>,
}

impl FanOutReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn first_error(&self) -> Option<&NotificationError> {
        self.failed.first().map(|(_, err)| err)
    }
}

struct FanOut {
    borrower: User,
    totals: Vec<InvestorTotal>,
    investors: Vec<User>,
    letter: EmailAttachment,
}

pub struct FundingNotifier {
    ledger: Arc<dyn InvestmentLedger>,
    users: Arc<dyn UserRepository>,
    sender: Arc<dyn EmailSender>,
    storage: Arc<dyn FileStorage>,
    settings: NotifierSettings,
}

impl FundingNotifier {
    pub fn new(
        ledger: Arc<dyn InvestmentLedger>,
        users: Arc<dyn UserRepository>,
        sender: Arc<dyn EmailSender>,
        storage: Arc<dyn FileStorage>,
        settings: NotifierSettings,
    ) -> Self {
        Self {
            ledger,
            users,
            sender,
            storage,
            settings,
        }
    }

    pub async fn notify_loan_funded(&self, loan: &Loan) -> Result<FanOutReport, AppError> {
        let prepared = timeout(self.settings.timeout, self.prepare(loan))
            .await
            .map_err(|_| {
                tracing::warn!(loan_id = loan.id, "Funding fan-out setup timed out");
                AppError::Notification(NotificationError::Timeout)
            })??;
        let Some(FanOut {
            borrower,
            totals,
            investors,
            letter,
        }) = prepared
        else {
            return Ok(FanOutReport::default());
        };

        let deliveries = totals.iter().map(|total| {
            let investor = investors.iter().find(|u| u.id == total.investor_id);
            self.deliver(loan, &borrower, total, investor, letter.clone())
        });
        let results = join_all(deliveries).await;

        let mut report = FanOutReport::default();
        for (investor_id, result) in results {
            match result {
                Ok(()) => report.delivered.push(investor_id),
                Err(e) => {
                    tracing::warn!(loan_id = loan.id, investor_id, error = %e, "Funding notification failed");
                    report.failed.push((investor_id, e));
                }
            }
        }

        tracing::info!(
            loan_id = loan.id,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Funding notifications dispatched"
        );
        Ok(report)
    }

    /// `None` when nobody has invested in the loan.
    async fn prepare(&self, loan: &Loan) -> Result<Option<FanOut>, AppError> {
        let totals = self.ledger.investor_totals(loan.id).await?;
        if totals.is_empty() {
            return Ok(None);
        }

        let borrower = self
            .users
            .get_by_id(loan.borrower_id)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound(_) => AppError::UserNotFound(loan.borrower_id),
                other => AppError::Repository(other),
            })?;

        let ids: Vec<i64> = totals.iter().map(|t| t.investor_id).collect();
        let investors = self.users.get_many(&ids).await?;

        let letter = self.agreement_letter(loan, &borrower).await?;

        Ok(Some(FanOut {
            borrower,
            totals,
            investors,
            letter,
        }))
    }

    async fn deliver(
        &self,
        loan: &Loan,
        borrower: &User,
        total: &InvestorTotal,
        investor: Option<&User>,
        letter: EmailAttachment,
    ) -> (i64, Result<(), NotificationError>) {
        let investor_id = total.investor_id;
        let Some(investor) = investor else {
            return (investor_id, Err(NotificationError::RecipientNotFound(investor_id)));
        };

        let message = EmailMessage {
            from: self.settings.sender.clone(),
            to: Mailbox::new(investor.name.clone(), investor.email.clone()),
            subject: FUNDED_SUBJECT.to_string(),
            html_body: funded_body(loan, borrower, total),
            attachment: Some(letter),
        };

        let result = match timeout(self.settings.timeout, self.sender.send(&message)).await {
            Ok(result) => result,
            Err(_) => Err(NotificationError::Timeout),
        };
        if result.is_ok() {
            tracing::debug!(loan_id = loan.id, investor_id, to = %mask_email(&investor.email), "Funding notification sent");
        }
        (investor_id, result)
    }

    /// Loads the template once per fan-out and archives a copy.
    async fn agreement_letter(
        &self,
        loan: &Loan,
        borrower: &User,
    ) -> Result<EmailAttachment, AppError> {
        let bytes = tokio::fs::read(&self.settings.agreement_template)
            .await
            .map_err(|e| {
                NotificationError::Attachment(format!(
                    "agreement template {}: {}",
                    self.settings.agreement_template.display(),
                    e
                ))
            })?;

        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let filename = sanitize_filename(&format!(
            "Loan_Agreement_Letter-{}-{}-{}.pdf",
            loan.name, borrower.name, stamp
        ))
        .unwrap_or_else(|| format!("Loan_Agreement_Letter-{}-{}.pdf", loan.id, stamp));

        let archive_name = format!("AgreementLetter_{}_{}.pdf", loan.id, stamp);
        if let Err(e) = self
            .storage
            .store(&bytes, &archive_name, PDF_CONTENT_TYPE)
            .await
        {
            tracing::warn!(loan_id = loan.id, error = %e, "Could not archive agreement letter");
        }

        Ok(EmailAttachment {
            filename,
            content_type: PDF_CONTENT_TYPE.to_string(),
            content: Arc::new(bytes),
        })
    }
}

fn funded_body(loan: &Loan, borrower: &User, total: &InvestorTotal) -> String {
    format!(
        r#"<h1>A loan you financed has been fully funded!</h1>
<p>You have invested {invested} into "{loan}", a loan requested by {borrower}.</p>
<p>The borrower will receive the full principal of {principal} once it has been disbursed by our staff.</p>
<p><strong>The loan pays {interest} in total interest, a {roi}% return on investment.</strong></p>
<p>Attached is the loan agreement letter to sign.</p>"#,
        invested = round_money(&total.amount),
        loan = escape_html(&loan.name),
        borrower = escape_html(&borrower.name),
        principal = round_money(&loan.principal_amount),
        interest = round_money(&loan.total_interest),
        roi = escape_html(&loan.roi),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LoanStatus, RoleType};
    use bigdecimal::BigDecimal;

    fn dec(s: &str) -> BigDecimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_funded_body_states_contribution_and_returns() {
        let loan = Loan {
            id: 1,
            name: "Warung <Sari>".to_string(),
            status: LoanStatus::Invested,
            borrower_id: 2,
            product_id: 3,
            principal_amount: dec("10000000"),
            remaining_amount: dec("0"),
            interest_rate: dec("0.08"),
            total_interest: dec("400000"),
            roi: "4.00".to_string(),
            loan_term: 6,
            visitor_id: Some(4),
            approver_id: Some(5),
            disburser_id: None,
            proof_of_visit_attachment: Some("public/visit.jpg".to_string()),
            investor_ids: vec![9],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let borrower = User {
            id: 2,
            name: "Sari".to_string(),
            email: "sari@example.com".to_string(),
            role: RoleType::Borrower,
            is_active: true,
        };
        let total = InvestorTotal {
            investor_id: 9,
            amount: dec("2500000"),
        };

        let body = funded_body(&loan, &borrower, &total);
        assert!(body.contains("2500000.00"));
        assert!(body.contains("10000000.00"));
        assert!(body.contains("400000.00"));
        assert!(body.contains("4.00%"));
        assert!(body.contains("Warung &lt;Sari&gt;"));
    }

    #[test]
    fn test_report_first_error() {
        let mut report = FanOutReport::default();
        assert!(report.is_complete());
        report.delivered.push(1);
        report.failed.push((2, NotificationError::Timeout));
        report.failed.push((3, NotificationError::CircuitOpen));
        assert!(!report.is_complete());
        assert!(matches!(report.first_error(), Some(NotificationError::Timeout)));
    }
}

//! Purchase Notifiers
//!
//! Mail delivery is a collaborator: either a JSON mail API or, without
//! one configured, a log line.

use serde::Serialize;

use crate::domain::ports::{NotifyError, PurchaseConfirmation, PurchaseNotifier};

/// Writes confirmations to the log instead of sending mail
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier;

impl PurchaseNotifier for LoggingNotifier {
    async fn send_purchase_confirmation(
        &self,
        confirmation: &PurchaseConfirmation,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            resource_title = %confirmation.resource_title,
            amount = %confirmation.formatted_amount,
            is_guest = confirmation.is_guest,
            locale = %confirmation.locale,
            "Purchase confirmation (mail delivery not configured)"
        );
        Ok(())
    }
}

/// Posts confirmations to a transactional mail API
#[derive(Clone)]
pub struct HttpMailNotifier {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpMailNotifier {
    pub fn new(client: reqwest::Client, url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MailRequest<'a> {
    template: &'static str,
    to: &'a str,
    locale: &'a str,
    data: MailData<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MailData<'a> {
    resource_title: &'a str,
    amount: i64,
    formatted_amount: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    download_token: Option<&'a str>,
    is_guest: bool,
}

impl PurchaseNotifier for HttpMailNotifier {
    async fn send_purchase_confirmation(
        &self,
        confirmation: &PurchaseConfirmation,
    ) -> Result<(), NotifyError> {
        let request = MailRequest {
            template: "purchase_confirmation",
            to: confirmation.email.as_str(),
            locale: &confirmation.locale,
            data: MailData {
                resource_title: &confirmation.resource_title,
                amount: confirmation.amount,
                formatted_amount: &confirmation.formatted_amount,
                download_token: confirmation.download_token.as_deref(),
                is_guest: confirmation.is_guest,
            },
        };

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| NotifyError(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(NotifyError(format!("mail API returned {}", status.as_u16())));
        }

        tracing::debug!(is_guest = confirmation.is_guest, "Purchase confirmation sent");
        Ok(())
    }
}

/// Notifier selected at startup
#[derive(Clone)]
pub enum Notifier {
    Logging(LoggingNotifier),
    Http(HttpMailNotifier),
}

impl PurchaseNotifier for Notifier {
    async fn send_purchase_confirmation(
        &self,
        confirmation: &PurchaseConfirmation,
    ) -> Result<(), NotifyError> {
        match self {
            Notifier::Logging(n) => n.send_purchase_confirmation(confirmation).await,
            Notifier::Http(n) => n.send_purchase_confirmation(confirmation).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::Email;

    #[test]
    fn test_mail_payload_shape() {
        let request = MailRequest {
            template: "purchase_confirmation",
            to: "gast@example.com",
            locale: "de",
            data: MailData {
                resource_title: "Einmaleins",
                amount: 990,
                formatted_amount: "CHF 9.90",
                download_token: None,
                is_guest: false,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["data"]["resourceTitle"], "Einmaleins");
        assert_eq!(json["data"]["isGuest"], false);
        assert!(json["data"].get("downloadToken").is_none());
    }

    #[tokio::test]
    async fn test_logging_notifier_never_fails() {
        let confirmation = PurchaseConfirmation {
            email: Email::from_db("gast@example.com"),
            resource_title: "Einmaleins".into(),
            amount: 990,
            formatted_amount: "CHF 9.90".into(),
            download_token: Some("secret".into()),
            is_guest: true,
            locale: "de".into(),
        };
        let notifier = Notifier::Logging(LoggingNotifier);
        assert!(notifier.send_purchase_confirmation(&confirmation).await.is_ok());
    }
}

/// Builds the subject and body of outgoing emails
use crate::{
    error::{IdentityError, IdentityResult},
    mailer::EmailMessage,
};

#[derive(Debug, Clone)]
pub struct EmailFactory {
    public_url: String,
}

impl EmailFactory {
    pub fn new(public_url: &str) -> Self {
        Self {
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn new_confirmation_email(
        &self,
        to: &str,
        first_name: Option<&str>,
        reference: &str,
    ) -> IdentityResult<EmailMessage> {
        check_recipient(to)?;
        let link = format!("{}/v1/confirmations/{}", self.public_url, reference);

        let body = format!(
            r#"
Hello {},

Thank you for signing up!

Please confirm your email address by opening the link below:

{}

If you did not create this account, please ignore this email.
"#,
            greeting_name(first_name, to),
            link
        );

        Ok(EmailMessage {
            to: to.to_string(),
            subject: "Confirm your email".to_string(),
            body,
        })
    }

    pub fn new_invitation_email(
        &self,
        to: &str,
        invited_by: &str,
        reference: &str,
    ) -> IdentityResult<EmailMessage> {
        check_recipient(to)?;
        let link = format!("{}/web/invitations/{}", self.public_url, reference);

        let body = format!(
            r#"
Hello,

{} has invited you to join their team.

To accept the invitation and choose a password, open the link below:

{}
"#,
            invited_by, link
        );

        Ok(EmailMessage {
            to: to.to_string(),
            subject: "You have been invited".to_string(),
            body,
        })
    }

    pub fn new_password_reset_email(
        &self,
        to: &str,
        first_name: Option<&str>,
        reference: &str,
    ) -> IdentityResult<EmailMessage> {
        check_recipient(to)?;
        let link = format!("{}/web/password-resets/{}", self.public_url, reference);

        let body = format!(
            r#"
Hello {},

We received a request to reset your password.

To choose a new password, open the link below:

{}

If you did not request a password reset, please ignore this email. Your password will remain unchanged.

For security, this link can only be used once.
"#,
            greeting_name(first_name, to),
            link
        );

        Ok(EmailMessage {
            to: to.to_string(),
            subject: "Reset your password".to_string(),
            body,
        })
    }
}

fn greeting_name<'a>(first_name: Option<&'a str>, to: &'a str) -> &'a str {
    first_name.filter(|n| !n.trim().is_empty()).unwrap_or(to)
}

fn check_recipient(to: &str) -> IdentityResult<()> {
    if to.trim().is_empty() || !to.contains('@') {
        return Err(IdentityError::ValidationFailed(format!(
            "Invalid recipient address: {}",
            to
        )));
    }
    Ok(())
}

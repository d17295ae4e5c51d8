pub mod digest;
mod mailer;

pub use digest::{compose_digest, Digest};
pub use mailer::{MailTransport, OutgoingEmail, SmtpMailer};

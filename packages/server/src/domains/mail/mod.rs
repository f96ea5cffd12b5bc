pub mod job_handlers;
pub mod jobs;

pub use job_handlers::register_mail_jobs;
pub use jobs::{SendForgotPasswordMail, SendOtpMail};

//! Kernel module - job infrastructure and dependencies.

pub mod deps;
pub mod image_optimizer;
pub mod jobs;
pub mod mailer;
pub mod test_dependencies;
pub mod traits;

pub use deps::ServerDeps;
pub use image_optimizer::{HttpImageOptimizer, NoopImageOptimizer};
pub use mailer::{LogMailSender, SendGridMailer, SENDGRID_SEND_URL};
pub use test_dependencies::{MockImageOptimizer, MockMailSender, TestDependencies};
pub use traits::*;

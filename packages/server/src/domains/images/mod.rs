pub mod job_handlers;
pub mod jobs;

pub use job_handlers::register_image_jobs;
pub use jobs::OptimizeImage;

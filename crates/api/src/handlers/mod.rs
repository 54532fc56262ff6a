pub mod callback;
pub mod jobs;

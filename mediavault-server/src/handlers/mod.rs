pub mod jobs;
pub mod replicate;

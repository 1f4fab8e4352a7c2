pub mod intake;
pub mod jobs;

pub mod chat;
pub mod doctor;
pub mod runtime;
pub mod status;
pub mod summarize;

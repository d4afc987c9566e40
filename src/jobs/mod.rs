// Background jobs

pub mod email_retry;

pub mod amount;
pub mod blob_store;
pub mod checkin;
pub mod issuance;
pub mod mailer;
pub mod membership;
pub mod name_normalize;
pub mod ocr_client;
pub mod payment_verifier;
pub mod qr;
pub mod signature;
pub mod ticket_code;

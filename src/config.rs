use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

/// Ticket prices in whole SEK per category. Server-side configuration;
/// never taken from client input.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TicketPrices {
    pub regular: i32,
    pub member: i32,
    pub student: i32,
    pub children: i32,
}

impl Default for TicketPrices {
    fn default() -> Self {
        Self {
            regular: 125,
            member: 80,
            student: 80,
            children: 0,
        }
    }
}

/// Maximum member-priced tickets per membership type. The family cap is a
/// deployment constant (5 or 6 depending on the season's board decision).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MembershipPolicy {
    pub single: i32,
    pub family: i32,
    pub student: i32,
    pub pensioner: i32,
}

impl Default for MembershipPolicy {
    fn default() -> Self {
        Self {
            single: 1,
            family: 6,
            student: 1,
            pensioner: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,

    // Event
    pub event_name: String,

    // Pricing & membership policy
    pub prices: TicketPrices,
    pub membership: MembershipPolicy,

    // Ticket numbering
    pub ticket_prefix: String,
    pub ticket_code_len: usize,

    // Ticket token signing (offline verification)
    pub ticket_signing_secret: Secret<String>,
    pub ticket_token_enabled: bool,

    // OCR payment verification
    pub ocr_api_url: Option<String>,
    pub ocr_api_key: Option<Secret<String>>,
    pub ocr_tolerance: i32,

    // Blob storage (QR images, payment proofs)
    pub blob_api_url: String,
    pub blob_access_token: Secret<String>,
    pub qr_bucket: String,
    pub proof_bucket: String,

    // Outbound email
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: Secret<String>,
    pub mail_from_name: String,
    pub mail_from_address: String,
    pub mail_bcc: Option<String>,
    pub mail_reply_to: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        let prices = TicketPrices {
            regular: config.get("price_regular").unwrap_or(125),
            member: config.get("price_member").unwrap_or(80),
            student: config.get("price_student").unwrap_or(80),
            children: config.get("price_children").unwrap_or(0),
        };

        let membership = MembershipPolicy {
            single: config.get("member_limit_single").unwrap_or(1),
            family: config.get("member_limit_family").unwrap_or(6),
            student: config.get("member_limit_student").unwrap_or(1),
            pensioner: config.get("member_limit_pensioner").unwrap_or(1),
        };

        let cfg = Self {
            database_url: config.get("database_url")?,
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: config.get("port")?,

            event_name: config
                .get("event_name")
                .unwrap_or_else(|_| "Night Market".to_string()),

            prices,
            membership,

            ticket_prefix: config
                .get("ticket_prefix")
                .unwrap_or_else(|_| "NM25".to_string()),
            ticket_code_len: config.get("ticket_code_len").unwrap_or(4),

            ticket_signing_secret: Secret::new(config.get("ticket_signing_secret")?),
            ticket_token_enabled: config.get("ticket_token_enabled").unwrap_or(true),

            ocr_api_url: config.get("ocr_api_url").ok(),
            ocr_api_key: config.get::<String>("ocr_api_key").ok().map(Secret::new),
            ocr_tolerance: config.get("ocr_tolerance").unwrap_or(3),

            blob_api_url: config.get("blob_api_url")?,
            blob_access_token: Secret::new(config.get("blob_access_token")?),
            qr_bucket: config
                .get("qr_bucket")
                .unwrap_or_else(|_| "ticket-qr".to_string()),
            proof_bucket: config
                .get("proof_bucket")
                .unwrap_or_else(|_| "payment-proofs".to_string()),

            smtp_host: config.get("smtp_host")?,
            smtp_port: config.get("smtp_port").unwrap_or(465),
            smtp_username: config.get("smtp_username")?,
            smtp_password: Secret::new(config.get("smtp_password")?),
            mail_from_name: config
                .get("mail_from_name")
                .unwrap_or_else(|_| "Ticket Office".to_string()),
            mail_from_address: config.get("mail_from_address")?,
            mail_bcc: config.get("mail_bcc").ok(),
            mail_reply_to: config.get("mail_reply_to").ok(),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if !(3..=8).contains(&self.ticket_code_len) {
            return Err(config::ConfigError::Message(format!(
                "ticket_code_len must be 3..=8, got {}",
                self.ticket_code_len
            )));
        }
        if !(0..=50).contains(&self.ocr_tolerance) {
            return Err(config::ConfigError::Message(format!(
                "ocr_tolerance must be 0..=50, got {}",
                self.ocr_tolerance
            )));
        }
        if self.ticket_prefix.is_empty() || self.ticket_prefix.contains('|') {
            return Err(config::ConfigError::Message(
                "ticket_prefix must be non-empty and must not contain '|'".to_string(),
            ));
        }
        for (name, v) in [
            ("price_regular", self.prices.regular),
            ("price_member", self.prices.member),
            ("price_student", self.prices.student),
            ("price_children", self.prices.children),
        ] {
            if v < 0 {
                return Err(config::ConfigError::Message(format!(
                    "{name} must not be negative, got {v}"
                )));
            }
        }
        for (name, v) in [
            ("member_limit_single", self.membership.single),
            ("member_limit_family", self.membership.family),
            ("member_limit_student", self.membership.student),
            ("member_limit_pensioner", self.membership.pensioner),
        ] {
            if !(1..=10).contains(&v) {
                return Err(config::ConfigError::Message(format!(
                    "{name} must be 1..=10, got {v}"
                )));
            }
        }
        if self.ticket_token_enabled && self.ticket_signing_secret.expose_secret().len() < 16 {
            return Err(config::ConfigError::Message(
                "ticket_signing_secret must be at least 16 bytes when token signing is enabled"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

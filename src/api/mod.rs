// API module - HTTP endpoints

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::services::blob_store::BlobStore;
use crate::services::mailer::Mailer;
use crate::services::membership::MemberDirectory;

pub mod checkin;
pub mod health;
pub mod issuance;
pub mod members;
pub mod registrations;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub directory: Arc<MemberDirectory>,
    pub blob: BlobStore,
    pub mailer: Mailer,
}

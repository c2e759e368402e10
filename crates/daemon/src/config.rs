use std::net::SocketAddr;
use std::path::PathBuf;

use outing_core::WorkflowConfig;

#[derive(Clone)]
pub struct DaemonConfig {
    pub listen: SocketAddr,
    pub db_path: PathBuf,
    pub qr_secret: String,
    pub cas_max_attempts: u32,
}

impl std::fmt::Debug for DaemonConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonConfig")
            .field("listen", &self.listen)
            .field("db_path", &self.db_path)
            .field("qr_secret", &"<redacted>")
            .field("cas_max_attempts", &self.cas_max_attempts)
            .finish()
    }
}

impl DaemonConfig {
    pub fn workflow(&self) -> WorkflowConfig {
        WorkflowConfig {
            qr_secret: self.qr_secret.clone(),
            cas_max_attempts: self.cas_max_attempts.max(1),
        }
    }
}

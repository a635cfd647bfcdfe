//! Status command implementation

use anyhow::Result;

use crate::output::{format_health, print_error, print_success, print_warning};
use cm_client::HttpBackend;
use cm_core::config::ClientConfig;
use cm_core::traits::Backend;

/// Query the backend health endpoint
pub async fn status_command(config: &ClientConfig) -> Result<()> {
    let backend = HttpBackend::new(config)?;

    let health = match backend.health().await {
        Ok(h) => h,
        Err(e) => {
            print_error(&format!("Backend unreachable at {}: {}", backend.base_url(), e));
            print_error("Is the server running? Check server_url or pass --server");
            return Err(e.into());
        }
    };

    print!("{}", format_health(backend.base_url().as_str(), &health));
    if health.is_healthy() {
        print_success("Backend is healthy");
    } else {
        print_warning(&format!("Backend reports status '{}'", health.status));
    }
    Ok(())
}

use std::{sync::Once, time::Duration};

use tracing::{debug, warn};

/// Browser-like identity used for outbound requests and the external downloader.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// reqwest is built without a bundled crypto provider, so one has to be
/// installed process-wide before the first client is created.
pub fn install_rustls_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let provider = rustls::crypto::aws_lc_rs::default_provider();
        if provider.install_default().is_err() {
            debug!("rustls crypto provider was already installed");
        }
    });
}

/// Longest a single socket read may block, whatever the overall deadline.
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Build the shared `reqwest::Client` used by every upstream integration.
///
/// A zero `request_timeout` means no overall deadline, which payload
/// transfers need; connecting and each read are still bounded.
pub fn build_client(request_timeout: Duration, user_agent: &str) -> reqwest::Client {
    install_rustls_provider();

    let mut builder = reqwest::Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(10))
        .read_timeout(READ_TIMEOUT)
        .pool_max_idle_per_host(8);
    if !request_timeout.is_zero() {
        builder = builder.timeout(request_timeout);
    }

    match builder.build() {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "HTTP client configuration rejected, using defaults");
            reqwest::Client::new()
        }
    }
}

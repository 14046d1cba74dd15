// HTTP client construction shared by the appliance clients.
//
// Appliances are often reached by IP with self-signed or privately signed
// certificates, so the trust source is chosen per backend. Credentials
// are not handled here; each client adds its own default headers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::ClientBuilder;
use reqwest::header::HeaderMap;

use crate::error::Error;

/// Where server certificates are checked against.
#[derive(Debug, Clone)]
pub enum TlsMode {
    System,
    /// PEM bundle added to the system roots.
    CustomCa(PathBuf),
    /// No verification at all.
    DangerAcceptInvalid,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    /// Bounds each request, on the client and around every call.
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    pub fn build_client(&self, headers: HeaderMap) -> Result<reqwest::Client, Error> {
        let base = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("wgctl/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers);

        with_trust(base, &self.tls)?
            .build()
            .map_err(|e| Error::Tls(format!("cannot build HTTP client: {e}")))
    }
}

fn with_trust(builder: ClientBuilder, tls: &TlsMode) -> Result<ClientBuilder, Error> {
    Ok(match tls {
        TlsMode::System => builder,
        TlsMode::CustomCa(bundle) => builder.add_root_certificate(load_ca(bundle)?),
        TlsMode::DangerAcceptInvalid => builder.danger_accept_invalid_certs(true),
    })
}

fn load_ca(bundle: &Path) -> Result<reqwest::Certificate, Error> {
    let pem = std::fs::read(bundle)
        .map_err(|e| Error::Tls(format!("cannot read CA bundle {}: {e}", bundle.display())))?;
    reqwest::Certificate::from_pem(&pem)
        .map_err(|e| Error::Tls(format!("CA bundle {} is not valid PEM: {e}", bundle.display())))
}

// ABOUTME: Configuration resolution for the HTSP client and manager
// ABOUTME: Reads the host application's settings store through a narrow trait, not a concrete format

use tokio::time::Duration;

use crate::{Error, Result};

/// Narrow view of the host application's settings store. Mirrors the
/// original integration's `Settings.get(key, default)` call shape: every
/// lookup supplies its own fallback, so a host with no opinion on a key
/// still gets a usable `Config`.
pub trait SettingsSource {
    fn get_str(&self, key: &str, default: &str) -> String;
    fn get_bool(&self, key: &str, default: bool) -> bool;
    fn get_u64(&self, key: &str, default: u64) -> u64;
}

/// Resolved configuration for one HTSP connection.
#[derive(Debug, Clone)]
pub struct Config {
    pub enabled: bool,
    pub listener_address: String,
    pub ip_family: IpFamily,
    pub user: Option<String>,
    pub password: Option<String>,
    pub socket_data_timeout: Duration,
    pub custom_processing: bool,
    pub io_chunk_size: usize,
}

/// Address family for the HTSP TCP socket, chosen by `dial` when resolving
/// `listener_address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            enabled: false,
            listener_address: "127.0.0.1:9982".to_string(),
            ip_family: IpFamily::V4,
            user: None,
            password: None,
            socket_data_timeout: Duration::from_secs(30),
            custom_processing: false,
            io_chunk_size: 1_048_576,
        }
    }
}

impl Config {
    /// Resolves a `Config` from a settings source, following the fallback
    /// chain the original integration used for the socket timeout: a
    /// dedicated `mp_tvheadend_client_socket_data_timeout` key, falling
    /// back to the shared `pas_global_io_timeout_socket` style default of
    /// 30 seconds when unset.
    pub fn from_settings(settings: &dyn SettingsSource) -> Result<Config> {
        let enabled = settings.get_bool("mp_tvheadend_enabled", false);
        let listener_address =
            settings.get_str("mp_tvheadend_listener_address", "127.0.0.1:9982");
        validate_address(&listener_address)?;

        let ip_family = match settings.get_str("mp_tvheadend_listener_mode", "ipv4").as_str() {
            "ipv4" => IpFamily::V4,
            "ipv6" => IpFamily::V6,
            other => return Err(Error::Config(format!("unknown listener mode '{other}'"))),
        };

        let user = non_empty(settings.get_str("mp_tvheadend_user", ""));
        let password = non_empty(settings.get_str("mp_tvheadend_password", ""));

        let timeout_seconds = settings.get_u64("mp_tvheadend_client_socket_data_timeout", 30);

        let io_chunk_size =
            settings.get_u64("pas_global_io_chunk_size_local_network", 1_048_576) as usize;

        Ok(Config {
            enabled,
            listener_address,
            ip_family,
            user,
            password,
            socket_data_timeout: Duration::from_secs(timeout_seconds),
            custom_processing: settings
                .get_bool("mp_tvheadend_recording_details_custom_processing", false),
            io_chunk_size,
        })
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn validate_address(addr: &str) -> Result<()> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("'{addr}' is not host:port")))?;
    if host.is_empty() {
        return Err(Error::Config(format!("'{addr}' has an empty host")));
    }
    port.parse::<u16>()
        .map_err(|_| Error::Config(format!("'{addr}' has an invalid port")))?;
    Ok(())
}

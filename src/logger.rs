use crate::config::Config;
use crate::error::{Error, Result};
use crate::peer::types::{Generation, IceCandidate};
use tracing::debug;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `filter` when set. Fails if a subscriber is
/// already installed.
pub fn init(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .map_err(|e| Error::Config(format!("log filter: {}", e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_owned()))
        .with_target(false)
        .try_init()
        .map_err(|e| Error::Config(format!("logger: {}", e)))
}

/// [`init`] with the filter from `config`
pub fn init_from_config(config: &Config) -> Result<()> {
    init(&config.log_filter)
}

/// Prints an ICE candidate as it trickles in
pub fn dump_candidate(label: &str, generation: Generation, cand: &IceCandidate) {
    debug!(
        "Trickle {label} [{generation}]: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
        cand.candidate, cand.sdp_mid, cand.sdp_mline_index, cand.username_fragment
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_filter_is_validated() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = Config {
            log_filter: "pacc_sender=loud".into(),
            ..Config::default()
        };
        assert!(matches!(init_from_config(&config), Err(Error::Config(_))));
    }

    #[test]
    fn second_init_is_rejected() {
        let _ = init("info");
        assert!(matches!(init("info"), Err(Error::Config(_))));
    }
}

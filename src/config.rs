//! Runtime configuration.
//!
//! Layered configuration: CLI flags override environment variables
//! (`SWITCHBOARD_*`) override a `.switchboard.toml` dotfile override
//! built-in defaults, via `clap` + `ortho_config` + `figment`.

use clap::Parser;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

const DEFAULT_BIND: &str = "0.0.0.0:8765";
const DEFAULT_FUTURE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_WORKER_POOL_SIZE: usize = 4;
const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
const DEFAULT_REAP_INTERVAL_SECS: u64 = 30;

/// Runtime configuration shared by the `switchboard` binary and its tests.
#[derive(Parser, OrthoConfig, Serialize, Deserialize, Debug, Clone)]
#[ortho_config(prefix = "SWITCHBOARD_")]
pub struct AppConfig {
    /// Address the WebSocket transport listens on.
    #[ortho_config(default = DEFAULT_BIND.to_owned())]
    #[arg(long, default_value_t = String::from(DEFAULT_BIND))]
    pub bind: String,

    /// Lower the default log level from `info` to `debug`.
    #[ortho_config(default = false)]
    #[arg(long, default_value_t = false)]
    pub verbose: bool,

    /// How long a server-to-client call may wait for a reply before it is
    /// rejected as timed out.
    #[ortho_config(default = DEFAULT_FUTURE_TIMEOUT_SECS)]
    #[arg(long, default_value_t = DEFAULT_FUTURE_TIMEOUT_SECS)]
    pub future_timeout_secs: u64,

    /// How often the pending-call reaper sweeps for timed-out calls.
    #[ortho_config(default = DEFAULT_REAP_INTERVAL_SECS)]
    #[arg(long, default_value_t = DEFAULT_REAP_INTERVAL_SECS)]
    pub reap_interval_secs: u64,

    /// Concurrent synchronous-handler slots in the worker pool.
    #[ortho_config(default = DEFAULT_WORKER_POOL_SIZE)]
    #[arg(long, default_value_t = DEFAULT_WORKER_POOL_SIZE)]
    pub worker_pool_size: usize,

    /// Chunking boundary, in bytes, for outgoing packets.
    #[ortho_config(default = DEFAULT_CHUNK_SIZE)]
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Maximum accepted inbound WebSocket message size, in bytes. `0` means
    /// "use `chunk_size`" — binding the transport's own ceiling to the
    /// chunking boundary so a single unchunked frame is never rejected
    /// before the RPC layer's chunking has a chance to run.
    #[ortho_config(default = 0)]
    #[arg(long, default_value_t = 0)]
    pub max_message_size: usize,
}

impl AppConfig {
    /// Translate this config's timeout/worker/chunk knobs into a
    /// [`crate::server::ServerConfig`].
    #[must_use]
    pub fn server_config(&self) -> crate::server::ServerConfig {
        crate::server::ServerConfig {
            future_timeout: std::time::Duration::from_secs(self.future_timeout_secs),
            worker_pool_size: self.worker_pool_size,
            chunk_size: self.chunk_size,
            max_message_size: self.effective_max_message_size(),
        }
    }

    /// How often [`crate::server::reap_pending`] should sweep.
    #[must_use]
    pub fn reap_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reap_interval_secs)
    }

    /// The effective inbound message size ceiling: `max_message_size` if
    /// set, otherwise `chunk_size`.
    #[must_use]
    pub fn effective_max_message_size(&self) -> usize {
        if self.max_message_size == 0 { self.chunk_size } else { self.max_message_size }
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn env_config_loading() {
        Jail::expect_with(|j| {
            j.set_env("SWITCHBOARD_BIND", "127.0.0.1:9000");
            j.set_env("SWITCHBOARD_WORKER_POOL_SIZE", "8");
            let cfg = AppConfig::load_from_iter(["switchboard"]).expect("load");
            assert_eq!(cfg.bind, "127.0.0.1:9000");
            assert_eq!(cfg.worker_pool_size, 8);
            Ok(())
        });
    }

    #[rstest]
    fn cli_overrides_env() {
        Jail::expect_with(|j| {
            j.set_env("SWITCHBOARD_BIND", "127.0.0.1:9000");
            let cfg =
                AppConfig::load_from_iter(["switchboard", "--bind", "0.0.0.0:1111"]).expect("load");
            assert_eq!(cfg.bind, "0.0.0.0:1111");
            Ok(())
        });
    }

    #[rstest]
    fn loads_from_dotfile() {
        Jail::expect_with(|j| {
            j.create_file(".switchboard.toml", "bind = \"1.2.3.4:2222\"")?;
            let cfg = AppConfig::load_from_iter(["switchboard"]).expect("load");
            assert_eq!(cfg.bind, "1.2.3.4:2222".to_string());
            Ok(())
        });
    }

    #[rstest]
    fn defaults_apply_when_nothing_is_set() {
        Jail::expect_with(|_j| {
            let cfg = AppConfig::load_from_iter(["switchboard"]).expect("load");
            assert_eq!(cfg.bind, DEFAULT_BIND);
            assert_eq!(cfg.future_timeout_secs, DEFAULT_FUTURE_TIMEOUT_SECS);
            assert!(!cfg.verbose);
            Ok(())
        });
    }

    #[rstest]
    fn unset_max_message_size_falls_back_to_chunk_size() {
        Jail::expect_with(|_j| {
            let cfg =
                AppConfig::load_from_iter(["switchboard", "--chunk-size", "2048"]).expect("load");
            assert_eq!(cfg.effective_max_message_size(), 2048);
            Ok(())
        });
    }

    #[rstest]
    fn server_config_carries_effective_max_message_size() {
        Jail::expect_with(|_j| {
            let cfg = AppConfig::load_from_iter(["switchboard", "--max-message-size", "4096"])
                .expect("load");
            assert_eq!(cfg.server_config().max_message_size, 4096);
            Ok(())
        });
    }
}

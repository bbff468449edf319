//! Runtime configuration: loaded from a TOML file via `serdeconv`, then overridden field-by-field
//! from environment variables. Grounded in `gamecore::config::GameConfig::load`.

use flux::keys::{BuyerKeypair, BuyerPrivateKey, BuyerPublicKey};
use serde_derive::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server_backend_hostname: String,
    #[serde(default)]
    pub buyer_public_key: String,
    #[serde(default)]
    pub buyer_private_key: String,
    #[serde(default)]
    pub server_backend_public_key: String,
    #[serde(default)]
    pub relay_backend_public_key: String,
    #[serde(default = "default_send_buffer_size")]
    pub socket_send_buffer_size: u32,
    #[serde(default = "default_receive_buffer_size")]
    pub socket_receive_buffer_size: u32,
    #[serde(default)]
    pub disable_network_next: bool,
    #[serde(default)]
    pub disable_autodetect: bool,
}

fn default_send_buffer_size() -> u32 {
    256 * 1024
}

fn default_receive_buffer_size() -> u32 {
    256 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_backend_hostname: String::new(),
            buyer_public_key: String::new(),
            buyer_private_key: String::new(),
            server_backend_public_key: String::new(),
            relay_backend_public_key: String::new(),
            socket_send_buffer_size: default_send_buffer_size(),
            socket_receive_buffer_size: default_receive_buffer_size(),
            disable_network_next: false,
            disable_autodetect: false,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Load(String),
    InvalidBuyerKeypair,
}

impl Config {
    /// Loads from `path`, then applies environment-variable overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let mut config: Config =
            serdeconv::from_toml_file(path).map_err(|e| ConfigError::Load(e.to_string()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies the `NEXT_*` environment variables over whatever the config file set, matching
    /// §6's recognized-at-init list.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = env::var("NEXT_SERVER_BACKEND_HOSTNAME") {
            self.server_backend_hostname = value;
        }
        if let Ok(value) = env::var("NEXT_BUYER_PUBLIC_KEY") {
            self.buyer_public_key = value;
        }
        if let Ok(value) = env::var("NEXT_BUYER_PRIVATE_KEY") {
            self.buyer_private_key = value;
        }
        if let Ok(value) = env::var("NEXT_SERVER_BACKEND_PUBLIC_KEY") {
            self.server_backend_public_key = value;
        }
        if let Ok(value) = env::var("NEXT_RELAY_BACKEND_PUBLIC_KEY") {
            self.relay_backend_public_key = value;
        }
        if let Ok(value) = env::var("NEXT_SOCKET_SEND_BUFFER_SIZE") {
            if let Ok(parsed) = value.parse() {
                self.socket_send_buffer_size = parsed;
            }
        }
        if let Ok(value) = env::var("NEXT_SOCKET_RECEIVE_BUFFER_SIZE") {
            if let Ok(parsed) = value.parse() {
                self.socket_receive_buffer_size = parsed;
            }
        }
        if let Ok(value) = env::var("NEXT_DISABLE_NETWORK_NEXT") {
            self.disable_network_next = value != "0" && !value.is_empty();
        }
        if let Ok(value) = env::var("NEXT_DISABLE_AUTODETECT") {
            self.disable_autodetect = value != "0" && !value.is_empty();
        }
    }

    /// Parses and validates the configured buyer keypair. A mismatch between the public and
    /// private key's embedded buyer_id invalidates the pair.
    pub fn buyer_keypair(&self) -> Result<BuyerKeypair, ConfigError> {
        let public = BuyerPublicKey::parse(&self.buyer_public_key)
            .map_err(|_| ConfigError::InvalidBuyerKeypair)?;
        let private = BuyerPrivateKey::parse(&self.buyer_private_key)
            .map_err(|_| ConfigError::InvalidBuyerKeypair)?;
        BuyerKeypair::new(public, private).ok_or(ConfigError::InvalidBuyerKeypair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_buffer_sizes() {
        let config = Config::default();
        assert_eq!(config.socket_send_buffer_size, 256 * 1024);
        assert_eq!(config.socket_receive_buffer_size, 256 * 1024);
        assert!(!config.disable_network_next);
    }

    #[test]
    fn env_override_toggles_disable_flag() {
        let mut config = Config::default();
        env::set_var("NEXT_DISABLE_NETWORK_NEXT", "1");
        config.apply_env_overrides();
        assert!(config.disable_network_next);
        env::remove_var("NEXT_DISABLE_NETWORK_NEXT");
    }

    #[test]
    fn env_override_parses_buffer_size() {
        let mut config = Config::default();
        env::set_var("NEXT_SOCKET_SEND_BUFFER_SIZE", "4096");
        config.apply_env_overrides();
        assert_eq!(config.socket_send_buffer_size, 4096);
        env::remove_var("NEXT_SOCKET_SEND_BUFFER_SIZE");
    }
}

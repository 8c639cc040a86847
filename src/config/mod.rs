//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (comma-separated)
    pub client_origin: String,
    /// Max inbound WebSocket messages per second per connection
    pub request_rate_limit: u32,
    /// Gameplay tuning
    pub game: GameConfig,
}

/// Authority-local gameplay tuning. Never replicated.
#[derive(Clone, Debug, PartialEq)]
pub struct GameConfig {
    /// Simulation ticks per second
    pub simulation_tps: u32,
    /// Seed for spawn placement
    pub world_seed: u64,
    pub max_health: f32,
    pub max_bomb_count: i32,
    /// Seconds between arming and explosion
    pub fuse_time: f32,
    pub explosion_radius: f32,
    pub explosion_damage: f32,
    /// Grace period between explosion and bomb removal (seconds)
    pub destroy_delay: f32,
    /// Distance in front of the character where a thrown bomb appears
    pub throw_offset: f32,
    /// Initial bomb speed along the character's forward vector
    pub throw_speed: f32,
    /// Radius of the disc characters spawn in
    pub spawn_radius: f32,
    /// Effect asset spawned on explosion, if any
    pub explosion_fx: Option<String>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            simulation_tps: 30,
            world_seed: 0x5eed,
            max_health: 100.0,
            max_bomb_count: 3,
            fuse_time: 2.5,
            explosion_radius: 200.0,
            explosion_damage: 25.0,
            destroy_delay: 0.3,
            throw_offset: 200.0,
            throw_speed: 600.0,
            spawn_radius: 800.0,
            explosion_fx: Some("fx/explosion".to_string()),
        }
    }
}

/// Highest tick rate whose period is still at least one microsecond
pub const MAX_SIMULATION_TPS: u32 = 1_000_000;

impl GameConfig {
    /// Never zero: `tokio::time::interval` panics on a zero period
    pub fn tick_duration(&self) -> Duration {
        let tps = self.simulation_tps.clamp(1, MAX_SIMULATION_TPS);
        Duration::from_micros(1_000_000 / tps as u64)
    }

    pub fn fuse_delay(&self) -> Duration {
        millis(self.fuse_time)
    }

    pub fn destroy_grace(&self) -> Duration {
        millis(self.destroy_delay)
    }

    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let explosion_fx = match env::var("EXPLOSION_FX") {
            Ok(v) if v.trim().is_empty() => None,
            Ok(v) => Some(v),
            Err(_) => defaults.explosion_fx,
        };

        let config = Self {
            simulation_tps: parse_var("SIMULATION_TPS", defaults.simulation_tps)?,
            world_seed: parse_var("WORLD_SEED", defaults.world_seed)?,
            max_health: parse_var("MAX_HEALTH", defaults.max_health)?,
            max_bomb_count: parse_var("MAX_BOMB_COUNT", defaults.max_bomb_count)?,
            fuse_time: parse_var("FUSE_TIME_SECS", defaults.fuse_time)?,
            explosion_radius: parse_var("EXPLOSION_RADIUS", defaults.explosion_radius)?,
            explosion_damage: parse_var("EXPLOSION_DAMAGE", defaults.explosion_damage)?,
            destroy_delay: parse_var("DESTROY_DELAY_SECS", defaults.destroy_delay)?,
            throw_offset: parse_var("THROW_OFFSET", defaults.throw_offset)?,
            throw_speed: parse_var("THROW_SPEED", defaults.throw_speed)?,
            spawn_radius: parse_var("SPAWN_RADIUS", defaults.spawn_radius)?,
            explosion_fx,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_SIMULATION_TPS).contains(&self.simulation_tps) {
            return Err(ConfigError::Invalid("SIMULATION_TPS"));
        }
        if self.max_health <= 0.0 {
            return Err(ConfigError::Invalid("MAX_HEALTH"));
        }
        if self.max_bomb_count < 0 {
            return Err(ConfigError::Invalid("MAX_BOMB_COUNT"));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render-style PORT wins, then SERVER_ADDR, then default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            request_rate_limit: parse_var("REQUEST_RATE_LIMIT", 30)?,

            game: GameConfig::from_env()?,
        })
    }
}

/// Seconds from config, rounded to whole milliseconds
fn millis(seconds: f32) -> Duration {
    Duration::from_millis((seconds.max(0.0) * 1000.0).round() as u64)
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

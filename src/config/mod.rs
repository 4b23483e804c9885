use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;

/// Where the rosbridge server lives. The port is kept as text: an empty
/// port means the url carries none.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: String,
}

impl ConnectionTarget {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    pub fn url(&self) -> String {
        if self.port.is_empty() {
            format!("ws://{}", self.host)
        } else {
            format!("ws://{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct TopicDecl {
    pub name: String,
    pub message_type: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ServiceDecl {
    pub name: String,
    pub service_type: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ActionDecl {
    pub server_name: String,
    pub action_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub environment: String,
    pub connection: ConnectionTarget,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub topics: BTreeMap<String, TopicDecl>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceDecl>,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionDecl>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .set_default("environment", "development")?
            .set_default("connection.host", "localhost")?
            .set_default("connection.port", "9090")?
            .set_default("logging.level", "info")?
            // Declarations usually come from the config files
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(environment_source())
            .build()?;

        s.try_deserialize()
    }

    pub fn new_for_test() -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("environment", "test")?
            .set_default("connection.host", "127.0.0.1")?
            .set_default("connection.port", "9090")?
            .set_default("logging.level", "debug")?
            .build()?
            .try_deserialize()
    }

    pub fn connection_target(&self) -> ConnectionTarget {
        self.connection.clone()
    }
}

/// `ROSBRIDGE_CONNECTION__PORT=9091` sets `Settings.connection.port`.
fn environment_source() -> Environment {
    Environment::with_prefix("rosbridge")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleanup_env() {
        env::remove_var("ROSBRIDGE_CONNECTION__HOST");
        env::remove_var("ROSBRIDGE_CONNECTION__PORT");
        env::remove_var("ROSBRIDGE_LOGGING__LEVEL");
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::new_for_test().expect("Failed to load settings");
        assert_eq!(settings.environment, "test");
        assert_eq!(settings.connection.host, "127.0.0.1");
        assert_eq!(settings.connection.port, "9090");
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.topics.is_empty());
        assert!(settings.services.is_empty());
        assert!(settings.actions.is_empty());
    }

    #[test]
    fn test_url_with_and_without_port() {
        assert_eq!(ConnectionTarget::new("robot.local", "9090").url(), "ws://robot.local:9090");
        assert_eq!(ConnectionTarget::new("robot.local", "").url(), "ws://robot.local");
    }

    #[test]
    fn test_environment_override() {
        cleanup_env();
        env::set_var("ROSBRIDGE_CONNECTION__HOST", "10.0.0.7");
        env::set_var("ROSBRIDGE_CONNECTION__PORT", "9091");

        let settings = Config::builder()
            .set_default("environment", "test").unwrap()
            .set_default("connection.host", "localhost").unwrap()
            .set_default("connection.port", "9090").unwrap()
            .set_default("logging.level", "info").unwrap()
            .add_source(environment_source())
            .build()
            .expect("Failed to build config")
            .try_deserialize::<Settings>()
            .expect("Failed to deserialize settings");

        assert_eq!(settings.connection.host, "10.0.0.7");
        assert_eq!(settings.connection.port, "9091");
        assert_eq!(settings.connection_target().url(), "ws://10.0.0.7:9091");

        cleanup_env();
    }

    #[test]
    fn test_declarations_from_toml() {
        let toml = r#"
            environment = "test"

            [connection]
            host = "localhost"
            port = ""

            [logging]
            level = "info"

            [topics.odom]
            name = "/odom"
            message_type = "nav_msgs/Odometry"

            [services.reset]
            name = "/reset_odometry"
            service_type = "std_srvs/Empty"

            [actions.navigate]
            server_name = "/move_base"
            action_name = "move_base_msgs/MoveBaseAction"
        "#;

        let settings = Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()
            .expect("Failed to build config")
            .try_deserialize::<Settings>()
            .expect("Failed to deserialize settings");

        assert_eq!(settings.connection_target().url(), "ws://localhost");
        assert_eq!(settings.topics["odom"].message_type, "nav_msgs/Odometry");
        assert_eq!(settings.services["reset"].name, "/reset_odometry");
        assert_eq!(settings.actions["navigate"].server_name, "/move_base");
    }
}

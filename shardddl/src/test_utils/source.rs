use secrecy::Secret;
use shardddl_config::shared::{SourceConfig, SourceFlavor, UpstreamDbConfig};

/// Returns a relay-enabled MySQL source configuration with the given id.
pub fn source_config(source_id: &str) -> SourceConfig {
    SourceConfig {
        source_id: source_id.to_string(),
        flavor: SourceFlavor::Mysql,
        enable_gtid: false,
        enable_relay: true,
        server_id: 101,
        relay_binlog_name: String::new(),
        relay_binlog_gtid: String::new(),
        from: UpstreamDbConfig {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: Some(Secret::new("123456".to_string())),
        },
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use peercache::builder::Builder;
use peercache::config::Config;
use peercache::fmt::{format_size, size_setting};
use peercache::group::{Getter, Group, Registry};
use peercache::peers::http::HttpPool;
use peercache::platform::Platform;
use peercache::server::Server;
use yaml_rust::Yaml;

/// Simulates an expensive data source which serves the records given in the config.
struct SlowDb {
    records: HashMap<String, String>,
}

impl SlowDb {
    fn from_config(config: &Yaml) -> Self {
        let records = config
            .as_hash()
            .map(|hash| {
                hash.iter()
                    .filter_map(|(key, value)| {
                        let value = match value {
                            Yaml::String(value) => value.clone(),
                            Yaml::Integer(value) => value.to_string(),
                            Yaml::Real(value) => value.clone(),
                            _ => return None,
                        };
                        Some((key.as_str()?.to_owned(), value))
                    })
                    .collect()
            })
            .unwrap_or_default();

        SlowDb { records }
    }
}

#[async_trait::async_trait]
impl Getter for SlowDb {
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        log::info!("[SlowDB] search key {}", key);
        tokio::time::sleep(Duration::from_millis(100)).await;

        self.records
            .get(key)
            .map(|value| value.as_bytes().to_vec())
            .ok_or_else(|| anyhow::anyhow!("{} not exist", key))
    }
}

/// Creates and registers all groups listed in the **groups** section of the config.
fn install_groups(platform: &Arc<Platform>) -> anyhow::Result<()> {
    let handle = platform.require::<Config>().current();
    let registry = platform.require::<Registry>();
    let pool = platform.require::<HttpPool>();

    if let Some(groups) = handle.query("groups").as_hash() {
        for (name, settings) in groups {
            let name = name
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("Invalid group name: {:?}", name))?;
            let max_memory = size_setting(&settings["max_memory"], 0)?;

            let group = Group::builder(name)
                .max_memory(max_memory)
                .getter(SlowDb::from_config(&settings["records"]))
                .build()?;
            group.register_peers(pool.clone())?;

            log::info!(
                "Installed group {} with a budget of {}.",
                name,
                if max_memory > 0 {
                    format_size(max_memory)
                } else {
                    "unlimited".to_owned()
                }
            );
            registry.register(group);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    // Build a platform and enable all features...
    let platform = Builder::new().enable_all().build().await;

    // Setup the groups as given in the config...
    if let Err(error) = install_groups(&platform) {
        log::error!("Failed to install the groups: {:#}", error);
        platform.terminate();
        return;
    }

    platform.require::<Server>().event_loop().await;
}

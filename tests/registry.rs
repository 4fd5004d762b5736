//! Registry persistence across restarts.

mod common;

use common::*;
use lorabridge::registry::DeviceRegistry;
use tempfile::tempdir;

#[tokio::test]
async fn resolve_persists_in_first_seen_order() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let cloud = FakeCloud::new();
    let load = || {
        DeviceRegistry::load(
            config.storage.device_map_path(),
            config.storage.counter_path(),
            &config.schedule.display_prefix,
        )
        .unwrap()
    };

    let mut registry = load();
    let first = registry.resolve("FF:01", cloud.as_ref()).await.unwrap();
    let second = registry.resolve("00:02", cloud.as_ref()).await.unwrap();
    assert_eq!(first.display_name, "lora_1");
    assert_eq!(second.display_name, "lora_2");

    let again = registry.resolve("FF:01", cloud.as_ref()).await.unwrap();
    assert_eq!(again, first);
    assert_eq!(cloud.provisioned().len(), 2);

    let reloaded = load();
    let macs: Vec<_> = reloaded
        .snapshot()
        .into_iter()
        .map(|d| (d.mac_address, d.display_name))
        .collect();
    assert_eq!(
        macs,
        vec![
            ("FF:01".to_string(), "lora_1".to_string()),
            ("00:02".to_string(), "lora_2".to_string())
        ]
    );
    assert_eq!(reloaded.get("00:02").unwrap().access_token, "token-00:02");
}

#[tokio::test]
async fn new_names_continue_from_the_counter_file() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    std::fs::write(config.storage.counter_path(), "7\n").unwrap();
    let cloud = FakeCloud::new();

    let mut registry = DeviceRegistry::load(
        config.storage.device_map_path(),
        config.storage.counter_path(),
        &config.schedule.display_prefix,
    )
    .unwrap();
    let identity = registry.resolve("AB:CD", cloud.as_ref()).await.unwrap();
    assert_eq!(identity.display_name, "lora_7");
    // Message framing still uses the device's position
    assert_eq!(
        registry.positional_display_name("AB:CD").as_deref(),
        Some("lora_1")
    );
    assert_eq!(
        std::fs::read_to_string(config.storage.counter_path())
            .unwrap()
            .trim(),
        "8"
    );
}

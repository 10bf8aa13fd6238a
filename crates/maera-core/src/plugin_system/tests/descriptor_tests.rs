use std::sync::Arc;

use serde_json::{Value, json};

use super::common::{Recorder, descriptor, module_factory};
use crate::plugin_system::descriptor::DescriptorParser;
use crate::plugin_system::error::PluginResult;
use crate::plugin_system::module_factory::ModuleDescriptorFactory;
use crate::plugin_system::plugin::{Plugin, PluginKind};

fn configure(doc: &Value, modules: &ModuleDescriptorFactory) -> PluginResult<Plugin> {
    let parser = DescriptorParser::parse("test.json", &serde_json::to_vec(doc).unwrap())?;
    let mut plugin = Plugin::new(parser.validated_key()?.to_string(), PluginKind::Static, None);
    parser.configure_plugin(modules, &mut plugin)?;
    Ok(plugin)
}

#[test]
fn test_full_descriptor_is_parsed() {
    let modules = module_factory(&Arc::new(Recorder::default()));
    let doc = json!({
        "key": "com.example.tools",
        "name": "Tools",
        "system": true,
        "enabled-by-default": false,
        "plugin-info": {
            "version": 1.5,
            "description": "Handy tools",
            "vendor": { "name": "Example", "url": "https://example.com" },
            "parameters": { "weight": 10 }
        },
        "dependencies": [
            "com.example.base",
            { "key": "com.example.extra", "version": ">=1.0, <2.0", "required": false }
        ],
        "resources": [
            { "type": "download", "name": "style.css", "location": "css/style.css" }
        ],
        "modules": [
            { "type": "recording", "key": "menu", "params": { "order": 3 }, "enabled-by-default": false },
            { "type": "plain", "key": "item" }
        ]
    });

    let plugin = configure(&doc, &modules).unwrap();

    assert_eq!(plugin.name(), "Tools");
    assert!(plugin.is_system());
    assert!(!plugin.is_enabled_by_default());
    assert_eq!(plugin.version(), "1.5");
    let info = plugin.information();
    assert_eq!(info.vendor_name.as_deref(), Some("Example"));
    assert_eq!(info.parameters.get("weight").map(String::as_str), Some("10"));

    let deps = plugin.dependencies();
    assert_eq!(deps.len(), 2);
    assert!(deps[0].required && deps[0].version_range.is_none());
    assert!(!deps[1].required && deps[1].version_range.is_some());

    assert!(plugin.resources().get("download", "style.css").is_some());

    let menu = plugin.module_descriptor("menu").unwrap();
    assert_eq!(menu.complete_key(), "com.example.tools:menu");
    assert!(!menu.is_enabled_by_default());
    assert_eq!(menu.info().params.get("order").map(String::as_str), Some("3"));
    assert_eq!(plugin.module_descriptor("item").unwrap().module_type(), "plain");
}

#[test]
fn test_filtered_module_types_are_skipped() {
    let modules = module_factory(&Arc::new(Recorder::default()));
    modules.set_permitted_module_types(["plain"]);
    let doc = json!({
        "key": "test.filtered",
        "modules": [
            { "type": "recording", "key": "a" },
            { "type": "plain", "key": "b" },
            { "type": "never-registered", "key": "c" }
        ]
    });

    let plugin = configure(&doc, &modules).unwrap();

    let keys: Vec<&str> = plugin.module_descriptors().iter().map(|m| m.key()).collect();
    assert_eq!(keys, vec!["b"]);

    modules.set_permitted_module_types(Vec::<String>::new());
    assert!(modules.permitted_module_types().is_empty());
    assert!(modules.is_permitted("recording"));
}

#[test]
fn test_unknown_module_type_is_an_error() {
    let modules = module_factory(&Arc::new(Recorder::default()));
    let doc = json!({ "key": "test.unknown", "modules": [{ "type": "mystery", "key": "m" }] });

    let err = configure(&doc, &modules).unwrap_err();

    assert!(err.is_parse_error());
    assert_eq!(err.detail(), "Could not find descriptor for module type 'mystery'");
}

#[test]
fn test_structural_errors() {
    let modules = module_factory(&Arc::new(Recorder::default()));

    let missing_key = DescriptorParser::parse("x.json", br#"{ "name": "No key" }"#).unwrap();
    assert_eq!(
        missing_key.validated_key().unwrap_err().detail(),
        "Plugin key must be specified"
    );

    let bad_key = DescriptorParser::parse("x.json", br#"{ "key": "a:b" }"#).unwrap();
    assert_eq!(
        bad_key.validated_key().unwrap_err().detail(),
        "Plugin keys cannot contain ':'. Key is 'a:b'"
    );

    assert!(DescriptorParser::parse("x.json", b"{ not json").unwrap_err().is_parse_error());

    let keyless_module = json!({ "key": "test.m", "modules": [{ "type": "plain" }] });
    assert!(configure(&keyless_module, &modules).unwrap_err().detail().contains("is missing a key"));

    let duplicate = json!({
        "key": "test.dup",
        "modules": [{ "type": "plain", "key": "m" }, { "type": "recording", "key": "m" }]
    });
    assert_eq!(
        configure(&duplicate, &modules).unwrap_err().detail(),
        "Found duplicate key 'm' within plugin 'test.dup'"
    );

    let empty_resource = json!({ "key": "test.r", "resources": [{ "type": "download", "name": "x" }] });
    assert_eq!(
        configure(&empty_resource, &modules).unwrap_err().detail(),
        "Resource 'x' must have either a location or content"
    );

    let future = json!({ "key": "test.future", "plugins-version": 3 });
    assert!(configure(&future, &modules).unwrap_err().detail().contains("plugins-version 3"));
}

#[test]
fn test_defaults_when_blocks_are_absent() {
    let modules = module_factory(&Arc::new(Recorder::default()));

    let plugin = configure(&descriptor("test.min", &[]), &modules).unwrap();

    assert!(plugin.is_enabled_by_default());
    assert!(!plugin.is_system());
    assert_eq!(plugin.plugins_version(), 1);
    assert!(plugin.dependencies().is_empty());
    assert!(plugin.resources().is_empty());
}

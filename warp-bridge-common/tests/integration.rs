//! Integration tests for warp-bridge-common.

use warp_bridge_common::{
    Format, KeyExprBuilder, PropertyUpdate, PropertyValue, decode, encode, parse_config,
    LoggingConfig, ZenohConfig,
};

#[test]
fn test_update_travels_over_both_formats() {
    let update = PropertyUpdate::new("/Ac/Voltage", PropertyValue::Float(230.0), "230V");

    for format in [Format::Json, Format::Cbor] {
        let bytes = encode(&update, format).expect("encode failed");
        let decoded: PropertyUpdate = decode(&bytes, format).expect("decode failed");

        assert_eq!(decoded.path, "/Ac/Voltage");
        assert_eq!(decoded.value, PropertyValue::Float(230.0));
        assert_eq!(decoded.text, "230V");
        assert_eq!(decoded.timestamp, update.timestamp);
    }
}

#[test]
fn test_property_and_write_keys_agree() {
    let builder = KeyExprBuilder::new("warp/evcharger/http_40");

    for path in ["/SetCurrent", "/StartStop", "/Ac/L3/Power"] {
        let write_key = builder.write_key(path).unwrap();
        assert_eq!(builder.parse_write_key(&write_key).as_deref(), Some(path));

        let property_key = builder.property_key(path).unwrap();
        assert_eq!(
            builder.parse_property_key(&property_key).as_deref(),
            Some(path)
        );
    }
}

#[test]
fn test_null_value_is_published_as_json_null() {
    let update = PropertyUpdate::new("/Status", PropertyValue::Null, "");
    let bytes = encode(&update, Format::Json).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    assert!(json["value"].is_null());
    assert_eq!(json["text"], "");
}

#[test]
fn test_sections_embed_in_bridge_config() {
    #[derive(serde::Deserialize)]
    struct Outer {
        zenoh: ZenohConfig,
        #[serde(default)]
        logging: LoggingConfig,
    }

    let outer: Outer = parse_config(r#"{ zenoh: { mode: "client", connect: ["tcp/10.0.0.2:7447"] } }"#)
        .expect("parse failed");

    assert_eq!(outer.zenoh.mode, "client");
    assert_eq!(outer.logging.level, "info");
}

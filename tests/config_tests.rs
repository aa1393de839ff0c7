use unstructured_comm::config::{DEFAULT_ELEMENT_WIDTH, ExchangeConfig};

#[test]
fn partial_json_falls_back_to_defaults() {
    let cfg: ExchangeConfig = serde_json::from_str(r#"{ "element_width": 4 }"#).unwrap();
    assert_eq!(cfg.element_width, 4);
    assert_eq!(cfg.check_invariants, ExchangeConfig::default().check_invariants);
}

#[test]
fn empty_json_is_default() {
    let cfg: ExchangeConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(cfg, ExchangeConfig::default());
    assert_eq!(cfg.element_width, DEFAULT_ELEMENT_WIDTH);
}

#[test]
fn round_trip() {
    let cfg = ExchangeConfig::default()
        .with_element_width(16)
        .with_check_invariants(false);
    let json = serde_json::to_string(&cfg).unwrap();
    assert_eq!(serde_json::from_str::<ExchangeConfig>(&json).unwrap(), cfg);
}

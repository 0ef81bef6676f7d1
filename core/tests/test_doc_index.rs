// Integration test for the transport's documentation navtree
//
// Loads the shipped index of the bti header and checks that it is well
// formed and that every public symbol of the transport can be found.

use std::io::Write;
use ttble_core::docindex::{self, NavChildren, NavIndex, Violation, ViolationKind};

const FIXTURE: &str = include_str!("fixtures/bti_8h.js");

#[test]
fn test_shipped_index_is_clean() {
    assert!(docindex::check(FIXTURE).expect("Check").is_empty());

    let index = NavIndex::parse(FIXTURE).expect("Parse fixture");
    assert_eq!(index.var_name.as_deref(), Some("bti_8h"));
    assert_eq!(index.entries.len(), 27);
    assert_eq!(index.len(), 29);
    assert!(index.validate().is_empty());
}

#[test]
fn test_transport_symbols_resolve() {
    let index = NavIndex::parse(FIXTURE).expect("Parse fixture");

    for symbol in [
        "btc_init",
        "btp_init",
        "btc_on_ble_evt",
        "btp_on_ble_evt",
        "btp_string_send",
        "btp_can_send",
        "BTP_MAX_DATA_LEN",
        "BTC_SERVICE_UUID",
    ] {
        let entry = index
            .lookup(symbol)
            .unwrap_or_else(|| panic!("{} missing from index", symbol));
        assert_eq!(entry.page(), Some("bti_8h.html"), "{}", symbol);
        assert!(entry.anchor().is_some(), "{}", symbol);
    }

    let events = index.lookup("btc_evt_type_t").expect("Event enum");
    match &events.children {
        NavChildren::Inline(values) => {
            let names: Vec<&str> = values.iter().map(|v| v.name.as_str()).collect();
            assert_eq!(names, vec!["BTC_EVT_DISCOVERY_COMPLETE", "BTC_EVT_NOTIFICATION"]);
        }
        other => panic!("Expected inline children, got {:?}", other),
    }

    let btc = index.lookup("btc_s").expect("Struct listing");
    assert_eq!(btc.children, NavChildren::External("structbtc__s".to_string()));
}

#[test]
fn test_render_reproduces_fixture() {
    let index = NavIndex::parse(FIXTURE).expect("Parse fixture");
    assert_eq!(index.to_js().trim_end(), FIXTURE.trim_end());
}

#[test]
fn test_load_from_disk() {
    let mut file = tempfile::NamedTempFile::new().expect("Temp file");
    file.write_all(FIXTURE.as_bytes()).expect("Write fixture");

    let index = NavIndex::load(file.path()).expect("Load");
    assert!(index.lookup("NOBTC").is_some());
}

#[test]
fn test_damaged_index_reports_paths() {
    let damaged = FIXTURE
        .replace(
            r#""BTC_EVT_NOTIFICATION", "bti_8h.html#"#,
            r#""BTC_EVT_DISCOVERY_COMPLETE", "bti_8h.html#"#,
        )
        .replace(r#""btp_init", "bti_8h.html#a76ff"#, r#""btp_init", "bti_8h#a76ff"#);

    let violations = docindex::check(&damaged).expect("Still JSON");
    assert_eq!(
        violations,
        vec![
            Violation {
                path: "[19]/children[1]".to_string(),
                kind: ViolationKind::DuplicateName("BTC_EVT_DISCOVERY_COMPLETE".to_string()),
            },
            Violation {
                path: "[24]".to_string(),
                kind: ViolationKind::BadLink("bti_8h#a76ff2b30c2660a7cc83d1a3531818e59".to_string()),
            },
        ]
    );
}

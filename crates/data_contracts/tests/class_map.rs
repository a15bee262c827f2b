use data_contracts::{ClassMap, LabelError, DEFAULT_CLASSES};

#[test]
fn known_labels_round_trip() {
    let map = ClassMap::default();
    for label in DEFAULT_CLASSES {
        let idx = map.encode(label).unwrap();
        assert_eq!(map.decode(idx).unwrap(), label);
    }
}

#[test]
fn unknown_label_is_rejected() {
    let map = ClassMap::default();
    let err = map.encode("truck").unwrap_err();
    assert_eq!(err, LabelError::UnknownLabel("truck".into()));
    // Case matters; no fuzzy fallback.
    assert!(map.encode("Vehicle").is_err());
    assert!(map.encode_one_hot("truck").is_err());
}

#[test]
fn decode_out_of_range_fails() {
    let map = ClassMap::default();
    assert!(matches!(
        map.decode(7),
        Err(LabelError::IndexOutOfRange {
            index: 7,
            num_classes: 3
        })
    ));
}

#[test]
fn serde_goes_through_validation() {
    let map = ClassMap::default();
    let json = serde_json::to_string(&map).unwrap();
    assert_eq!(json, r#"["vehicle","person","others"]"#);
    let back: ClassMap = serde_json::from_str(&json).unwrap();
    assert_eq!(back, map);

    let dup = serde_json::from_str::<ClassMap>(r#"["a","a"]"#);
    assert!(dup.is_err());
}

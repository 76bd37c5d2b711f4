use super::*;
use std::collections::BTreeMap;

#[test]
fn floats() {
    assert_eq!(to_vec(&1.5f64), Err(Error::TypeNotRepresentable("f64")));
    assert_eq!(to_vec(&1.5f32), Err(Error::TypeNotRepresentable("f32")));
}

#[test]
fn options() {
    assert_eq!(
        to_vec(&Some(1u8)),
        Err(Error::TypeNotRepresentable("some"))
    );
    assert_eq!(
        to_vec(&Option::<u8>::None),
        Err(Error::TypeNotRepresentable("none"))
    );
}

#[test]
fn maps_and_enums() {
    let mut map = BTreeMap::new();
    map.insert(1u8, 2u8);
    assert_eq!(to_vec(&map), Err(Error::TypeNotRepresentable("map")));

    #[derive(Serialize)]
    enum Kind {
        A,
    }
    assert!(matches!(
        to_vec(&Kind::A),
        Err(Error::TypeNotRepresentable(_))
    ));
}

#[test]
fn unknown_length() {
    struct Lazy;

    impl Serialize for Lazy {
        fn serialize<S>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            use serde::ser::SerializeSeq;
            let seq = serializer.serialize_seq(None)?;
            seq.end()
        }
    }

    assert_eq!(to_vec(&Lazy), Err(Error::UnknownLength));
}

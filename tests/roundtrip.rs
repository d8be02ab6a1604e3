//! Primitive values survive a push/get round trip unchanged

use proptest::prelude::*;
use stackbind::{get, get_exact, is, push, State};

fn roundtrip<T>(value: T) -> T
where
    T: stackbind::IntoStack + stackbind::FromStack,
{
    let mut state = State::new();
    assert_eq!(push(&mut state, value).unwrap(), 1);
    get::<T>(&state, -1).unwrap()
}

proptest! {
    #[test]
    fn signed_integers_roundtrip(
        a in any::<i8>(),
        b in any::<i16>(),
        c in any::<i32>(),
        d in any::<i64>(),
    ) {
        prop_assert_eq!(roundtrip(a), a);
        prop_assert_eq!(roundtrip(b), b);
        prop_assert_eq!(roundtrip(c), c);
        prop_assert_eq!(roundtrip(d), d);
    }

    #[test]
    fn unsigned_integers_roundtrip(
        a in any::<u8>(),
        b in any::<u16>(),
        c in any::<u32>(),
        d in any::<u64>(),
        e in any::<usize>(),
    ) {
        prop_assert_eq!(roundtrip(a), a);
        prop_assert_eq!(roundtrip(b), b);
        prop_assert_eq!(roundtrip(c), c);
        prop_assert_eq!(roundtrip(d), d);
        prop_assert_eq!(roundtrip(e), e);
    }

    #[test]
    fn floats_roundtrip(
        a in proptest::num::f64::NORMAL | proptest::num::f64::ZERO,
        b in proptest::num::f32::NORMAL,
    ) {
        prop_assert_eq!(roundtrip(a), a);
        prop_assert_eq!(roundtrip(b), b);
    }

    #[test]
    fn strings_roundtrip(s in ".*") {
        prop_assert_eq!(roundtrip(s.clone()), s);
    }

    #[test]
    fn options_roundtrip(v in proptest::option::of(any::<i32>()), flag in any::<bool>()) {
        prop_assert_eq!(roundtrip(v), v);
        prop_assert_eq!(roundtrip(flag), flag);
    }

    #[test]
    fn narrowing_is_range_checked(v in any::<i64>()) {
        let mut state = State::new();
        push(&mut state, v).unwrap();
        let fits = i8::try_from(v).is_ok();
        prop_assert_eq!(get::<i8>(&state, 1).is_ok(), fits);
        prop_assert_eq!(is::<i8>(&state, 1), fits);
    }

    #[test]
    fn integral_floats_read_as_integers(v in -1_000_000i64..1_000_000) {
        let mut state = State::new();
        push(&mut state, v as f64).unwrap();
        prop_assert_eq!(get::<i64>(&state, 1).unwrap(), v);
        prop_assert!(get_exact::<i64>(&state, 1).is_err());
    }
}

//! Property tests for the backoff strategies and the variable wire codec.

use std::time::Duration;

use chrono::{DateTime, Utc};
use proptest::prelude::*;

use exttask_client::variables::mappers::ValueMapperRegistry;
use exttask_client::{BackoffStrategy, ExponentialBackoff, ObjectValue, TypedValue};

proptest! {
    /// Across consecutive empty fetches the delay never decreases and never
    /// exceeds the configured cap.
    #[test]
    fn empty_poll_delays_are_monotone_and_capped(
        initial_ms in 1u64..5_000,
        factor in 1.0f64..8.0,
        max_ms in 1u64..600_000,
        cycles in 1usize..64,
    ) {
        let max_delay = Duration::from_millis(max_ms);
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(initial_ms),
            factor,
            max_delay,
        );

        let mut previous = backoff.calculate_backoff_time();
        prop_assert_eq!(previous, Duration::ZERO);

        for _ in 0..cycles {
            backoff.reconfigure(0);
            let delay = backoff.calculate_backoff_time();
            prop_assert!(delay >= previous);
            prop_assert!(delay <= max_delay);
            previous = delay;
        }
    }

    /// A single non-empty fetch always drops the delay back to zero, no
    /// matter how deep the escalation went.
    #[test]
    fn any_non_empty_fetch_resets_the_delay(
        empty_cycles in 0usize..128,
        fetched in 1usize..50,
    ) {
        let mut backoff = ExponentialBackoff::default();
        for _ in 0..empty_cycles {
            backoff.reconfigure(0);
        }

        backoff.reconfigure(fetched);
        prop_assert_eq!(backoff.calculate_backoff_time(), Duration::ZERO);
    }

    /// Booleans, strings, and the three integer widths survive the wire
    /// codec unchanged.
    #[test]
    fn integer_primitives_round_trip(short in any::<i16>(), int in any::<i32>(), long in any::<i64>()) {
        let registry = ValueMapperRegistry::default();
        for value in [
            TypedValue::Short(short),
            TypedValue::Integer(int),
            TypedValue::Long(long),
        ] {
            let wire = registry.serialize(&value).unwrap();
            prop_assert_eq!(registry.deserialize(&wire).unwrap(), value);
        }
    }

    #[test]
    fn strings_and_booleans_round_trip(s in ".*", b in any::<bool>()) {
        let registry = ValueMapperRegistry::default();
        for value in [TypedValue::String(s), TypedValue::Boolean(b)] {
            let wire = registry.serialize(&value).unwrap();
            prop_assert_eq!(registry.deserialize(&wire).unwrap(), value.clone());
        }
    }

    /// Finite doubles round-trip exactly; the wire carries the full f64.
    #[test]
    fn finite_doubles_round_trip(d in proptest::num::f64::NORMAL | proptest::num::f64::ZERO) {
        let registry = ValueMapperRegistry::default();
        let value = TypedValue::Double(d);
        let wire = registry.serialize(&value).unwrap();
        prop_assert_eq!(registry.deserialize(&wire).unwrap(), value);
    }

    /// Byte arrays round-trip through their base64 wire form.
    #[test]
    fn byte_arrays_round_trip(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let registry = ValueMapperRegistry::default();
        let value = TypedValue::Bytes(bytes);
        let wire = registry.serialize(&value).unwrap();
        prop_assert_eq!(registry.deserialize(&wire).unwrap(), value.clone());
    }

    /// Dates round-trip at the wire's millisecond precision.
    #[test]
    fn dates_round_trip_at_millisecond_precision(millis in -8_000_000_000_000i64..8_000_000_000_000) {
        let instant: DateTime<Utc> = DateTime::from_timestamp_millis(millis).unwrap();
        let registry = ValueMapperRegistry::default();
        let value = TypedValue::Date(instant);
        let wire = registry.serialize(&value).unwrap();
        prop_assert_eq!(registry.deserialize(&wire).unwrap(), value);
    }

    /// Object values keep their serialization metadata through the codec.
    #[test]
    fn object_metadata_is_preserved(payload in "[a-z]{1,12}", type_name in "[A-Za-z.]{1,40}") {
        let registry = ValueMapperRegistry::default();
        let object = ObjectValue::new(
            format!("{{\"name\":\"{payload}\"}}"),
            "application/json",
            type_name,
        );
        let value = TypedValue::Object(object);

        let wire = registry.serialize(&value).unwrap();
        prop_assert_eq!(registry.deserialize(&wire).unwrap(), value);
    }
}

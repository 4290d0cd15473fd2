//! Forward Protocol `EventTime` values.
//!
//! On the wire an `EventTime` is MessagePack extension type 0 carrying an
//! 8-byte payload: whole seconds followed by nanoseconds, each a big-endian
//! `u32`. Serialising an [`EventTime`] through `rmp-serde` produces exactly
//! that `fixext 8` value.

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Utc};
use log::debug;
use rmp_serde::MSGPACK_EXT_STRUCT_NAME;
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, Visitor},
};

use crate::error::EventTimeError;

/// MessagePack extension type code reserved for `EventTime`.
pub const EVENT_TIME_EXT_CODE: i8 = 0;
/// Length in bytes of the encoded payload.
pub const EVENT_TIME_LEN: usize = 8;

const NANOS_PER_SEC: f64 = 1e9;
const MAX_NANOS: u32 = 999_999_999;

/// Sub-second Unix timestamp with nanosecond resolution.
///
/// Both fields are `u32`, so representable instants run from the epoch to
/// early 2106. Conversions from wider sources clamp into that range instead
/// of wrapping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventTime {
    seconds: u32,
    nanoseconds: u32,
}

impl EventTime {
    /// Create an `EventTime`, clamping `nanoseconds` below one second.
    pub const fn new(seconds: u32, nanoseconds: u32) -> Self {
        let nanoseconds = if nanoseconds > MAX_NANOS {
            MAX_NANOS
        } else {
            nanoseconds
        };
        Self {
            seconds,
            nanoseconds,
        }
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Utc::now().into()
    }

    /// Convert a floating-point Unix timestamp.
    ///
    /// Seconds are `floor(timestamp)` and nanoseconds are the floored
    /// fractional part scaled by 1e9. NaN and negative inputs clamp to the
    /// epoch; inputs beyond `u32::MAX` seconds clamp to the last
    /// representable nanosecond.
    pub fn from_timestamp(timestamp: f64) -> Self {
        if timestamp.is_nan() || timestamp < 0.0 {
            debug!("EventTime clamped out-of-range timestamp {timestamp} to the epoch");
            return Self::default();
        }
        if timestamp >= f64::from(u32::MAX) + 1.0 {
            debug!("EventTime clamped out-of-range timestamp {timestamp} to u32::MAX seconds");
            return Self::new(u32::MAX, MAX_NANOS);
        }
        let whole = timestamp.floor();
        let nanoseconds = ((timestamp - whole) * NANOS_PER_SEC).floor() as u32;
        Self::new(whole as u32, nanoseconds.min(MAX_NANOS))
    }

    /// Whole seconds since the Unix epoch.
    pub fn seconds(&self) -> u32 {
        self.seconds
    }

    /// Nanoseconds past [`seconds`](Self::seconds).
    pub fn nanoseconds(&self) -> u32 {
        self.nanoseconds
    }

    /// The timestamp as fractional seconds.
    pub fn as_f64(&self) -> f64 {
        f64::from(self.seconds) + f64::from(self.nanoseconds) / NANOS_PER_SEC
    }

    /// Encode the ext payload: big-endian seconds then nanoseconds.
    pub fn encode(&self) -> [u8; EVENT_TIME_LEN] {
        let mut out = [0u8; EVENT_TIME_LEN];
        out[..4].copy_from_slice(&self.seconds.to_be_bytes());
        out[4..].copy_from_slice(&self.nanoseconds.to_be_bytes());
        out
    }

    /// Decode an ext payload produced by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> Result<Self, EventTimeError> {
        let payload: &[u8; EVENT_TIME_LEN] = bytes
            .try_into()
            .map_err(|_| EventTimeError::MalformedTimestamp { len: bytes.len() })?;
        let (secs, nanos) = payload.split_at(4);
        let seconds = u32::from_be_bytes([secs[0], secs[1], secs[2], secs[3]]);
        let nanoseconds = u32::from_be_bytes([nanos[0], nanos[1], nanos[2], nanos[3]]);
        Ok(Self::new(seconds, nanoseconds))
    }

    /// Decode an ext payload straight to fractional seconds.
    pub fn decode_f64(bytes: &[u8]) -> Result<f64, EventTimeError> {
        Self::decode(bytes).map(|time| time.as_f64())
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanoseconds)
    }
}

impl From<f64> for EventTime {
    fn from(timestamp: f64) -> Self {
        Self::from_timestamp(timestamp)
    }
}

impl From<SystemTime> for EventTime {
    fn from(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(elapsed) => match u32::try_from(elapsed.as_secs()) {
                Ok(seconds) => Self::new(seconds, elapsed.subsec_nanos()),
                Err(_) => Self::new(u32::MAX, MAX_NANOS),
            },
            Err(_) => Self::default(),
        }
    }
}

impl From<DateTime<Utc>> for EventTime {
    fn from(time: DateTime<Utc>) -> Self {
        let seconds = time.timestamp();
        if seconds < 0 {
            return Self::default();
        }
        match u32::try_from(seconds) {
            // Leap seconds report up to 1_999_999_999 nanoseconds; `new` clamps.
            Ok(seconds) => Self::new(seconds, time.timestamp_subsec_nanos()),
            Err(_) => Self::new(u32::MAX, MAX_NANOS),
        }
    }
}

struct ExtPayload<'a>(&'a [u8]);

impl Serialize for ExtPayload<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(self.0)
    }
}

impl Serialize for EventTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let payload = self.encode();
        serializer.serialize_newtype_struct(
            MSGPACK_EXT_STRUCT_NAME,
            &(EVENT_TIME_EXT_CODE, ExtPayload(&payload)),
        )
    }
}

struct ExtBytes(Vec<u8>);

struct ExtBytesVisitor;

impl<'de> Visitor<'de> for ExtBytesVisitor {
    type Value = ExtBytes;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ext payload bytes")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        Ok(ExtBytes(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
        Ok(ExtBytes(v))
    }
}

impl<'de> Deserialize<'de> for ExtBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_bytes(ExtBytesVisitor)
    }
}

struct EventTimeVisitor;

impl<'de> Visitor<'de> for EventTimeVisitor {
    type Value = EventTime;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a MessagePack ext(0) EventTime")
    }

    fn visit_newtype_struct<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<Self::Value, D::Error> {
        let (code, ExtBytes(payload)) = <(i8, ExtBytes)>::deserialize(deserializer)?;
        if code != EVENT_TIME_EXT_CODE {
            return Err(de::Error::custom(EventTimeError::UnexpectedExtCode(code)));
        }
        EventTime::decode(&payload).map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for EventTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_newtype_struct(MSGPACK_EXT_STRUCT_NAME, EventTimeVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    fn encodes_seconds_and_nanoseconds_big_endian() {
        let time = EventTime::from_timestamp(1_700_000_000.5);
        assert_eq!(time.seconds(), 1_700_000_000);
        assert_eq!(time.nanoseconds(), 500_000_000);
        assert_eq!(
            time.encode(),
            [0x65, 0x53, 0xF1, 0x00, 0x1D, 0xCD, 0x65, 0x00]
        );
    }

    #[rstest]
    #[case(7)]
    #[case(0)]
    #[case(9)]
    fn decode_rejects_wrong_length(#[case] len: usize) {
        let err = EventTime::decode(&vec![0u8; len]).expect_err("length must be checked");
        assert_eq!(err, EventTimeError::MalformedTimestamp { len });
    }

    #[rstest]
    #[case(f64::NAN, EventTime::new(0, 0))]
    #[case(-1.5, EventTime::new(0, 0))]
    #[case(f64::NEG_INFINITY, EventTime::new(0, 0))]
    #[case(f64::INFINITY, EventTime::new(u32::MAX, 999_999_999))]
    #[case(4_294_967_296.0, EventTime::new(u32::MAX, 999_999_999))]
    #[case(4_294_967_295.0, EventTime::new(u32::MAX, 0))]
    fn out_of_range_timestamps_clamp(#[case] input: f64, #[case] expected: EventTime) {
        assert_eq!(EventTime::from_timestamp(input), expected);
    }

    #[rstest]
    fn new_clamps_nanoseconds() {
        assert_eq!(EventTime::new(1, 2_000_000_000).nanoseconds(), 999_999_999);
    }

    #[rstest]
    fn system_time_before_epoch_is_epoch() {
        let before = UNIX_EPOCH - std::time::Duration::from_secs(10);
        assert_eq!(EventTime::from(before), EventTime::default());
    }

    #[rstest]
    fn display_pads_nanoseconds() {
        assert_eq!(EventTime::new(12, 5).to_string(), "12.000000005");
    }

    #[rstest]
    fn serialises_as_fixext8_code_zero() {
        let time = EventTime::new(1_700_000_000, 500_000_000);
        let bytes = rmp_serde::to_vec(&time).expect("serialise EventTime");
        assert_eq!(bytes[0], 0xd7, "fixext 8 marker");
        assert_eq!(bytes[1], 0x00, "ext type code");
        assert_eq!(&bytes[2..], &time.encode());
    }

    #[rstest]
    fn deserialises_from_msgpack_ext() {
        let time = EventTime::new(42, 7);
        let bytes = rmp_serde::to_vec(&("tag", time)).expect("serialise tuple");
        let (tag, decoded): (String, EventTime) =
            rmp_serde::from_slice(&bytes).expect("deserialise tuple");
        assert_eq!(tag, "tag");
        assert_eq!(decoded, time);
    }

    #[rstest]
    fn deserialise_rejects_other_ext_codes() {
        let mut bytes = rmp_serde::to_vec(&EventTime::new(1, 1)).expect("serialise");
        bytes[1] = 0x05;
        assert!(rmp_serde::from_slice::<EventTime>(&bytes).is_err());
    }

    proptest! {
        #[test]
        fn fields_round_trip_exactly(seconds in any::<u32>(), nanos in 0u32..1_000_000_000) {
            let time = EventTime::new(seconds, nanos);
            prop_assert_eq!(EventTime::decode(&time.encode()).unwrap(), time);
        }

        #[test]
        fn float_timestamps_round_trip(t in 0.0f64..4_294_967_295.0) {
            let back = EventTime::decode_f64(&EventTime::from_timestamp(t).encode()).unwrap();
            let tolerance = 1e-9 + 4.0 * t * f64::EPSILON;
            prop_assert!((back - t).abs() <= tolerance, "{} decoded as {}", t, back);
        }
    }
}

//! Forward Protocol packet construction.
//!
//! A packet is the MessagePack array `[tag, time, record]`. Several packets may
//! be concatenated into one write; the collector decodes them as a stream.

use std::collections::BTreeMap;

use log::info;
use rmp_serde::Serializer;
use serde::Serialize;

use crate::{error::PacketError, event_time::EventTime};

/// Level reported by the substitute record sent when serialisation fails.
pub const DIAGNOSTIC_LEVEL: &str = "CRITICAL";
/// Message reported by the substitute record sent when serialisation fails.
pub const DIAGNOSTIC_MESSAGE: &str = "Can't output to log";

/// Options handed to the MessagePack serialiser unmodified.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct PackerOptions {
    /// Encode structs as maps keyed by field name rather than arrays.
    pub struct_map: bool,
    /// Ask `Serialize` impls for their human-readable form.
    pub human_readable: bool,
}

impl PackerOptions {
    /// Encode structs as maps keyed by field name.
    pub fn with_struct_map(mut self) -> Self {
        self.struct_map = true;
        self
    }

    /// Request human-readable representations from `Serialize` impls.
    pub fn with_human_readable(mut self) -> Self {
        self.human_readable = true;
        self
    }
}

fn pack<T: Serialize + ?Sized>(value: &T, options: PackerOptions) -> Result<Vec<u8>, PacketError> {
    let mut buf = Vec::with_capacity(128);
    match (options.struct_map, options.human_readable) {
        (false, false) => value.serialize(&mut Serializer::new(&mut buf))?,
        (true, false) => value.serialize(&mut Serializer::new(&mut buf).with_struct_map())?,
        (false, true) => value.serialize(&mut Serializer::new(&mut buf).with_human_readable())?,
        (true, true) => value.serialize(
            &mut Serializer::new(&mut buf)
                .with_struct_map()
                .with_human_readable(),
        )?,
    }
    Ok(buf)
}

/// Outcome of [`PacketBuilder::build_or_diagnostic`].
#[derive(Debug)]
pub enum BuiltPacket {
    /// The caller's record serialised cleanly.
    Record(Vec<u8>),
    /// The caller's record failed to serialise; `bytes` carries the
    /// substitute CRITICAL record instead.
    Diagnostic { bytes: Vec<u8>, error: PacketError },
}

impl BuiltPacket {
    /// Encoded packet bytes.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Record(bytes) | Self::Diagnostic { bytes, .. } => bytes,
        }
    }

    /// Consume the outcome, returning the encoded packet bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Record(bytes) | Self::Diagnostic { bytes, .. } => bytes,
        }
    }
}

/// Builds tagged, timestamped packets for a fixed base tag.
#[derive(Clone, Debug)]
pub struct PacketBuilder {
    base_tag: String,
    options: PackerOptions,
    verbose: bool,
}

impl PacketBuilder {
    /// Create a builder for `base_tag`.
    pub fn new(base_tag: impl Into<String>, options: PackerOptions) -> Self {
        Self {
            base_tag: base_tag.into(),
            options,
            verbose: false,
        }
    }

    /// Echo every packet at `info` level before it is encoded.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// The base tag every packet is prefixed with.
    pub fn base_tag(&self) -> &str {
        &self.base_tag
    }

    /// `base_tag` alone for an empty label, otherwise `base_tag.label`.
    pub fn full_tag(&self, label: &str) -> String {
        if label.is_empty() {
            self.base_tag.clone()
        } else {
            format!("{}.{}", self.base_tag, label)
        }
    }

    /// Encode `(tag, time, record)`.
    pub fn try_build<R: Serialize + ?Sized>(
        &self,
        label: &str,
        time: EventTime,
        record: &R,
    ) -> Result<Vec<u8>, PacketError> {
        let tag = self.full_tag(label);
        if self.verbose {
            let rendered = serde_json::to_string(record)
                .unwrap_or_else(|err| format!("<unrenderable record: {err}>"));
            info!("fluent packet: ({tag}, {time}, {rendered})");
        }
        pack(&(tag.as_str(), time, record), self.options)
    }

    /// Encode `(tag, time, record)`, substituting a CRITICAL diagnostic
    /// record if the caller's record cannot be serialised.
    ///
    /// The diagnostic record holds only strings, so the fallback cannot fail
    /// for the same reason; an error is returned only if the serialiser
    /// itself is broken.
    pub fn build_or_diagnostic<R: Serialize + ?Sized>(
        &self,
        label: &str,
        time: EventTime,
        record: &R,
    ) -> Result<BuiltPacket, PacketError> {
        match self.try_build(label, time, record) {
            Ok(bytes) => Ok(BuiltPacket::Record(bytes)),
            Err(error) => {
                let failure = error.to_string();
                let diagnostic = BTreeMap::from([
                    ("level", DIAGNOSTIC_LEVEL),
                    ("message", DIAGNOSTIC_MESSAGE),
                    ("traceback", failure.as_str()),
                ]);
                let bytes = self.try_build(label, time, &diagnostic)?;
                Ok(BuiltPacket::Diagnostic { bytes, error })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use serde::ser::Error as _;

    #[fixture]
    fn builder() -> PacketBuilder {
        PacketBuilder::new("app", PackerOptions::default())
    }

    struct Unserialisable;

    impl Serialize for Unserialisable {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("record refused to serialise"))
        }
    }

    #[derive(Serialize)]
    struct Access {
        code: u16,
    }

    #[rstest]
    #[case("", "app")]
    #[case("access", "app.access")]
    #[case("http.access", "app.http.access")]
    fn full_tag_joins_label(builder: PacketBuilder, #[case] label: &str, #[case] expected: &str) {
        assert_eq!(builder.full_tag(label), expected);
    }

    #[rstest]
    fn builds_forward_protocol_array(builder: PacketBuilder) {
        let time = EventTime::from_timestamp(1_700_000_000.5);
        let record = BTreeMap::from([("code", 200u16)]);
        let bytes = builder
            .try_build("access", time, &record)
            .expect("record serialises");

        let mut expected = vec![0x93, 0xaa];
        expected.extend_from_slice(b"app.access");
        expected.extend_from_slice(&[0xd7, 0x00, 0x65, 0x53, 0xF1, 0x00, 0x1D, 0xCD, 0x65, 0x00]);
        expected.extend_from_slice(&[0x81, 0xa4]);
        expected.extend_from_slice(b"code");
        expected.push(0xcc);
        expected.push(200);
        assert_eq!(bytes, expected);

        let (tag, decoded_time, decoded): (String, EventTime, BTreeMap<String, u16>) =
            rmp_serde::from_slice(&bytes).expect("decode packet");
        assert_eq!(tag, "app.access");
        assert_eq!(decoded_time, time);
        assert_eq!(decoded.get("code"), Some(&200));
    }

    #[rstest]
    fn struct_map_option_is_passed_through() {
        let time = EventTime::new(1, 0);
        let as_array = PacketBuilder::new("app", PackerOptions::default())
            .try_build("", time, &Access { code: 200 })
            .expect("array encoding");
        let as_map = PacketBuilder::new("app", PackerOptions::default().with_struct_map())
            .try_build("", time, &Access { code: 200 })
            .expect("map encoding");

        let (_, _, decoded): (String, EventTime, BTreeMap<String, u16>) =
            rmp_serde::from_slice(&as_map).expect("decode map record");
        assert_eq!(decoded.get("code"), Some(&200));
        assert!(
            rmp_serde::from_slice::<(String, EventTime, BTreeMap<String, u16>)>(&as_array)
                .is_err(),
            "default options encode structs as arrays",
        );
    }

    #[rstest]
    fn unserialisable_record_becomes_diagnostic(builder: PacketBuilder) {
        let time = EventTime::new(10, 0);
        let built = builder
            .build_or_diagnostic("boom", time, &Unserialisable)
            .expect("diagnostic always builds");
        let BuiltPacket::Diagnostic { bytes, error } = built else {
            panic!("expected diagnostic packet");
        };
        assert!(error.to_string().contains("record refused to serialise"));

        let (tag, decoded_time, record): (String, EventTime, BTreeMap<String, String>) =
            rmp_serde::from_slice(&bytes).expect("decode diagnostic");
        assert_eq!(tag, "app.boom");
        assert_eq!(decoded_time, time);
        assert_eq!(record["level"], DIAGNOSTIC_LEVEL);
        assert_eq!(record["message"], DIAGNOSTIC_MESSAGE);
        assert!(record["traceback"].contains("record refused to serialise"));
    }

    #[rstest]
    fn serialisable_record_is_not_substituted(builder: PacketBuilder) {
        let built = builder
            .build_or_diagnostic("", EventTime::new(1, 0), &"plain")
            .expect("build");
        assert!(matches!(built, BuiltPacket::Record(_)));
    }

    #[rstest]
    fn verbose_echo_does_not_change_bytes() {
        let time = EventTime::new(5, 5);
        let quiet = PacketBuilder::new("app", PackerOptions::default());
        let loud = quiet.clone().with_verbose(true);
        assert_eq!(
            quiet.try_build("x", time, &[1, 2, 3]).expect("quiet"),
            loud.try_build("x", time, &[1, 2, 3]).expect("loud"),
        );
    }

    #[rstest]
    fn packer_options_default_from_empty_settings() {
        let options: PackerOptions = serde_json::from_str("{}").expect("parse options");
        assert_eq!(options, PackerOptions::default());
    }
}

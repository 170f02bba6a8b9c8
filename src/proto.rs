//! Archiver Appliance storage messages (`EPICSEvent.proto`).
//!
//! Field numbers and wire types must match the appliance's own schema so
//! that files written here can be read back by it unchanged.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum PayloadType {
    ScalarString = 0,
    ScalarShort = 1,
    ScalarFloat = 2,
    ScalarEnum = 3,
    ScalarByte = 4,
    ScalarInt = 5,
    ScalarDouble = 6,
    WaveformString = 7,
    WaveformShort = 8,
    WaveformFloat = 9,
    WaveformEnum = 10,
    WaveformByte = 11,
    WaveformInt = 12,
    WaveformDouble = 13,
    V4GenericBytes = 14,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FieldValue {
    #[prost(string, required, tag = "1")]
    pub name: String,
    #[prost(string, required, tag = "2")]
    pub val: String,
}

impl FieldValue {
    pub fn new(name: impl Into<String>, val: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            val: val.into(),
        }
    }
}

/// Header record, always the first line of a partition file.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PayloadInfo {
    #[prost(enumeration = "PayloadType", required, tag = "1")]
    pub r#type: i32,
    #[prost(string, required, tag = "2")]
    pub pvname: String,
    #[prost(int32, required, tag = "3")]
    pub year: i32,
    #[prost(int32, optional, tag = "4")]
    pub element_count: Option<i32>,
    #[prost(message, repeated, tag = "15")]
    pub headers: Vec<FieldValue>,
}

/// The two leading fields shared by every sample message. Decoding any
/// sample record through this type skips the value and alarm fields.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SampleKey {
    #[prost(uint32, required, tag = "1")]
    pub secondsintoyear: u32,
    #[prost(uint32, required, tag = "2")]
    pub nano: u32,
}

macro_rules! sample_message {
    ($(#[$meta:meta])* $name:ident, $val_ty:ty, $($val_attr:tt)+) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, prost::Message)]
        pub struct $name {
            #[prost(uint32, required, tag = "1")]
            pub secondsintoyear: u32,
            #[prost(uint32, required, tag = "2")]
            pub nano: u32,
            #[prost($($val_attr)+, tag = "3")]
            pub val: $val_ty,
            #[prost(int32, optional, tag = "4")]
            pub severity: Option<i32>,
            #[prost(int32, optional, tag = "5")]
            pub status: Option<i32>,
            #[prost(uint32, optional, tag = "6")]
            pub repeatcount: Option<u32>,
            #[prost(message, repeated, tag = "7")]
            pub fieldvalues: Vec<FieldValue>,
            #[prost(bool, optional, tag = "8")]
            pub fieldactualchange: Option<bool>,
        }
    };
}

sample_message!(ScalarString, String, string, required);
sample_message!(ScalarShort, i32, sint32, required);
sample_message!(ScalarFloat, f32, float, required);
sample_message!(ScalarEnum, i32, sint32, required);
sample_message!(ScalarByte, Vec<u8>, bytes = "vec", required);
sample_message!(ScalarInt, i32, sfixed32, required);
sample_message!(ScalarDouble, f64, double, required);
sample_message!(VectorString, Vec<String>, string, repeated);
sample_message!(VectorShort, Vec<i32>, sint32, repeated, packed = "false");
sample_message!(VectorFloat, Vec<f32>, float, repeated, packed = "false");
sample_message!(VectorEnum, Vec<i32>, sint32, repeated, packed = "false");
sample_message!(
    /// Waveform of bytes is stored as a single `bytes` value, not a
    /// repeated field.
    VectorChar,
    Vec<u8>,
    bytes = "vec",
    required
);
sample_message!(VectorInt, Vec<i32>, sfixed32, repeated, packed = "false");
sample_message!(VectorDouble, Vec<f64>, double, repeated, packed = "false");

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn sample_key_reads_any_sample_message() {
        let msg = ScalarDouble {
            secondsintoyear: 86_400,
            nano: 17,
            val: 1.5,
            severity: Some(2),
            status: None,
            repeatcount: None,
            fieldvalues: vec![FieldValue::new("HOPR", "10")],
            fieldactualchange: None,
        };
        let bytes = msg.encode_to_vec();
        let key = SampleKey::decode(bytes.as_slice()).expect("decode key");
        assert_eq!(key.secondsintoyear, 86_400);
        assert_eq!(key.nano, 17);
    }

    #[test]
    fn payload_info_keeps_type_code() {
        let info = PayloadInfo {
            r#type: PayloadType::WaveformDouble as i32,
            pvname: "SR:C01:BPM".to_string(),
            year: 2017,
            element_count: Some(128),
            headers: Vec::new(),
        };
        let decoded = PayloadInfo::decode(info.encode_to_vec().as_slice()).expect("decode");
        assert_eq!(
            PayloadType::try_from(decoded.r#type).ok(),
            Some(PayloadType::WaveformDouble)
        );
        assert_eq!(decoded.element_count, Some(128));
    }
}
